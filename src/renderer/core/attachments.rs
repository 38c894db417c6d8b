use std::sync::Arc;
use ash::vk;
use color_eyre::Result;
use crate::renderer::core::device::RenderDevice;
use crate::renderer::core::memory::has_stencil_component;
use crate::renderer::core::swapchain::Swapchain;

/// Depth/stencil image shared by all framebuffers
pub struct DepthStencil {
    pub image: vk::Image,
    pub memory: vk::DeviceMemory,
    pub view: vk::ImageView,
    pub format: vk::Format,

    device: Arc<ash::Device>,
}

impl DepthStencil {
    pub fn new(device: &RenderDevice, extent: vk::Extent2D) -> Result<Self> {
        let format = device.depth_format;
        let mut depth = Self {
            image: vk::Image::null(),
            memory: vk::DeviceMemory::null(),
            view: vk::ImageView::null(),
            format,
            device: device.logical.clone(),
        };

        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT);
        depth.image = unsafe {
            device.logical.create_image(&image_info, None)?
        };

        let requirements = unsafe {
            device.logical.get_image_memory_requirements(depth.image)
        };
        let memory_type_index = device.find_memory_type_index(
            requirements.memory_type_bits,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;
        let alloc_info = vk::MemoryAllocateInfo::default()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type_index);
        depth.memory = unsafe {
            device.logical.allocate_memory(&alloc_info, None)?
        };
        unsafe {
            device.logical.bind_image_memory(depth.image, depth.memory, 0)?;
        }

        let mut aspect_mask = vk::ImageAspectFlags::DEPTH;
        if has_stencil_component(format) {
            aspect_mask |= vk::ImageAspectFlags::STENCIL;
        }
        let view_info = vk::ImageViewCreateInfo::default()
            .view_type(vk::ImageViewType::TYPE_2D)
            .image(depth.image)
            .format(format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });
        depth.view = unsafe {
            device.logical.create_image_view(&view_info, None)?
        };

        Ok(depth)
    }
}

impl Drop for DepthStencil {
    fn drop(&mut self) {
        unsafe {
            if self.view != vk::ImageView::null() {
                self.device.destroy_image_view(self.view, None);
            }
            if self.image != vk::Image::null() {
                self.device.destroy_image(self.image, None);
            }
            if self.memory != vk::DeviceMemory::null() {
                self.device.free_memory(self.memory, None);
            }
        }
    }
}

/// Single-subpass pass that clears color and depth and leaves the color image ready to present
pub struct RenderPass {
    pub handle: vk::RenderPass,
    device: Arc<ash::Device>,
}

impl RenderPass {
    pub fn new(
        device: &RenderDevice,
        color_format: vk::Format,
        depth_format: vk::Format,
    ) -> Result<Self> {
        let attachments = [
            vk::AttachmentDescription::default()
                .format(color_format)
                .samples(vk::SampleCountFlags::TYPE_1)
                .load_op(vk::AttachmentLoadOp::CLEAR)
                .store_op(vk::AttachmentStoreOp::STORE)
                .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(vk::ImageLayout::UNDEFINED)
                .final_layout(vk::ImageLayout::PRESENT_SRC_KHR),
            vk::AttachmentDescription::default()
                .format(depth_format)
                .samples(vk::SampleCountFlags::TYPE_1)
                .load_op(vk::AttachmentLoadOp::CLEAR)
                .store_op(vk::AttachmentStoreOp::STORE)
                .stencil_load_op(vk::AttachmentLoadOp::CLEAR)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(vk::ImageLayout::UNDEFINED)
                .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL),
        ];

        let color_references = [vk::AttachmentReference {
            attachment: 0,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        }];
        let depth_reference = vk::AttachmentReference {
            attachment: 1,
            layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        };
        let subpasses = [vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_references)
            .depth_stencil_attachment(&depth_reference)];

        // Depth is cleared every frame, so the previous frame's depth accesses
        // must finish first. The color dependency orders the layout transition
        // after the acquire semaphore wait.
        let dependencies = [
            vk::SubpassDependency::default()
                .src_subpass(vk::SUBPASS_EXTERNAL)
                .dst_subpass(0)
                .src_stage_mask(
                    vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
                        | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
                )
                .dst_stage_mask(
                    vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
                        | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
                )
                .src_access_mask(vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE)
                .dst_access_mask(
                    vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE
                        | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ,
                ),
            vk::SubpassDependency::default()
                .src_subpass(vk::SUBPASS_EXTERNAL)
                .dst_subpass(0)
                .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
                .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
                .src_access_mask(vk::AccessFlags::empty())
                .dst_access_mask(
                    vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                        | vk::AccessFlags::COLOR_ATTACHMENT_READ,
                ),
        ];

        let render_pass_info = vk::RenderPassCreateInfo::default()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);
        let handle = unsafe {
            device.logical.create_render_pass(&render_pass_info, None)?
        };

        Ok(Self {
            handle,
            device: device.logical.clone(),
        })
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_render_pass(self.handle, None);
        }
    }
}

/// Everything that has to be rebuilt when the swapchain changes size
pub struct SurfaceAttachments {
    pub framebuffers: Vec<vk::Framebuffer>,
    pub depth_stencil: DepthStencil,
    pub extent: vk::Extent2D,

    device: Arc<ash::Device>,
}

impl SurfaceAttachments {
    pub fn new(
        device: &RenderDevice,
        render_pass: &RenderPass,
        swapchain: &Swapchain,
    ) -> Result<Self> {
        let depth_stencil = DepthStencil::new(device, swapchain.extent)?;
        let mut attachments = Self {
            framebuffers: Vec::with_capacity(swapchain.image_views.len()),
            depth_stencil,
            extent: swapchain.extent,
            device: device.logical.clone(),
        };

        for view in &swapchain.image_views {
            let views = [*view, attachments.depth_stencil.view];
            let framebuffer_info = vk::FramebufferCreateInfo::default()
                .render_pass(render_pass.handle)
                .attachments(&views)
                .width(swapchain.extent.width)
                .height(swapchain.extent.height)
                .layers(1);
            let framebuffer = unsafe {
                device.logical.create_framebuffer(&framebuffer_info, None)?
            };
            attachments.framebuffers.push(framebuffer);
        }

        Ok(attachments)
    }
}

impl Drop for SurfaceAttachments {
    fn drop(&mut self) {
        unsafe {
            for framebuffer in self.framebuffers.drain(..) {
                self.device.destroy_framebuffer(framebuffer, None);
            }
        }
    }
}
