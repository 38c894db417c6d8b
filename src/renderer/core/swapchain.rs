use std::sync::Arc;
use ash::prelude::VkResult;
use ash::vk;
use color_eyre::Result;
use crate::renderer::config::Timeout;
use crate::renderer::core::device::RenderDevice;
use crate::renderer::core::error::{HarnessError, HarnessResult};
use crate::renderer::core::target::RenderSurface;

/// Health of the presentation surface as reported by acquire and present
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SurfaceState {
    Valid,
    OutOfDate,
    Suboptimal,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// `state` is either `Valid` or `Suboptimal`.
    Acquired { image_index: u32, state: SurfaceState },
    OutOfDate,
}

impl AcquireOutcome {
    pub fn state(&self) -> SurfaceState {
        match self {
            AcquireOutcome::Acquired { state, .. } => *state,
            AcquireOutcome::OutOfDate => SurfaceState::OutOfDate,
        }
    }
}

pub fn map_acquire_result(result: VkResult<(u32, bool)>) -> HarnessResult<AcquireOutcome> {
    match result {
        Ok((image_index, false)) => Ok(AcquireOutcome::Acquired {
            image_index,
            state: SurfaceState::Valid,
        }),
        Ok((image_index, true)) => Ok(AcquireOutcome::Acquired {
            image_index,
            state: SurfaceState::Suboptimal,
        }),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
        Err(vk::Result::TIMEOUT) | Err(vk::Result::NOT_READY) => Err(HarnessError::Timeout),
        Err(err) => Err(HarnessError::Acquire(err)),
    }
}

pub fn map_present_result(result: VkResult<bool>) -> HarnessResult<SurfaceState> {
    match result {
        Ok(false) => Ok(SurfaceState::Valid),
        Ok(true) => Ok(SurfaceState::Suboptimal),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(SurfaceState::OutOfDate),
        Err(err) => Err(HarnessError::Present(err)),
    }
}

pub const PREFERRED_FORMATS: [vk::Format; 3] = [
    vk::Format::B8G8R8A8_UNORM,
    vk::Format::R8G8B8A8_UNORM,
    vk::Format::A8B8G8R8_UNORM_PACK32,
];

/// First entry of `preferred` the surface supports, otherwise the surface's first format.
pub fn choose_surface_format(
    supported: &[vk::SurfaceFormatKHR],
    preferred: &[vk::Format],
) -> Option<vk::SurfaceFormatKHR> {
    let first = *supported.first()?;

    // A single UNDEFINED entry means the surface has no preference
    if supported.len() == 1 && first.format == vk::Format::UNDEFINED {
        return Some(vk::SurfaceFormatKHR {
            format: preferred.first().copied().unwrap_or(vk::Format::B8G8R8A8_UNORM),
            color_space: first.color_space,
        });
    }

    let preferred_match = preferred.iter().find_map(|wanted| {
        supported.iter().find(|format| format.format == *wanted).copied()
    });
    Some(preferred_match.unwrap_or(first))
}

pub fn choose_present_mode(
    available: &[vk::PresentModeKHR],
    vsync: bool,
) -> vk::PresentModeKHR {
    // FIFO is the only mode every implementation has to support
    if vsync {
        return vk::PresentModeKHR::FIFO;
    }
    [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::IMMEDIATE]
        .into_iter()
        .find(|mode| available.contains(mode))
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// The current extent wins unless the surface leaves the size to the swapchain.
pub fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    width: u32,
    height: u32,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }
    vk::Extent2D {
        width: width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    }
}

pub fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let min = capabilities.min_image_count;
    let max = capabilities.max_image_count;
    // max == 0 means no upper limit
    if max > 0 && min + 1 > max {
        max
    } else {
        min + 1
    }
}

pub fn choose_pre_transform(capabilities: &vk::SurfaceCapabilitiesKHR) -> vk::SurfaceTransformFlagsKHR {
    if capabilities
        .supported_transforms
        .contains(vk::SurfaceTransformFlagsKHR::IDENTITY)
    {
        vk::SurfaceTransformFlagsKHR::IDENTITY
    } else {
        capabilities.current_transform
    }
}

pub fn choose_composite_alpha(capabilities: &vk::SurfaceCapabilitiesKHR) -> vk::CompositeAlphaFlagsKHR {
    [
        vk::CompositeAlphaFlagsKHR::OPAQUE,
        vk::CompositeAlphaFlagsKHR::PRE_MULTIPLIED,
        vk::CompositeAlphaFlagsKHR::POST_MULTIPLIED,
        vk::CompositeAlphaFlagsKHR::INHERIT,
    ]
        .into_iter()
        .find(|alpha| capabilities.supported_composite_alpha.contains(*alpha))
        .unwrap_or(vk::CompositeAlphaFlagsKHR::OPAQUE)
}

/// Color attachment, plus transfer source/destination where surface and format allow it.
pub fn choose_image_usage(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    format_features: vk::FormatFeatureFlags,
) -> vk::ImageUsageFlags {
    let mut usage = vk::ImageUsageFlags::COLOR_ATTACHMENT;
    let supported = capabilities.supported_usage_flags;

    if supported.contains(vk::ImageUsageFlags::TRANSFER_SRC)
        && format_features.intersects(vk::FormatFeatureFlags::TRANSFER_SRC | vk::FormatFeatureFlags::BLIT_SRC)
    {
        usage |= vk::ImageUsageFlags::TRANSFER_SRC;
    }
    if supported.contains(vk::ImageUsageFlags::TRANSFER_DST)
        && format_features.contains(vk::FormatFeatureFlags::TRANSFER_DST)
    {
        usage |= vk::ImageUsageFlags::TRANSFER_DST;
    }

    usage
}

pub struct SwapchainDesc {
    pub width: u32,
    pub height: u32,
    pub vsync: bool,
    pub fullscreen: bool,
    pub surface_format: vk::SurfaceFormatKHR,
    pub format_features: vk::FormatFeatureFlags,
}

/// Presentable images of a surface and one view per image
pub struct Swapchain {
    pub handle: vk::SwapchainKHR,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub image_usage: vk::ImageUsageFlags,

    loader: ash::khr::swapchain::Device,
    device: Arc<ash::Device>,
}

impl Swapchain {
    /// Creates a chain for the surface. `old` is handed to the driver for
    /// reuse and must be dropped by the caller once this returns.
    pub fn new(
        surface: &RenderSurface,
        loader: &ash::khr::swapchain::Device,
        device: &RenderDevice,
        desc: &SwapchainDesc,
        old: Option<&Swapchain>,
    ) -> Result<Self> {
        let physical_device = device.accelerator.handle;
        let capabilities = surface.capabilities(physical_device)?;
        let present_modes = surface.present_modes(physical_device)?;

        let extent = choose_extent(&capabilities, desc.width, desc.height);
        let present_mode = choose_present_mode(&present_modes, desc.vsync);
        let min_image_count = choose_image_count(&capabilities);
        let image_usage = choose_image_usage(&capabilities, desc.format_features);

        let swapchain_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface.handle)
            .min_image_count(min_image_count)
            .image_format(desc.surface_format.format)
            .image_color_space(desc.surface_format.color_space)
            .image_extent(extent)
            .image_usage(image_usage)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(choose_pre_transform(&capabilities))
            .composite_alpha(choose_composite_alpha(&capabilities))
            .present_mode(present_mode)
            .clipped(true)
            .image_array_layers(1)
            .old_swapchain(old.map_or(vk::SwapchainKHR::null(), |old| old.handle));

        let handle = unsafe {
            loader.create_swapchain(&swapchain_info, None)?
        };

        let mut swapchain = Self {
            handle,
            images: Vec::new(),
            image_views: Vec::new(),
            format: desc.surface_format,
            present_mode,
            extent,
            image_usage,
            loader: loader.clone(),
            device: device.logical.clone(),
        };
        swapchain.create_image_views()?;

        log::debug!(
            "Created swapchain {}x{} with {} images, {:?}, fullscreen: {}",
            extent.width,
            extent.height,
            swapchain.images.len(),
            present_mode,
            desc.fullscreen,
        );

        Ok(swapchain)
    }

    pub fn image_count(&self) -> u32 {
        self.images.len() as u32
    }

    /// Signals `semaphore` once the returned image can be rendered to.
    pub fn acquire_next_image(
        &self,
        semaphore: vk::Semaphore,
        timeout: Timeout,
    ) -> HarnessResult<AcquireOutcome> {
        let result = unsafe {
            self.loader.acquire_next_image(
                self.handle,
                timeout.as_nanos(),
                semaphore,
                vk::Fence::null(),
            )
        };
        map_acquire_result(result)
    }

    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> HarnessResult<SurfaceState> {
        let wait_semaphores = [wait_semaphore];
        let swapchains = [self.handle];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe {
            self.loader.queue_present(queue, &present_info)
        };
        map_present_result(result)
    }

    fn create_image_views(&mut self) -> Result<()> {
        self.images = unsafe {
            self.loader.get_swapchain_images(self.handle)?
        };

        for image in &self.images {
            let view_info = vk::ImageViewCreateInfo::default()
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(self.format.format)
                .components(vk::ComponentMapping {
                    r: vk::ComponentSwizzle::R,
                    g: vk::ComponentSwizzle::G,
                    b: vk::ComponentSwizzle::B,
                    a: vk::ComponentSwizzle::A,
                })
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                })
                .image(*image);
            let view = unsafe {
                self.device.create_image_view(&view_info, None)?
            };
            self.image_views.push(view);
        }

        Ok(())
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        unsafe {
            for view in self.image_views.drain(..) {
                self.device.destroy_image_view(view, None);
            }
            self.loader.destroy_swapchain(self.handle, None);
        }
    }
}
