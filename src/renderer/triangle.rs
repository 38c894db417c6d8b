use std::f32::consts::{PI, TAU};
use std::mem::{offset_of, size_of, size_of_val};
use ash::vk;
use bytemuck::{Pod, Zeroable};
use color_eyre::eyre::OptionExt;
use color_eyre::Result;
use glam::{Mat4, Vec2, Vec3};
use winit::keyboard::KeyCode;
use crate::renderer::camera::Camera;
use crate::renderer::core::buffer::Buffer;
use crate::renderer::core::descriptor::{DescriptorPool, DescriptorSetLayout, DescriptorSetLayoutBuilder};
use crate::renderer::core::pipeline::{GraphicsPipeline, GraphicsPipelineDesc};
use crate::renderer::core::shader::GraphicsShader;
use crate::renderer::payload::{PayloadContext, RenderPayload};

const TRIANGLE_VERT_SPV: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/triangle.vert.spv"));
const TRIANGLE_FRAG_SPV: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/triangle.frag.spv"));

const CLEAR_COLOR: [f32; 4] = [0.0, 0.0, 0.2, 1.0];

/// Data unique to each vertex passed into the vertex buffer
#[repr(C)]
#[derive(Debug, Default, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub color: [f32; 3],
}

impl Vertex {
    pub fn binding_descriptions() -> [vk::VertexInputBindingDescription; 1] {
        [vk::VertexInputBindingDescription {
            binding: 0,
            stride: size_of::<Vertex>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }]
    }

    pub fn attribute_descriptions() -> [vk::VertexInputAttributeDescription; 2] {
        [
            vk::VertexInputAttributeDescription {
                location: 0,
                binding: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: offset_of!(Vertex, position) as u32,
            },
            vk::VertexInputAttributeDescription {
                location: 1,
                binding: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: offset_of!(Vertex, color) as u32,
            },
        ]
    }
}

/// Data unique to each frame passed into the uniform buffer
#[repr(C)]
#[derive(Debug, Default, Copy, Clone, Pod, Zeroable)]
pub struct ShaderData {
    pub viewproj: Mat4,
    pub model: Mat4,
}

pub const VERTICES: [Vertex; 3] = [
    Vertex { position: [1.0, 1.0, 0.0], color: [1.0, 0.0, 0.0] },
    Vertex { position: [-1.0, 1.0, 0.0], color: [0.0, 1.0, 0.0] },
    Vertex { position: [0.0, -1.0, 0.0], color: [0.0, 0.0, 1.0] },
];

pub const INDICES: [u32; 3] = [0, 1, 2];

// Fields drop top to bottom: the pipeline before its layout, the sets with their pool.
struct TriangleResources {
    pipeline: GraphicsPipeline,
    descriptor_sets: Vec<vk::DescriptorSet>,
    _descriptor_pool: DescriptorPool,
    _set_layout: DescriptorSetLayout,
    uniform_buffers: Vec<Buffer>,
    index_buffer: Buffer,
    vertex_buffer: Buffer,
}

/// Indexed, vertex colored triangle seen through an orbiting camera. Needs
/// Vulkan 1.3 because the uploads synchronize with `vkCmdPipelineBarrier2`.
pub struct TrianglePayload {
    camera: Camera,
    animate: bool,
    angle: f32,
    vulkan13_features: vk::PhysicalDeviceVulkan13Features<'static>,
    resources: Option<TriangleResources>,
}

impl TrianglePayload {
    pub fn new() -> Self {
        let mut camera = Camera::new(1.0);
        camera.set_position(Vec3::new(0.0, 0.0, 2.5));
        camera.look_at(camera.get_pivot());

        Self {
            camera,
            animate: true,
            angle: 0.0,
            vulkan13_features: vk::PhysicalDeviceVulkan13Features::default(),
            resources: None,
        }
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    /// Uniform contents for the next frame. The model spins around the y axis
    /// once per animation timer period.
    pub fn shader_data(&self) -> ShaderData {
        ShaderData {
            viewproj: self.camera.get_viewproj_mat(),
            model: Mat4::from_rotation_y(self.angle),
        }
    }

    fn create_resources(&self, ctx: &PayloadContext) -> Result<TriangleResources> {
        let vertex_buffer = upload_buffer(
            ctx,
            &VERTICES,
            vk::BufferUsageFlags::VERTEX_BUFFER,
            vk::AccessFlags2::VERTEX_ATTRIBUTE_READ,
        )?;
        let index_buffer = upload_buffer(
            ctx,
            &INDICES,
            vk::BufferUsageFlags::INDEX_BUFFER,
            vk::AccessFlags2::INDEX_READ,
        )?;

        let uniform_buffers = (0..ctx.frames_in_flight)
            .map(|_| Buffer::new(
                ctx.device,
                ctx.accelerator,
                size_of::<ShaderData>() as u64,
                vk::BufferUsageFlags::UNIFORM_BUFFER,
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            ))
            .collect::<Result<Vec<_>>>()?;

        let layout_builder = DescriptorSetLayoutBuilder::new()
            .add_binding(0, vk::DescriptorType::UNIFORM_BUFFER, 1, vk::ShaderStageFlags::VERTEX);
        let set_layout = layout_builder.build(ctx.device)?;
        let set_count = ctx.frames_in_flight as u32;
        let descriptor_pool = DescriptorPool::new(ctx.device, &layout_builder.pool_sizes(set_count), set_count)?;
        let descriptor_sets = descriptor_pool.allocate(&set_layout, ctx.frames_in_flight)?;

        for (set, buffer) in descriptor_sets.iter().zip(&uniform_buffers) {
            let buffer_info = [vk::DescriptorBufferInfo {
                buffer: buffer.handle,
                offset: 0,
                range: size_of::<ShaderData>() as u64,
            }];
            let write = vk::WriteDescriptorSet::default()
                .dst_set(*set)
                .dst_binding(0)
                .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                .buffer_info(&buffer_info);
            unsafe {
                ctx.device.update_descriptor_sets(&[write], &[]);
            }
        }

        // Modules are only needed while the pipeline is created
        let shader = GraphicsShader::new(ctx.device, "triangle", TRIANGLE_VERT_SPV, TRIANGLE_FRAG_SPV)?;
        let set_layouts = [set_layout.handle];
        let vertex_bindings = Vertex::binding_descriptions();
        let vertex_attributes = Vertex::attribute_descriptions();
        let pipeline = GraphicsPipeline::new(ctx.device, &shader, &GraphicsPipelineDesc {
            render_pass: ctx.render_pass,
            set_layouts: &set_layouts,
            vertex_bindings: &vertex_bindings,
            vertex_attributes: &vertex_attributes,
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            cull_mode: vk::CullModeFlags::NONE,
            depth_test: true,
        })?;

        Ok(TriangleResources {
            pipeline,
            descriptor_sets,
            _descriptor_pool: descriptor_pool,
            _set_layout: set_layout,
            uniform_buffers,
            index_buffer,
            vertex_buffer,
        })
    }
}

impl Default for TrianglePayload {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderPayload for TrianglePayload {
    fn api_version(&self) -> u32 {
        vk::API_VERSION_1_3
    }

    fn extend_device_info<'a>(&'a mut self, info: vk::DeviceCreateInfo<'a>) -> vk::DeviceCreateInfo<'a> {
        self.vulkan13_features = vk::PhysicalDeviceVulkan13Features::default()
            .synchronization2(true);
        info.push_next(&mut self.vulkan13_features)
    }

    fn prepare(&mut self, ctx: &PayloadContext) -> Result<()> {
        self.camera.update_aspect_ratio(ctx.extent.width, ctx.extent.height);
        self.resources = Some(self.create_resources(ctx)?);
        log::debug!(
            "Triangle payload on {} ({:?} / {:?}), {} uniform buffers",
            ctx.accelerator.name(),
            ctx.color_format,
            ctx.depth_format,
            ctx.frames_in_flight,
        );
        Ok(())
    }

    fn record_frame(
        &mut self,
        cmd: vk::CommandBuffer,
        image_index: u32,
        ctx: &PayloadContext,
    ) -> Result<()> {
        if self.animate {
            self.angle = ctx.timing.timer * TAU;
        }
        let shader_data = self.shader_data();

        let resources = self.resources
            .as_mut()
            .ok_or_eyre("Triangle payload was not prepared")?;
        let framebuffer = *ctx.framebuffers
            .get(image_index as usize)
            .ok_or_eyre("No framebuffer for the acquired swapchain image")?;
        let descriptor_set = *resources.descriptor_sets
            .get(ctx.frame_index)
            .ok_or_eyre("No descriptor set for the frame slot")?;
        resources.uniform_buffers
            .get_mut(ctx.frame_index)
            .ok_or_eyre("No uniform buffer for the frame slot")?
            .write(std::slice::from_ref(&shader_data), 0)?;

        let clear_values = [
            vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: CLEAR_COLOR,
                },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            },
        ];
        let render_area = vk::Rect2D {
            offset: vk::Offset2D::default(),
            extent: ctx.extent,
        };
        let render_pass_begin_info = vk::RenderPassBeginInfo::default()
            .render_pass(ctx.render_pass)
            .framebuffer(framebuffer)
            .render_area(render_area)
            .clear_values(&clear_values);
        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: ctx.extent.width as f32,
            height: ctx.extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };

        unsafe {
            let device = ctx.device;
            device.cmd_begin_render_pass(cmd, &render_pass_begin_info, vk::SubpassContents::INLINE);
            device.cmd_set_viewport(cmd, 0, &[viewport]);
            device.cmd_set_scissor(cmd, 0, &[render_area]);
            device.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                resources.pipeline.layout,
                0,
                &[descriptor_set],
                &[],
            );
            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, resources.pipeline.handle);
            device.cmd_bind_vertex_buffers(cmd, 0, &[resources.vertex_buffer.handle], &[0]);
            device.cmd_bind_index_buffer(cmd, resources.index_buffer.handle, 0, vk::IndexType::UINT32);
            device.cmd_draw_indexed(cmd, INDICES.len() as u32, 1, 0, 0, 0);
            device.cmd_end_render_pass(cmd);
        }

        Ok(())
    }

    fn on_resize(&mut self, ctx: &PayloadContext) -> Result<()> {
        self.camera.update_aspect_ratio(ctx.extent.width, ctx.extent.height);
        log::debug!("Camera aspect ratio {:.3}", self.camera.get_aspect_ratio());
        Ok(())
    }

    fn on_key(&mut self, key: KeyCode, down: bool) {
        if key == KeyCode::Space && down {
            self.animate = !self.animate;
            log::info!("Triangle rotation: {}", self.animate);
        }
    }

    fn on_mouse_drag(&mut self, delta: Vec2) {
        // Full window width is one turn, full height is half a turn
        self.camera.orbit(-delta.x * TAU, -delta.y * PI);
        log::trace!(
            "Camera at {:?} looking along {:?}",
            self.camera.get_position(),
            self.camera.get_forward(),
        );
    }

    fn release(&mut self, _device: &ash::Device) {
        self.resources = None;
    }
}

/// Copies `data` into a new device local buffer through a staging buffer.
fn upload_buffer<T: Pod>(
    ctx: &PayloadContext,
    data: &[T],
    usage: vk::BufferUsageFlags,
    dst_access: vk::AccessFlags2,
) -> Result<Buffer> {
    let size = size_of_val(data) as u64;
    let mut staging = Buffer::new(
        ctx.device,
        ctx.accelerator,
        size,
        vk::BufferUsageFlags::TRANSFER_SRC,
        vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
    )?;
    staging.write(data, 0)?;

    let buffer = Buffer::new(
        ctx.device,
        ctx.accelerator,
        size,
        usage | vk::BufferUsageFlags::TRANSFER_DST,
        vk::MemoryPropertyFlags::DEVICE_LOCAL,
    )?;

    ctx.command_pool.immediate_submit(ctx.queue, |cmd, device| {
        let region = vk::BufferCopy {
            src_offset: 0,
            dst_offset: 0,
            size,
        };
        let barriers = [vk::BufferMemoryBarrier2::default()
            .src_stage_mask(vk::PipelineStageFlags2::COPY)
            .src_access_mask(vk::AccessFlags2::TRANSFER_WRITE)
            .dst_stage_mask(vk::PipelineStageFlags2::VERTEX_INPUT)
            .dst_access_mask(dst_access)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .buffer(buffer.handle)
            .offset(0)
            .size(vk::WHOLE_SIZE)];
        let dependency_info = vk::DependencyInfo::default()
            .buffer_memory_barriers(&barriers);
        unsafe {
            device.cmd_copy_buffer(cmd, staging.handle, buffer.handle, &[region]);
            device.cmd_pipeline_barrier2(cmd, &dependency_info);
        }
        Ok(())
    })?;

    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use std::ffi::c_void;
    use glam::Vec4;
    use crate::renderer::core::shader::decode_spirv;
    use super::*;

    #[test]
    fn vertex_layout_matches_shader_inputs() {
        let [binding] = Vertex::binding_descriptions();
        assert_eq!(binding.stride, 24);

        let attributes = Vertex::attribute_descriptions();
        assert_eq!((attributes[0].location, attributes[0].offset), (0, 0));
        assert_eq!((attributes[1].location, attributes[1].offset), (1, 12));
        assert!(attributes.iter().all(|attr| attr.format == vk::Format::R32G32B32_SFLOAT));
        assert_eq!(bytemuck::cast_slice::<Vertex, u8>(&VERTICES).len(), 72);
    }

    #[test]
    fn uniform_block_is_two_matrices() {
        assert_eq!(size_of::<ShaderData>(), 128);
        assert_eq!(offset_of!(ShaderData, model), 64);
    }

    #[test]
    fn embedded_shaders_are_spirv() {
        for (name, bytes) in [("vert", TRIANGLE_VERT_SPV), ("frag", TRIANGLE_FRAG_SPV)] {
            let words = decode_spirv(name, bytes).unwrap();
            assert_eq!(words[0], 0x0723_0203, "{name}");
        }
    }

    #[test]
    fn triangle_is_in_front_of_the_default_camera() {
        let payload = TrianglePayload::new();
        let data = payload.shader_data();

        for vertex in VERTICES {
            let [x, y, z] = vertex.position;
            let clip = data.viewproj * data.model * Vec4::new(x, y, z, 1.0);
            assert!(clip.w > 0.0);
            let ndc = clip / clip.w;
            assert!(ndc.x.abs() <= 1.0 && ndc.y.abs() <= 1.0, "{ndc:?}");
            assert!((0.0..=1.0).contains(&ndc.z));
        }
    }

    #[test]
    fn viewproj_follows_the_camera() {
        let mut payload = TrianglePayload::new();
        let before = payload.shader_data().viewproj;

        payload.on_mouse_drag(Vec2::new(0.25, 0.0));

        assert_eq!(payload.shader_data().viewproj, payload.camera().get_viewproj_mat());
        assert_ne!(payload.shader_data().viewproj, before);
    }

    #[test]
    fn dragging_orbits_the_camera() {
        let mut payload = TrianglePayload::new();
        let before = payload.camera().get_position();

        payload.on_mouse_drag(Vec2::new(0.25, 0.0));

        let after = payload.camera().get_position();
        assert!(before.distance(after) > 1.0);
        assert!((before.length() - after.length()).abs() < 1e-4);
    }

    #[test]
    fn space_toggles_rotation() {
        let mut payload = TrianglePayload::new();
        payload.on_key(KeyCode::Space, true);
        assert!(!payload.animate);
        payload.on_key(KeyCode::Space, false);
        assert!(!payload.animate);
        payload.on_key(KeyCode::Space, true);
        assert!(payload.animate);
    }

    #[test]
    fn requires_vulkan_1_3_without_stencil() {
        let payload = TrianglePayload::default();
        assert_eq!(payload.api_version(), vk::API_VERSION_1_3);
        assert!(!payload.requires_stencil());
        assert!(payload.enabled_instance_extensions().is_empty());
    }

    #[test]
    fn device_info_chains_vulkan_1_3_features() {
        let mut payload = TrianglePayload::new();

        let p_next = payload.extend_device_info(vk::DeviceCreateInfo::default()).p_next;

        let features = std::ptr::addr_of!(payload.vulkan13_features).cast::<c_void>();
        assert_eq!(p_next, features);
        assert_eq!(payload.vulkan13_features.s_type, vk::StructureType::PHYSICAL_DEVICE_VULKAN_1_3_FEATURES);
        assert_eq!(payload.vulkan13_features.synchronization2, vk::TRUE);
        assert!(payload.vulkan13_features.p_next.is_null());
    }
}
