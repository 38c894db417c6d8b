use std::ffi::CStr;
use std::sync::Arc;
use ash::vk;
use color_eyre::Result;
use glam::Vec2;
use winit::keyboard::KeyCode;
use crate::renderer::core::command::CommandPool;
use crate::renderer::core::device::Accelerator;

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FrameTiming {
    /// Seconds the previous frame took.
    pub frame_time: f32,
    /// Animation timer in [0, 1), frozen while paused.
    pub timer: f32,
    pub paused: bool,
}

/// Everything a payload may use while preparing or recording
pub struct PayloadContext<'a> {
    pub device: &'a Arc<ash::Device>,
    pub accelerator: &'a Accelerator,
    /// Graphics family pool, for one-off uploads outside the frame loop.
    pub command_pool: &'a CommandPool,
    pub queue: vk::Queue,
    pub render_pass: vk::RenderPass,
    pub framebuffers: &'a [vk::Framebuffer],
    pub extent: vk::Extent2D,
    pub color_format: vk::Format,
    pub depth_format: vk::Format,
    pub frame_index: usize,
    pub frames_in_flight: usize,
    pub timing: FrameTiming,
}

/// Draw work plugged into the frame loop
pub trait RenderPayload {
    fn api_version(&self) -> u32 {
        vk::API_VERSION_1_0
    }

    fn enabled_instance_extensions(&self) -> Vec<&'static CStr> {
        Vec::new()
    }

    /// Features to enable. May fail when the accelerator lacks something mandatory.
    fn enabled_features(&self, _accelerator: &Accelerator) -> Result<vk::PhysicalDeviceFeatures> {
        Ok(vk::PhysicalDeviceFeatures::default())
    }

    fn enabled_extensions(&self, _accelerator: &Accelerator) -> Vec<&'static CStr> {
        Vec::new()
    }

    /// Chains extension feature structs owned by the payload into device creation.
    fn extend_device_info<'a>(&'a mut self, info: vk::DeviceCreateInfo<'a>) -> vk::DeviceCreateInfo<'a> {
        info
    }

    fn requires_stencil(&self) -> bool {
        false
    }

    fn prepare(&mut self, ctx: &PayloadContext) -> Result<()>;

    /// Records into `cmd`, which is already in the recording state. The slot
    /// `ctx.frame_index` is no longer in use by the GPU.
    fn record_frame(
        &mut self,
        cmd: vk::CommandBuffer,
        image_index: u32,
        ctx: &PayloadContext,
    ) -> Result<()>;

    fn on_resize(&mut self, _ctx: &PayloadContext) -> Result<()> {
        Ok(())
    }

    fn on_key(&mut self, _key: KeyCode, _down: bool) {}

    /// Mouse movement with the left button held, as a fraction of the window size.
    fn on_mouse_drag(&mut self, _delta: Vec2) {}

    /// Destroys payload owned GPU objects. The device is idle.
    fn release(&mut self, _device: &ash::Device) {}
}
