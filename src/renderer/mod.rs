pub mod camera;
pub mod config;
pub mod core;
pub mod payload;
pub mod platform;
pub mod triangle;

use std::sync::Arc;
use ash::vk;
use color_eyre::Result;
use glam::Vec2;
use winit::keyboard::KeyCode;
use crate::renderer::config::RenderConfig;
use crate::renderer::core::attachments::{RenderPass, SurfaceAttachments};
use crate::renderer::core::device::{self, DeviceRequest, RenderDevice};
use crate::renderer::core::error::HarnessError;
use crate::renderer::core::frame::{FrameOutcome, FrameScheduler, MAX_FRAMES_IN_FLIGHT};
use crate::renderer::core::instance::RenderInstance;
use crate::renderer::core::resize::{self, ChainInfo, ResizeAction, ResizeCoordinator, ResizeTarget};
use crate::renderer::core::swapchain::{AcquireOutcome, SurfaceState, Swapchain};
use crate::renderer::core::target::{RenderSurface, RenderTarget};
use crate::renderer::payload::{FrameTiming, PayloadContext, RenderPayload};
use crate::renderer::platform::PlatformWindow;

pub struct Renderer {
    resize: ResizeCoordinator,
    core: RenderCore,
}

impl Renderer {
    pub fn new(
        window: Arc<dyn PlatformWindow>,
        config: RenderConfig,
        mut payload: Box<dyn RenderPayload>,
    ) -> Result<Self> {
        let instance = RenderInstance::new(
            Some(window.as_ref()),
            config.validation,
            config.validation_log.as_deref(),
            payload.api_version(),
            &payload.enabled_instance_extensions(),
        )?;

        let accelerator = device::select_accelerator(
            instance.enumerate_accelerators()?,
            config.gpu,
        )?;

        let surface = RenderSurface::new(&instance, window.as_ref())?;
        let present_family = surface.present_queue_family(&accelerator)?;

        let request = DeviceRequest {
            api_version: payload.api_version(),
            queues: vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE,
            features: payload.enabled_features(&accelerator)?,
            extensions: payload.enabled_extensions(&accelerator),
            present_family: Some(present_family),
            requires_stencil: payload.requires_stencil(),
        };
        let device = RenderDevice::new(&instance.instance, accelerator, &request, payload.as_mut())?;

        let (width, height) = window.client_size();
        let target = RenderTarget::new(&instance, surface, &device, &config, width, height)?;
        let render_pass = RenderPass::new(&device, target.surface_format.format, device.depth_format)?;
        let attachments = SurfaceAttachments::new(&device, &render_pass, &target.swapchain)?;
        let scheduler = FrameScheduler::new(&device, MAX_FRAMES_IN_FLIGHT, config.fence_timeout)?;

        let chain = chain_info(&target.swapchain);
        let mut core = RenderCore {
            payload,
            scheduler,
            attachments,
            render_pass,
            target,
            device,
            _instance: instance,
            window,
            config,
            timing: FrameTiming::default(),
        };
        core.prepare_payload()?;

        Ok(Self {
            resize: ResizeCoordinator::new(chain),
            core,
        })
    }

    pub fn request_resize(&mut self, width: u32, height: u32) {
        self.resize.request(width, height);
    }

    pub fn on_key(&mut self, key: KeyCode, down: bool) {
        self.core.payload.on_key(key, down);
    }

    /// Forwards a left button drag, given in pixels, to the payload.
    pub fn on_mouse_drag(&mut self, delta: Vec2) {
        let extent = self.resize.chain().extent;
        if extent.width == 0 || extent.height == 0 {
            return;
        }
        self.core.payload.on_mouse_drag(delta / Vec2::new(extent.width as f32, extent.height as f32));
    }

    pub fn device_name(&self) -> String {
        self.core.device.accelerator.name()
    }

    pub fn frame_counter(&self) -> u64 {
        self.core.scheduler.ring().frame_counter()
    }

    /// Renders and presents one frame, resizing first when needed.
    pub fn draw(&mut self, timing: FrameTiming) -> Result<()> {
        self.core.timing = timing;

        if self.core.window.is_minimized() {
            return Ok(());
        }

        let action = self.resize.before_frame();
        self.apply_resize(action)?;
        if !self.resize.is_ready() {
            return Ok(());
        }

        let outcome = self.core.render_frame()?;
        match outcome {
            FrameOutcome::Presented(SurfaceState::Valid) => {}
            FrameOutcome::Presented(state) => log::debug!("Presented to a {:?} surface", state),
            FrameOutcome::Stale => log::debug!("Surface went out of date before rendering"),
            FrameOutcome::Skipped => log::debug!("Timed out waiting for the GPU, skipping frame"),
        }
        self.apply_resize(resize::resize_after_frame(outcome))
    }

    fn apply_resize(&mut self, action: ResizeAction) -> Result<()> {
        let (width, height) = match action {
            ResizeAction::Keep => return Ok(()),
            ResizeAction::Resize { width, height } => (width, height),
            ResizeAction::ResizeToWindow => self.core.window.client_size(),
        };
        self.resize.resize(&mut self.core, width, height)?;
        Ok(())
    }
}

/// Headless instance just to print the available devices.
pub fn list_accelerators(validation: bool) -> Result<Vec<String>> {
    let instance = RenderInstance::new(None, validation, None, vk::API_VERSION_1_0, &[])?;
    Ok(device::describe_accelerators(&instance.enumerate_accelerators()?))
}

// Fields drop top to bottom, so each object goes before what it was created from.
struct RenderCore {
    payload: Box<dyn RenderPayload>,
    scheduler: FrameScheduler,
    attachments: SurfaceAttachments,
    render_pass: RenderPass,
    target: RenderTarget,
    device: RenderDevice,
    // Only dropped, after everything created from it
    _instance: RenderInstance,
    window: Arc<dyn PlatformWindow>,
    config: RenderConfig,
    timing: FrameTiming,
}

impl RenderCore {
    fn prepare_payload(&mut self) -> Result<()> {
        let ctx = payload_context(
            &self.device,
            &self.target,
            &self.render_pass,
            &self.attachments,
            &self.scheduler,
            self.scheduler.ring().frame_index(),
            self.timing,
        );
        self.payload.prepare(&ctx)
    }

    fn render_frame(&mut self) -> Result<FrameOutcome> {
        let slot = match self.scheduler.begin_frame() {
            Ok(slot) => slot,
            Err(HarnessError::Timeout) => return Ok(FrameOutcome::Skipped),
            Err(err) => return Err(err.into()),
        };

        let image_available = self.scheduler.slot(slot).image_available.handle;
        let acquired = match self.target.swapchain.acquire_next_image(
            image_available,
            self.config.acquire_timeout,
        ) {
            Ok(acquired) => acquired,
            Err(HarnessError::Timeout) => {
                self.scheduler.abandon_frame()?;
                return Ok(FrameOutcome::Skipped);
            }
            Err(err) => return Err(err.into()),
        };
        let (image_index, acquire_state) = match acquired {
            AcquireOutcome::Acquired { image_index, state } => (image_index, state),
            AcquireOutcome::OutOfDate => {
                self.scheduler.abandon_frame()?;
                return Ok(FrameOutcome::Stale);
            }
        };

        let ctx = payload_context(
            &self.device,
            &self.target,
            &self.render_pass,
            &self.attachments,
            &self.scheduler,
            slot,
            self.timing,
        );
        let payload = &mut self.payload;
        self.scheduler.record_into(|cmd| payload.record_frame(cmd, image_index, &ctx))?;
        self.scheduler.submit()?;

        let render_complete = self.scheduler.slot(slot).render_complete.handle;
        let present_state = self.target.swapchain.present(
            self.device.graphics_queue.handle,
            image_index,
            render_complete,
        )?;
        self.scheduler.advance();

        let state = if present_state == SurfaceState::Valid {
            acquire_state
        } else {
            present_state
        };
        Ok(FrameOutcome::Presented(state))
    }
}

impl ResizeTarget for RenderCore {
    fn wait_idle(&mut self) -> Result<()> {
        self.device.wait_idle()
    }

    fn recreate_surface_resources(&mut self, width: u32, height: u32) -> Result<ChainInfo> {
        let swapchain = self.target.create_replacement(&self.device, width, height)?;
        let attachments = SurfaceAttachments::new(&self.device, &self.render_pass, &swapchain)?;

        // Old framebuffers reference the old image views
        self.attachments = attachments;
        self.target.swapchain = swapchain;

        Ok(chain_info(&self.target.swapchain))
    }

    fn recreate_frame_slots(&mut self, reallocate_command_buffers: bool) -> Result<()> {
        self.scheduler.recreate(&self.device.command_pool, reallocate_command_buffers)
    }

    fn surface_resized(&mut self, _extent: vk::Extent2D) -> Result<()> {
        let ctx = payload_context(
            &self.device,
            &self.target,
            &self.render_pass,
            &self.attachments,
            &self.scheduler,
            self.scheduler.ring().frame_index(),
            self.timing,
        );
        self.payload.on_resize(&ctx)
    }
}

impl Drop for RenderCore {
    fn drop(&mut self) {
        if let Err(err) = self.device.wait_idle() {
            log::error!("Failed to wait for the device before shutdown: {}", err);
        }
        self.payload.release(&self.device.logical);
    }
}

fn chain_info(swapchain: &Swapchain) -> ChainInfo {
    ChainInfo {
        extent: swapchain.extent,
        image_count: swapchain.image_count(),
        format: swapchain.format.format,
    }
}

fn payload_context<'a>(
    device: &'a RenderDevice,
    target: &RenderTarget,
    render_pass: &RenderPass,
    attachments: &'a SurfaceAttachments,
    scheduler: &FrameScheduler,
    frame_index: usize,
    timing: FrameTiming,
) -> PayloadContext<'a> {
    PayloadContext {
        device: &device.logical,
        accelerator: &device.accelerator,
        command_pool: &device.command_pool,
        queue: device.graphics_queue.handle,
        render_pass: render_pass.handle,
        framebuffers: &attachments.framebuffers,
        extent: target.extent(),
        color_format: target.surface_format.format,
        depth_format: device.depth_format,
        frame_index,
        frames_in_flight: scheduler.ring().len(),
        timing,
    }
}
