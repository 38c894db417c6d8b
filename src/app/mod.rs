mod benchmark;
mod cli;
mod input_state;
mod timer;

pub use cli::Cli;

use std::sync::Arc;
use std::time::Instant;
use color_eyre::Result;
use glam::Vec2;
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::{ElementState, KeyEvent, MouseButton, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::{Fullscreen, Window, WindowId};
use crate::app::benchmark::Benchmark;
use crate::app::input_state::InputState;
use crate::app::timer::FrameTimer;
use crate::renderer::config::RenderConfig;
use crate::renderer::core::error::HarnessError;
use crate::renderer::triangle::TrianglePayload;
use crate::renderer::Renderer;

const WINDOW_TITLE: &str = "vkframe";

pub struct App {
    config: RenderConfig,
    window: Option<Arc<Window>>,
    renderer: Option<Renderer>,

    // State
    input_state: InputState,
    timer: FrameTimer,
    benchmark: Option<Benchmark>,
    fatal: Option<color_eyre::Report>,
    close_requested: bool,
}

impl App {
    pub fn new(config: RenderConfig) -> Self {
        Self {
            config,
            window: None,
            renderer: None,

            input_state: InputState::default(),
            timer: FrameTimer::new(Instant::now()),
            benchmark: None,
            fatal: None,
            close_requested: false,
        }
    }

    pub fn run(mut self) -> Result<()> {
        let event_loop = EventLoop::new()?;
        event_loop.set_control_flow(ControlFlow::Poll);
        event_loop.run_app(&mut self)?;

        match self.fatal.take() {
            Some(report) => Err(report),
            None => Ok(()),
        }
    }

    fn create_window(&self, event_loop: &ActiveEventLoop) -> Result<Arc<Window>> {
        let mut attributes = Window::default_attributes()
            .with_title(WINDOW_TITLE)
            .with_inner_size(PhysicalSize::new(self.config.width, self.config.height));
        if self.config.fullscreen {
            attributes = attributes.with_fullscreen(Some(Fullscreen::Borderless(None)));
        }
        Ok(Arc::new(event_loop.create_window(attributes)?))
    }

    fn start(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let window = self.create_window(event_loop)?;
        let renderer = Renderer::new(
            window.clone(),
            self.config.clone(),
            Box::new(TrianglePayload::new()),
        )?;
        log::info!("Rendering on {}", renderer.device_name());

        let now = Instant::now();
        self.timer = FrameTimer::new(now);
        self.benchmark = self.config.benchmark.clone().map(|config| Benchmark::new(config, now));
        self.window = Some(window);
        self.renderer = Some(renderer);
        Ok(())
    }

    /// Keeps the first fatal error and shuts the loop down.
    fn fail(&mut self, event_loop: &ActiveEventLoop, report: color_eyre::Report) {
        log::error!("{:#}", report);
        if self.fatal.is_none() {
            self.fatal = Some(report);
        }
        self.renderer = None;
        event_loop.exit();
    }

    fn on_resize(&mut self, width: u32, height: u32) {
        if let Some(renderer) = self.renderer.as_mut() {
            renderer.request_resize(width, height);
        }
    }

    fn on_key(&mut self, key: KeyCode, down: bool) {
        match key {
            KeyCode::KeyP if down => {
                let paused = self.timer.toggle_pause();
                log::info!("Paused: {}", paused);
            }
            KeyCode::Escape if down => self.on_close(),
            _ => {
                if let Some(renderer) = self.renderer.as_mut() {
                    renderer.on_key(key, down);
                }
            }
        }
    }

    fn on_mouse_move(&mut self, x: f32, y: f32) {
        let delta = self.input_state.mouse_moved(Vec2::new(x, y));
        if !self.input_state.mouse_left_down || delta == Vec2::ZERO {
            return;
        }
        if let Some(renderer) = self.renderer.as_mut() {
            renderer.on_mouse_drag(delta);
        }
    }

    fn on_mouse_button(&mut self, button: MouseButton, down: bool) {
        self.input_state.mouse_button(button, down);
    }

    fn on_close(&mut self) {
        self.close_requested = true;
    }

    fn redraw(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let Some(renderer) = self.renderer.as_mut() else {
            return Ok(());
        };
        renderer.draw(self.timer.timing())?;
        self.input_state.reset_frame();

        let now = Instant::now();
        if let Some(fps) = self.timer.end_frame(now) {
            log::debug!("{} fps ({:.3} ms)", fps, self.timer.frame_time() * 1000.0);
            if let Some(window) = self.window.as_ref() {
                window.set_title(&format!("{} - {} - {} fps", WINDOW_TITLE, renderer.device_name(), fps));
            }
        }

        let finished = self.benchmark
            .as_mut()
            .is_some_and(|bench| bench.record_frame(now, self.timer.frame_time()));
        if finished {
            if let Some(bench) = self.benchmark.take() {
                bench.save(&renderer.device_name())?;
            }
            log::info!("Benchmark done after {} frames in total", renderer.frame_counter());
            event_loop.exit();
        }

        Ok(())
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.renderer.is_some() || self.fatal.is_some() {
            return;
        }

        if let Err(report) = self.start(event_loop) {
            self.fail(event_loop, report);
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        if self.window.as_ref().is_none_or(|window| window.id() != window_id) {
            return;
        }

        match event {
            WindowEvent::CloseRequested => self.on_close(),
            WindowEvent::Resized(size) => self.on_resize(size.width, size.height),
            WindowEvent::ScaleFactorChanged { .. } => {
                if let Some(window) = self.window.as_ref() {
                    let size = window.inner_size();
                    self.on_resize(size.width, size.height);
                }
            }
            WindowEvent::KeyboardInput {
                event: KeyEvent {
                    physical_key: PhysicalKey::Code(code),
                    state,
                    repeat: false,
                    ..
                },
                ..
            } => self.on_key(code, state == ElementState::Pressed),
            WindowEvent::CursorMoved { position, .. } => {
                self.on_mouse_move(position.x as f32, position.y as f32);
            }
            WindowEvent::MouseInput { state, button, .. } => {
                self.on_mouse_button(button, state == ElementState::Pressed);
            }
            WindowEvent::Focused(false) => self.input_state.release_all(),
            WindowEvent::RedrawRequested => {
                if let Err(report) = self.redraw(event_loop) {
                    self.fail(event_loop, report);
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.close_requested {
            event_loop.exit();
            return;
        }

        if let Some(window) = self.window.as_ref() {
            window.request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        // Drain and tear down the GPU objects while the window still exists
        self.renderer = None;
        self.window = None;
    }
}

/// Prints the devices for `--listgpus`.
pub fn list_gpus(config: &RenderConfig) -> Result<()> {
    let devices = crate::renderer::list_accelerators(config.validation)?;
    if devices.is_empty() {
        return Err(HarnessError::NoDevice.into());
    }
    for device in devices {
        println!("{}", device);
    }
    Ok(())
}
