// =============================================================================
// HELLO TRIANGLE - Vulkan swapchain lifecycle and frame loop
// =============================================================================
//
// ARCHITECTURE OVERVIEW:
// ┌─────────────────────────────────────────────────────────────────┐
// │  winit App (window, events)                                     │
// │    └── FrameLoop (acquire / submit / present / rebuild)         │
// │          └── Presenter (swapchain, pipeline, command buffers)   │
// │                └── VulkanDevice (instance, surface, queues)     │
// └─────────────────────────────────────────────────────────────────┘
//
// Window events are turned into `SurfaceEvent`s and queued; the frame loop
// drains them between frames.
//
// =============================================================================

mod backend;
mod config;
mod stats;

use anyhow::{Context, Result};
use ash::vk;
use backend::{
    FrameLoop, FrameOutcome, Presenter, RendererConfig, RendererError, SurfaceEvent, VulkanDevice,
};
use config::Config;
use stats::FpsCounter;
use std::process::ExitCode;
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::time::Instant;
use winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    window::{Window, WindowAttributes},
};

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> ExitCode {
    init_logging();

    match run(Config::load()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(config: Config) -> Result<()> {
    log::info!("Starting {}", config.window.title);
    log::info!(
        "Window: {}x{}, frame cap {}",
        config.window.width,
        config.window.height,
        if config.graphics.frame_cap { "on" } else { "off" }
    );

    let event_loop = EventLoop::new().context("Failed to create event loop")?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    app.shutdown()
}

fn init_logging() {
    use env_logger::Builder;
    use log::LevelFilter;

    let mut builder = Builder::from_default_env();
    builder.filter_level(LevelFilter::Info);
    if let Ok(filter) = std::env::var("RUST_LOG") {
        builder.parse_filters(&filter);
    }
    builder.init();
}

fn to_extent(size: PhysicalSize<u32>) -> vk::Extent2D {
    vk::Extent2D {
        width: size.width,
        height: size.height,
    }
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

/// IMPORTANT: Field order matters for Drop! The frame loop holds device
/// clones, and the surface inside the device must go before the window.
struct App {
    config: Config,
    renderer_config: RendererConfig,

    frames: Option<FrameLoop<Presenter>>,
    events: Option<Sender<SurfaceEvent>>,
    device: Option<Arc<VulkanDevice>>,
    window: Option<Arc<Window>>,

    fps: FpsCounter,
    /// First fatal error; reported after the event loop returns
    error: Option<anyhow::Error>,
}

impl App {
    fn new(config: Config) -> Self {
        let renderer_config = config.renderer_config();
        Self {
            config,
            renderer_config,
            frames: None,
            events: None,
            device: None,
            window: None,
            fps: FpsCounter::new(Instant::now()),
            error: None,
        }
    }

    // =========================================================================
    // INITIALIZATION
    // =========================================================================

    fn create_window(&self, event_loop: &ActiveEventLoop) -> Result<Arc<Window>> {
        let window = &self.config.window;
        let attributes = WindowAttributes::default()
            .with_title(&window.title)
            .with_inner_size(PhysicalSize::new(window.width, window.height))
            .with_min_inner_size(PhysicalSize::new(window.min_width, window.min_height))
            .with_max_inner_size(PhysicalSize::new(window.max_width, window.max_height));

        let window = event_loop
            .create_window(attributes)
            .map_err(|e| RendererError::Window(e.to_string()))?;
        Ok(Arc::new(window))
    }

    fn init_vulkan(&mut self, window: &Arc<Window>) -> Result<()> {
        log::info!("Initializing Vulkan...");

        let device = VulkanDevice::new(&self.config.window.title, &**window, &self.renderer_config)?;
        let presenter = Presenter::new(
            device.clone(),
            &self.renderer_config,
            to_extent(window.inner_size()),
        )?;

        log::info!(
            "Presenting {:?} with {:?}",
            presenter.extent(),
            presenter.present_mode()
        );

        let frames = FrameLoop::new(presenter);
        log::info!("{} frame(s) in flight", frames.frames_in_flight());
        self.events = Some(frames.event_sender());
        self.frames = Some(frames);
        self.device = Some(device);

        log::info!("Vulkan initialized successfully!");
        Ok(())
    }

    // =========================================================================
    // RENDER LOOP
    // =========================================================================

    fn send(&self, event: SurfaceEvent) {
        if let Some(events) = &self.events {
            // Receiver lives in the frame loop; gone means we are shutting down
            let _ = events.send(event);
        }
    }

    /// Drain queued events; exits the event loop once close was requested
    fn pump_events(&mut self, event_loop: &ActiveEventLoop) -> bool {
        let Some(frames) = self.frames.as_mut() else {
            return false;
        };
        if frames.pump_events() {
            return true;
        }

        log::info!("Close requested, shutting down...");
        if let Err(e) = frames.finish() {
            self.fail(event_loop, e.into());
        } else {
            event_loop.exit();
        }
        false
    }

    fn redraw(&mut self, event_loop: &ActiveEventLoop) {
        if !self.pump_events(event_loop) {
            return;
        }
        let (Some(frames), Some(window)) = (self.frames.as_mut(), self.window.as_ref()) else {
            return;
        };

        match frames.draw_frame(to_extent(window.inner_size())) {
            Ok(FrameOutcome::Presented) | Ok(FrameOutcome::PresentedAndRebuilt) => {
                self.update_fps();
            }
            Ok(FrameOutcome::Rebuilt) | Ok(FrameOutcome::Skipped) => {}
            Err(e) => self.fail(event_loop, e.into()),
        }
    }

    fn update_fps(&mut self) {
        let Some(report) = self.fps.frame(Instant::now()) else {
            return;
        };

        log::info!("{:.0} FPS ({:.2}ms)", report.fps, report.frame_ms);

        if self.config.debug.show_fps {
            if let Some(window) = &self.window {
                window.set_title(&format!(
                    "{} - {:.0} FPS ({:.2}ms)",
                    self.config.window.title, report.fps, report.frame_ms
                ));
            }
        }
    }

    // =========================================================================
    // ERRORS & SHUTDOWN
    // =========================================================================

    fn fail(&mut self, event_loop: &ActiveEventLoop, error: anyhow::Error) {
        log::error!("Fatal: {:#}", error);
        if self.error.is_none() {
            self.error = Some(error);
        }
        event_loop.exit();
    }

    /// Release GPU resources in order and surface any stored error
    fn shutdown(mut self) -> Result<()> {
        if let Some(frames) = self.frames.as_mut() {
            if let Err(e) = frames.finish() {
                log::error!("{}", e);
            }
            log::info!(
                "Rebuilt the swapchain {} time(s), final extent {:?}",
                frames.rebuild_count(),
                frames.backend().extent()
            );
        }
        self.release();

        match self.error.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn release(&mut self) {
        if self.frames.is_none() && self.device.is_none() {
            return;
        }
        log::info!("Cleaning up Vulkan resources...");
        self.events = None;
        self.frames = None;
        self.device = None;
        log::info!("Cleanup complete");
    }
}

// =============================================================================
// EVENT HANDLING
// =============================================================================

impl ApplicationHandler for App {
    /// Called when the application is ready to create windows.
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let window = match self.create_window(event_loop) {
            Ok(window) => window,
            Err(e) => return self.fail(event_loop, e),
        };

        if let Err(e) = self.init_vulkan(&window) {
            return self.fail(event_loop, e.context("Failed to initialize Vulkan"));
        }

        self.window = Some(window);
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                self.send(SurfaceEvent::CloseRequested);
                self.pump_events(event_loop);
            }

            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);
                self.send(SurfaceEvent::Resized);
            }

            WindowEvent::RedrawRequested => self.redraw(event_loop),

            WindowEvent::KeyboardInput { event, .. } => {
                use winit::keyboard::{KeyCode, PhysicalKey};

                if event.state.is_pressed() && event.physical_key == PhysicalKey::Code(KeyCode::Escape) {
                    log::info!("ESC pressed, exiting...");
                    self.send(SurfaceEvent::CloseRequested);
                    self.pump_events(event_loop);
                }
            }

            _ => {}
        }
    }

    /// Redraw continuously, but sleep while the window has no area
    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        let Some(window) = &self.window else {
            return;
        };

        let size = window.inner_size();
        if size.width == 0 || size.height == 0 {
            event_loop.set_control_flow(ControlFlow::Wait);
        } else {
            event_loop.set_control_flow(ControlFlow::Poll);
            window.request_redraw();
        }
    }
}

impl Drop for App {
    fn drop(&mut self) {
        self.release();
    }
}
