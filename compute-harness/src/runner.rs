//! # Harness Loop
//!
//! Drives the dispatch/readback cycle. A windowed run is a winit
//! [`ApplicationHandler`]: the window, context, program and image are created
//! when the event loop resumes, and every `RedrawRequested` runs one
//! iteration:
//!
//! 1. exit if Escape was pressed, the window was closed or the frame budget
//!    is spent
//! 2. dispatch the program and wait for it ([`dispatch_and_barrier`])
//! 3. read the image back and print it
//! 4. print the driver error code collected since the previous iteration
//! 5. present a frame and request the next redraw
//!
//! Setup failures end the event loop and are returned from [`Harness::run`].
//! Driver errors during the loop are printed and the loop continues, unless
//! [`HarnessConfig::max_consecutive_driver_errors`] is set.
//!
//! ## Usage
//!
//! ```no_run
//! use compute_harness::{Harness, HarnessConfig};
//!
//! # fn main() -> Result<(), compute_harness::HarnessError> {
//! Harness::run(HarnessConfig {
//!     max_frames: Some(10),
//!     ..Default::default()
//! })?;
//! # Ok(())
//! # }
//! ```

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use tracing::{debug, info};
use winit::{
    application::ApplicationHandler,
    dpi::LogicalSize,
    event::{ElementState, KeyEvent, WindowEvent},
    event_loop::{ActiveEventLoop, EventLoop},
    keyboard::{Key, NamedKey},
    window::{Window, WindowId},
};

use crate::{
    config::{DispatchExtent, HarnessConfig},
    context::{ContextHooks, GpuContext},
    dispatch::dispatch_and_barrier,
    error::{ContextCreationError, DriverErrorCode, HarnessError},
    image::ImageResource,
    limits::WorkGroupLimits,
    program::ComputeProgram,
    report,
};

/// Everything one iteration needs, built once at startup.
pub struct Session {
    ctx: GpuContext,
    program: ComputeProgram,
    image: ImageResource,
    extent: DispatchExtent,
}

impl Session {
    /// Queries limits, checks the extent, loads the program, creates the
    /// image and prints its initial contents.
    #[tracing::instrument(level = "info", skip(ctx, config))]
    pub fn start(
        ctx: GpuContext,
        config: &HarnessConfig,
        shader_path: &Path,
    ) -> Result<Self, HarnessError> {
        let limits = WorkGroupLimits::query(&ctx);
        info!("{limits}");
        report::print_limits(&limits);

        let extent = config.image_size.dispatch_extent();
        limits.check_extent(extent)?;
        ImageResource::check_size(config.image_size, &ctx.device().limits())?;

        let program = ComputeProgram::load(&ctx, shader_path)?;
        let image = ImageResource::create(&ctx, config.image_size, config.fill_value);
        report::print_texels(&image.read(&ctx)?);

        Ok(Self {
            ctx,
            program,
            image,
            extent,
        })
    }

    /// Runs one dispatch/readback iteration and returns the driver error
    /// code observed since the previous one.
    pub fn step(&self) -> Result<DriverErrorCode, HarnessError> {
        dispatch_and_barrier(&self.ctx, &self.program, &self.image, self.extent)?;
        let texels = self.image.read(&self.ctx)?;
        report::print_texels(&texels);
        let code = self.ctx.errors().take();
        report::print_driver_error(code);
        Ok(code)
    }

    pub fn context(&self) -> &GpuContext {
        &self.ctx
    }
}

/// Counts consecutive iterations that reported a driver error.
#[derive(Debug, Clone, Default)]
pub struct ErrorStreak {
    limit: Option<u32>,
    count: u32,
}

impl ErrorStreak {
    pub fn new(limit: Option<u32>) -> Self {
        Self { limit, count: 0 }
    }

    /// Fails once the streak reaches the configured limit.
    pub fn observe(&mut self, code: DriverErrorCode) -> Result<(), HarnessError> {
        if !code.is_error() {
            self.count = 0;
            return Ok(());
        }
        self.count += 1;
        match self.limit {
            Some(limit) if self.count >= limit => Err(HarnessError::PersistentDriverErrors {
                count: self.count,
                last: code,
            }),
            _ => Ok(()),
        }
    }
}

/// Windowed harness state driven by the winit event loop.
pub struct Harness {
    config: HarnessConfig,
    hooks: ContextHooks,
    shader_path: PathBuf,
    session: Option<Session>,
    streak: ErrorStreak,
    frames: u64,
    close_requested: bool,
    fatal: Option<HarnessError>,
}

impl Harness {
    /// Runs the harness with default hooks.
    pub fn run(config: HarnessConfig) -> Result<(), HarnessError> {
        Self::run_with_hooks(config, ContextHooks::default())
    }

    /// Runs the harness until the window closes, Escape is pressed, the
    /// frame budget is spent, or a fatal error occurs.
    #[tracing::instrument(level = "info", skip_all)]
    pub fn run_with_hooks(config: HarnessConfig, hooks: ContextHooks) -> Result<(), HarnessError> {
        config.validate()?;
        let shader_path = config.resolve_shader_path()?;
        if config.headless {
            return run_headless(&config, hooks, &shader_path);
        }

        let event_loop = EventLoop::new().map_err(ContextCreationError::from)?;
        let mut harness = Self {
            streak: ErrorStreak::new(config.max_consecutive_driver_errors),
            config,
            hooks,
            shader_path,
            session: None,
            frames: 0,
            close_requested: false,
            fatal: None,
        };
        event_loop
            .run_app(&mut harness)
            .map_err(ContextCreationError::from)?;

        match harness.fatal.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn start_session(&self, event_loop: &ActiveEventLoop) -> Result<Session, HarnessError> {
        let [width, height] = self.config.window_size;
        let attributes = Window::default_attributes()
            .with_title(&self.config.window_title)
            .with_inner_size(LogicalSize::new(width, height));
        let window = event_loop
            .create_window(attributes)
            .map_err(ContextCreationError::from)?;
        let ctx = GpuContext::initialize(Arc::new(window), self.hooks.clone())?;
        Session::start(ctx, &self.config, &self.shader_path)
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, err: HarnessError) {
        debug!("Stopping on fatal error: {err}");
        self.fatal = Some(err);
        event_loop.exit();
    }

    fn stop_requested(&self) -> bool {
        should_stop(self.close_requested, self.frames, self.config.max_frames)
    }

    fn stop(&self, event_loop: &ActiveEventLoop) {
        debug!("Stopping after {} iterations", self.frames);
        event_loop.exit();
    }

    fn handle_redraw_requested(&mut self, event_loop: &ActiveEventLoop) {
        if self.stop_requested() {
            self.stop(event_loop);
            return;
        }
        let Some(session) = self.session.as_ref() else {
            return;
        };
        if let Err(err) = session.step().and_then(|code| self.streak.observe(code)) {
            self.fail(event_loop, err);
            return;
        }
        self.frames += 1;

        if self.stop_requested() {
            self.stop(event_loop);
            return;
        }
        if let Some(session) = self.session.as_mut() {
            session.ctx.present_frame();
            session.ctx.request_redraw();
        }
    }
}

impl ApplicationHandler for Harness {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.session.is_some() {
            return;
        }
        match self.start_session(event_loop) {
            Ok(session) => {
                session.ctx.request_redraw();
                self.session = Some(session);
            }
            Err(err) => self.fail(event_loop, err),
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                debug!("Close requested");
                self.close_requested = true;
                // Nothing will redraw a closing window, so stop here.
                event_loop.exit();
            }
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        logical_key: Key::Named(NamedKey::Escape),
                        state: ElementState::Pressed,
                        ..
                    },
                ..
            } => {
                debug!("Escape pressed");
                self.close_requested = true;
            }
            WindowEvent::Resized(size) => {
                if let Some(session) = self.session.as_mut() {
                    session.ctx.resize(size);
                }
            }
            WindowEvent::RedrawRequested => self.handle_redraw_requested(event_loop),
            _ => (),
        }
    }
}

/// Whether the loop must end before running another iteration.
fn should_stop(close_requested: bool, frames: u64, max_frames: Option<u64>) -> bool {
    close_requested || max_frames.is_some_and(|max_frames| frames >= max_frames)
}

fn run_headless(
    config: &HarnessConfig,
    hooks: ContextHooks,
    shader_path: &Path,
) -> Result<(), HarnessError> {
    let ctx = GpuContext::headless(hooks)?;
    let session = Session::start(ctx, config, shader_path)?;
    let mut streak = ErrorStreak::new(config.max_consecutive_driver_errors);
    let max_frames = Some(config.max_frames.unwrap_or(1));
    let mut frames = 0;
    while !should_stop(false, frames, max_frames) {
        streak.observe(session.step()?)?;
        frames += 1;
    }
    Ok(())
}
