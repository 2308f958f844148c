//! GPU context creation.
//!
//! A [`GpuContext`] bundles the wgpu instance, adapter, device and queue, the
//! optional window surface, the binding layout of the shared image and the
//! sink that collects driver errors. It is created once per run and must
//! exist before any other GPU call.

use std::{fmt, sync::Arc};

use parking_lot::Mutex;
use tracing::{error, info};
use winit::window::Window;

use crate::{
    error::{ContextCreationError, DriverErrorCode},
    image::{IMAGE_FORMAT, ImageBindingLayout},
    present::PresentTarget,
};

/// Callback receiving every driver error with its code and message.
pub type DriverErrorHook = Arc<dyn Fn(DriverErrorCode, &str) + Send + Sync>;

/// Handlers passed to context initialization.
///
/// Each context owns its hooks, so several contexts (for example in tests)
/// can report to different places.
#[derive(Clone, Default)]
pub struct ContextHooks {
    /// Receives driver diagnostics. When `None` they are logged through
    /// `tracing` at error level.
    pub on_driver_error: Option<DriverErrorHook>,
}

impl ContextHooks {
    pub fn with_driver_error(
        mut self,
        hook: impl Fn(DriverErrorCode, &str) + Send + Sync + 'static,
    ) -> Self {
        self.on_driver_error = Some(Arc::new(hook));
        self
    }
}

impl fmt::Debug for ContextHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextHooks")
            .field("on_driver_error", &self.on_driver_error.is_some())
            .finish()
    }
}

/// Holds the most recent driver error until it is taken.
///
/// Taking the error clears it, so each dispatch iteration reports only what
/// happened since the previous report.
#[derive(Debug, Clone, Default)]
pub struct ErrorSink {
    last: Arc<Mutex<Option<(DriverErrorCode, String)>>>,
}

impl ErrorSink {
    pub fn record(&self, code: DriverErrorCode, message: String) {
        *self.last.lock() = Some((code, message));
    }

    /// Returns the last error code and clears it.
    pub fn take(&self) -> DriverErrorCode {
        self.take_message()
            .map_or(DriverErrorCode::NoError, |(code, _)| code)
    }

    /// Returns the last error with its message and clears it.
    pub fn take_message(&self) -> Option<(DriverErrorCode, String)> {
        self.last.lock().take()
    }
}

/// Owns every long-lived GPU object of a harness run.
pub struct GpuContext {
    adapter: wgpu::Adapter,
    device: wgpu::Device,
    queue: wgpu::Queue,
    errors: ErrorSink,
    pub(crate) image_layout: ImageBindingLayout,
    pub(crate) present: Option<PresentTarget>,
    _instance: wgpu::Instance,
}

impl GpuContext {
    /// Creates a context that can present to `window`.
    #[tracing::instrument(level = "info", skip_all)]
    pub fn initialize(
        window: Arc<Window>,
        hooks: ContextHooks,
    ) -> Result<Self, ContextCreationError> {
        pollster::block_on(Self::new(Some(window), hooks))
    }

    /// Creates a context without a window, for tests and headless runs.
    #[tracing::instrument(level = "info", skip_all)]
    pub fn headless(hooks: ContextHooks) -> Result<Self, ContextCreationError> {
        pollster::block_on(Self::new(None, hooks))
    }

    async fn new(
        window: Option<Arc<Window>>,
        hooks: ContextHooks,
    ) -> Result<Self, ContextCreationError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });
        let surface = match &window {
            Some(window) => Some(instance.create_surface(window.clone())?),
            None => None,
        };

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: surface.as_ref(),
                force_fallback_adapter: false,
            })
            .await?;
        let adapter_info = adapter.get_info();
        info!(
            "Using adapter {} ({:?}), driver: {} {}",
            adapter_info.name, adapter_info.backend, adapter_info.driver, adapter_info.driver_info
        );
        check_compute_support(&adapter)?;

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("Compute Harness Device"),
                required_features: wgpu::Features::TEXTURE_ADAPTER_SPECIFIC_FORMAT_FEATURES,
                // Request the adapter's own limits so queries report the hardware maxima.
                required_limits: adapter.limits(),
                memory_hints: wgpu::MemoryHints::MemoryUsage,
                trace: wgpu::Trace::Off,
                experimental_features: wgpu::ExperimentalFeatures::default(),
            })
            .await?;

        let errors = ErrorSink::default();
        install_error_handler(&device, errors.clone(), hooks);

        let present = match (surface, window) {
            (Some(surface), Some(window)) => {
                Some(PresentTarget::new(window, surface, &adapter, &device)?)
            }
            _ => None,
        };
        let image_layout = ImageBindingLayout::new(&device);

        Ok(Self {
            adapter,
            device,
            queue,
            errors,
            image_layout,
            present,
            _instance: instance,
        })
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    pub fn adapter_info(&self) -> wgpu::AdapterInfo {
        self.adapter.get_info()
    }

    pub fn errors(&self) -> &ErrorSink {
        &self.errors
    }

    /// Whether this context was created with a window.
    pub fn is_windowed(&self) -> bool {
        self.present.is_some()
    }

    /// Blocks until all submitted work has finished.
    pub(crate) fn wait_idle(&self) -> Result<(), wgpu::PollError> {
        self.device.poll(wgpu::PollType::wait_indefinitely())?;
        Ok(())
    }

    pub(crate) fn resize(&mut self, size: winit::dpi::PhysicalSize<u32>) {
        if let Some(present) = self.present.as_mut() {
            present.resize(size);
        }
    }

    /// Clears and presents one frame. Does nothing for headless contexts.
    pub(crate) fn present_frame(&mut self) {
        if let Some(present) = self.present.as_mut() {
            present.present(&self.device, &self.queue);
        }
    }

    pub(crate) fn request_redraw(&self) {
        if let Some(present) = self.present.as_ref() {
            present.window().request_redraw();
        }
    }
}

/// Requires compute shaders plus read-write storage access to the image
/// format.
fn check_compute_support(adapter: &wgpu::Adapter) -> Result<(), ContextCreationError> {
    let name = adapter.get_info().name;
    let missing = |capability| ContextCreationError::MissingCapability {
        adapter: name.clone(),
        capability,
    };

    if !adapter
        .get_downlevel_capabilities()
        .flags
        .contains(wgpu::DownlevelFlags::COMPUTE_SHADERS)
    {
        return Err(missing("compute shaders"));
    }
    if !adapter
        .features()
        .contains(wgpu::Features::TEXTURE_ADAPTER_SPECIFIC_FORMAT_FEATURES)
    {
        return Err(missing("adapter specific texture format features"));
    }
    let format = adapter.get_texture_format_features(IMAGE_FORMAT);
    if !format
        .allowed_usages
        .contains(wgpu::TextureUsages::STORAGE_BINDING)
        || !format
            .flags
            .contains(wgpu::TextureFormatFeatureFlags::STORAGE_READ_WRITE)
    {
        return Err(missing("read-write rgba32float storage images"));
    }
    Ok(())
}

fn install_error_handler(device: &wgpu::Device, sink: ErrorSink, hooks: ContextHooks) {
    let hook = hooks.on_driver_error;
    device.on_uncaptured_error(Arc::new(move |err: wgpu::Error| {
        let code = DriverErrorCode::from(&err);
        let message = err.to_string();
        match &hook {
            Some(hook) => hook(code, &message),
            None => error!("GPU error {code}: {message}"),
        }
        sink.record(code, message);
    }));
}
