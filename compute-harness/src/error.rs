//! Error types for context setup, shader building and the dispatch loop.

use std::{fmt, io, path::PathBuf};

use thiserror::Error;

use crate::config::DispatchExtent;

/// No usable window, surface, adapter or device.
#[derive(Debug, Error)]
pub enum ContextCreationError {
    #[error("failed to create event loop: {0}")]
    EventLoop(#[from] winit::error::EventLoopError),
    #[error("failed to create window: {0}")]
    Window(#[from] winit::error::OsError),
    #[error("failed to create surface: {0}")]
    Surface(#[from] wgpu::CreateSurfaceError),
    #[error("no compatible GPU adapter found: {0}")]
    NoAdapter(#[from] wgpu::RequestAdapterError),
    #[error("adapter `{adapter}` does not support {capability}")]
    MissingCapability {
        adapter: String,
        capability: &'static str,
    },
    #[error("adapter `{0}` reports no surface formats for this window")]
    UnsupportedSurface(String),
    #[error("failed to create device: {0}")]
    Device(#[from] wgpu::RequestDeviceError),
}

/// The step of program construction that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderStage {
    /// Source did not compile into a shader module.
    Compile,
    /// The module did not link into a compute pipeline.
    Link,
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Compile => f.write_str("compilation"),
            Self::Link => f.write_str("linking"),
        }
    }
}

/// Shader compilation or linking failed. `log` holds the driver diagnostics.
#[derive(Debug, Error)]
#[error("shader {stage} failed:\n{log}")]
pub struct ShaderError {
    pub stage: ShaderStage,
    pub log: String,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("no shader path given and ${var} is not set")]
    MissingShaderRoot { var: &'static str },
    #[error("image dimensions must be non-zero, got {width}x{height}")]
    EmptyImage { width: u32, height: u32 },
}

/// Driver error classes, printed as their numeric code after every dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DriverErrorCode {
    #[default]
    NoError,
    Validation,
    OutOfMemory,
    Internal,
}

impl DriverErrorCode {
    pub fn code(self) -> u32 {
        match self {
            Self::NoError => 0,
            Self::Validation => 1,
            Self::OutOfMemory => 2,
            Self::Internal => 3,
        }
    }

    pub fn is_error(self) -> bool {
        self != Self::NoError
    }
}

impl From<&wgpu::Error> for DriverErrorCode {
    fn from(error: &wgpu::Error) -> Self {
        match error {
            wgpu::Error::Validation { .. } => Self::Validation,
            wgpu::Error::OutOfMemory { .. } => Self::OutOfMemory,
            _ => Self::Internal,
        }
    }
}

impl fmt::Display for DriverErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Any failure that ends a harness run.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error(transparent)]
    Context(#[from] ContextCreationError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Shader(#[from] ShaderError),
    #[error("failed to read shader source `{}`: {source}", path.display())]
    ShaderSource {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("dispatch extent {extent} exceeds the work-group count limit {max}")]
    DispatchExceedsLimits {
        extent: DispatchExtent,
        max: DispatchExtent,
    },
    #[error("image {width}x{height} exceeds the device texture dimension limit {max_dimension}")]
    ImageExceedsLimits {
        width: u32,
        height: u32,
        max_dimension: u32,
    },
    #[error("image readback needs {bytes} bytes, above the device buffer limit {max}")]
    ReadbackExceedsLimits { bytes: u64, max: u64 },
    #[error("image readback failed: {0}")]
    Readback(#[from] wgpu::BufferAsyncError),
    #[error("image readback was abandoned before the map completed")]
    ReadbackDropped,
    #[error("device poll failed: {0}")]
    Poll(#[from] wgpu::PollError),
    #[error("{count} consecutive iterations reported driver error {last}")]
    PersistentDriverErrors { count: u32, last: DriverErrorCode },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn driver_codes_are_stable() {
        assert_eq!(DriverErrorCode::NoError.code(), 0);
        assert_eq!(DriverErrorCode::Validation.code(), 1);
        assert_eq!(DriverErrorCode::OutOfMemory.code(), 2);
        assert_eq!(DriverErrorCode::Internal.code(), 3);
        assert_eq!(DriverErrorCode::default(), DriverErrorCode::NoError);
        assert!(!DriverErrorCode::NoError.is_error());
        assert_eq!(DriverErrorCode::Validation.to_string(), "1");
    }

    #[test]
    fn shader_error_message_names_stage() {
        let error = ShaderError {
            stage: ShaderStage::Link,
            log: "binding 0 is missing".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "shader linking failed:\nbinding 0 is missing"
        );
    }

    #[test]
    fn image_limit_error_names_size() {
        let error = HarnessError::ImageExceedsLimits {
            width: 20000,
            height: 5,
            max_dimension: 8192,
        };
        assert_eq!(
            error.to_string(),
            "image 20000x5 exceeds the device texture dimension limit 8192"
        );
    }

    #[test]
    fn limit_error_shows_both_extents() {
        let error = HarnessError::DispatchExceedsLimits {
            extent: DispatchExtent::new(70000, 1, 1),
            max: DispatchExtent::new(65535, 65535, 65535),
        };
        assert_eq!(
            error.to_string(),
            "dispatch extent [70000, 1, 1] exceeds the work-group count limit [65535, 65535, 65535]"
        );
    }
}
