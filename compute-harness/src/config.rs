//! Runtime configuration for the harness.
//!
//! ## Usage
//!
//! Build a [`HarnessConfig`] (usually from command line arguments) and hand it
//! to [`crate::Harness::run`].

use std::{
    fmt,
    path::{Path, PathBuf},
};

use crate::error::ConfigError;

/// Environment variable naming the root directory that holds the shader.
pub const SHADER_ROOT_VAR: &str = "COMPUTE_ROOT";

/// Shader location relative to [`SHADER_ROOT_VAR`].
pub const DEFAULT_SHADER_RELATIVE_PATH: &str = "src/compute.wgsl";

/// Dimensions of the storage image shared with the shader, in texels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

impl ImageSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn texel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Number of `f32` values a full readback yields (four channels per texel).
    pub fn float_count(&self) -> usize {
        self.texel_count() * 4
    }

    /// One work group per texel, one layer deep.
    pub fn dispatch_extent(&self) -> DispatchExtent {
        DispatchExtent::planar(self.width, self.height)
    }
}

/// Number of work groups to dispatch along each axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchExtent {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl DispatchExtent {
    pub const fn new(x: u32, y: u32, z: u32) -> Self {
        Self { x, y, z }
    }

    pub const fn planar(x: u32, y: u32) -> Self {
        Self { x, y, z: 1 }
    }

    pub fn as_array(&self) -> [u32; 3] {
        [self.x, self.y, self.z]
    }
}

impl fmt::Display for DispatchExtent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}, {}]", self.x, self.y, self.z)
    }
}

/// Configuration for a harness run.
///
/// # Examples
///
/// ```
/// use compute_harness::{HarnessConfig, ImageSize};
///
/// let config = HarnessConfig {
///     image_size: ImageSize::new(16, 16),
///     max_frames: Some(3),
///     ..Default::default()
/// };
/// assert_eq!(config.fill_value, 0.5);
/// ```
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    /// Title of the diagnostic window.
    pub window_title: String,
    /// Window size in logical pixels. Independent of [`Self::image_size`].
    pub window_size: [u32; 2],
    /// Explicit shader path. When `None` the path is derived from
    /// [`SHADER_ROOT_VAR`].
    pub shader_path: Option<PathBuf>,
    pub image_size: ImageSize,
    /// Value written to every channel of every texel before the first dispatch.
    pub fill_value: f32,
    /// Stop after this many dispatch iterations.
    pub max_frames: Option<u64>,
    /// End the run once this many consecutive iterations report a driver
    /// error. `None` reports errors and keeps going.
    pub max_consecutive_driver_errors: Option<u32>,
    /// Run without a window.
    pub headless: bool,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            window_title: "viewer".to_string(),
            window_size: [512, 512],
            shader_path: None,
            image_size: ImageSize::new(10, 5),
            fill_value: 0.5,
            max_frames: None,
            max_consecutive_driver_errors: None,
            headless: false,
        }
    }
}

impl HarnessConfig {
    /// Rejects configurations that can never produce a valid dispatch.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let ImageSize { width, height } = self.image_size;
        if width == 0 || height == 0 {
            return Err(ConfigError::EmptyImage { width, height });
        }
        Ok(())
    }

    /// Resolves the shader path against the process environment.
    pub fn resolve_shader_path(&self) -> Result<PathBuf, ConfigError> {
        let root = std::env::var_os(SHADER_ROOT_VAR);
        resolve_shader_path(self.shader_path.as_deref(), root.as_deref().map(Path::new))
    }
}

/// Picks the explicit path if given, otherwise `root/src/compute.wgsl`.
pub fn resolve_shader_path(
    explicit: Option<&Path>,
    root: Option<&Path>,
) -> Result<PathBuf, ConfigError> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }
    match root {
        Some(root) if !root.as_os_str().is_empty() => Ok(root.join(DEFAULT_SHADER_RELATIVE_PATH)),
        _ => Err(ConfigError::MissingShaderRoot {
            var: SHADER_ROOT_VAR,
        }),
    }
}
