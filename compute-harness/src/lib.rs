//! # compute-harness
//!
//! A diagnostic harness for GPU compute shaders. It opens a window, builds a
//! compute program from a WGSL file, binds a small `rgba32float` storage
//! image at binding 3 of group 0, then repeatedly dispatches one work group
//! per texel and prints the image contents plus the driver error state after
//! each dispatch.
//!
//! The building blocks are usable on their own:
//!
//! ```no_run
//! use compute_harness::{
//!     ComputeProgram, ContextHooks, GpuContext, ImageResource, ImageSize,
//!     dispatch_and_barrier,
//! };
//!
//! const DOUBLE: &str = r#"
//! @group(0) @binding(3) var image: texture_storage_2d<rgba32float, read_write>;
//!
//! @compute @workgroup_size(1)
//! fn main(@builtin(workgroup_id) group: vec3<u32>) {
//!     let texel = vec2<u32>(group.xy);
//!     textureStore(image, texel, textureLoad(image, texel) * 2.0);
//! }
//! "#;
//!
//! # fn main() -> Result<(), compute_harness::HarnessError> {
//! let ctx = GpuContext::headless(ContextHooks::default())?;
//! let program = ComputeProgram::from_source(&ctx, "double", DOUBLE)?;
//! let size = ImageSize::new(10, 5);
//! let image = ImageResource::create(&ctx, size, 0.5);
//! dispatch_and_barrier(&ctx, &program, &image, size.dispatch_extent())?;
//! assert!(image.read(&ctx)?.iter().all(|&v| v == 1.0));
//! # Ok(())
//! # }
//! ```
//!
//! [`Harness::run`] wires these into the windowed loop.

pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod image;
pub mod limits;
pub mod logging;
mod present;
pub mod program;
pub mod report;
pub mod runner;

pub use wgpu;
pub use winit;

pub use crate::{
    config::{DispatchExtent, HarnessConfig, ImageSize},
    context::{ContextHooks, DriverErrorHook, ErrorSink, GpuContext},
    dispatch::dispatch_and_barrier,
    error::{
        ConfigError, ContextCreationError, DriverErrorCode, HarnessError, ShaderError, ShaderStage,
    },
    image::{IMAGE_BINDING, IMAGE_FORMAT, ImageResource},
    limits::WorkGroupLimits,
    program::ComputeProgram,
    runner::{ErrorStreak, Harness, Session},
};
