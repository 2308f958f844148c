//! Loading and validating the compute program.
//!
//! Building a program takes two checked steps. The WGSL source is compiled
//! into a shader module; diagnostics come from the module's compilation info.
//! The module is then linked into a compute pipeline against the image
//! binding layout. Both steps run inside a validation error scope, so their
//! failures are returned here and never reach the context's
//! [`crate::ErrorSink`] or the driver error hook. The shader module is
//! released as soon as the pipeline exists, and every failure path drops
//! whatever was created.

use std::{borrow::Cow, fs, path::Path};

use tracing::{debug, error, info};

use crate::{
    context::GpuContext,
    error::{HarnessError, ShaderError, ShaderStage},
};

/// Upper bound on the length of a reported diagnostic log, in bytes.
pub const MAX_LOG_LEN: usize = 1024;

/// Name of the compute entry point every shader must define.
pub const ENTRY_POINT: &str = "main";

/// A compiled and linked compute shader.
#[derive(Debug)]
pub struct ComputeProgram {
    pipeline: wgpu::ComputePipeline,
}

impl ComputeProgram {
    /// Reads `path` in full and builds a program from it.
    #[tracing::instrument(level = "info", skip(ctx))]
    pub fn load(ctx: &GpuContext, path: &Path) -> Result<Self, HarnessError> {
        let source = fs::read_to_string(path).map_err(|source| HarnessError::ShaderSource {
            path: path.to_path_buf(),
            source,
        })?;
        debug!("Shader: {source}");
        let label = path.display().to_string();
        let program = Self::from_source(ctx, &label, &source)?;
        info!("Loaded compute program from {label}");
        Ok(program)
    }

    /// Builds a program from WGSL source held in memory.
    pub fn from_source(ctx: &GpuContext, label: &str, source: &str) -> Result<Self, ShaderError> {
        let device = ctx.device();

        let scope = device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(label),
            source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(source)),
        });
        let scoped = pollster::block_on(scope.pop()).map(|err| err.to_string());
        let info = pollster::block_on(module.get_compilation_info());
        if let Some(log) = compilation_log(error_messages(&info), scoped) {
            error!("Shader compilation failed for {label}");
            return Err(ShaderError {
                stage: ShaderStage::Compile,
                log: truncate_log(log, MAX_LOG_LEN),
            });
        }

        let scope = device.push_error_scope(wgpu::ErrorFilter::Validation);
        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(label),
            layout: Some(&ctx.image_layout.pipeline_layout),
            module: &module,
            entry_point: Some(ENTRY_POINT),
            compilation_options: Default::default(),
            cache: None,
        });
        drop(module);

        if let Some(err) = pollster::block_on(scope.pop()) {
            error!("Shader linking failed for {label}");
            return Err(ShaderError {
                stage: ShaderStage::Link,
                log: truncate_log(err.to_string(), MAX_LOG_LEN),
            });
        }

        Ok(Self { pipeline })
    }

    pub(crate) fn pipeline(&self) -> &wgpu::ComputePipeline {
        &self.pipeline
    }
}

fn error_messages(info: &wgpu::CompilationInfo) -> Vec<String> {
    info.messages
        .iter()
        .filter(|message| matches!(message.message_type, wgpu::CompilationMessageType::Error))
        .map(|message| match &message.location {
            Some(location) => format!(
                "{}:{}: {}",
                location.line_number, location.line_position, message.message
            ),
            None => message.message.clone(),
        })
        .collect()
}

/// Joins compile errors, falling back to the scoped validation error when the
/// compilation info carries none.
fn compilation_log(errors: Vec<String>, scoped: Option<String>) -> Option<String> {
    if !errors.is_empty() {
        Some(errors.join("\n"))
    } else {
        scoped.filter(|message| !message.is_empty())
    }
}

/// Cuts `log` to at most `max` bytes without splitting a character.
fn truncate_log(mut log: String, max: usize) -> String {
    if log.len() > max {
        let mut end = max;
        while !log.is_char_boundary(end) {
            end -= 1;
        }
        log.truncate(end);
    }
    log
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_logs_are_untouched() {
        assert_eq!(truncate_log("error: x".to_string(), 1024), "error: x");
    }

    #[test]
    fn long_logs_are_capped() {
        let log = "e".repeat(MAX_LOG_LEN + 10);
        assert_eq!(truncate_log(log, MAX_LOG_LEN).len(), MAX_LOG_LEN);
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        // 'é' is two bytes; a cut at byte 3 would split the second one.
        let log = "ééé".to_string();
        assert_eq!(truncate_log(log, 3), "é");
    }

    #[test]
    fn scoped_error_is_used_when_info_is_empty() {
        assert_eq!(compilation_log(vec![], None), None);
        assert_eq!(compilation_log(vec![], Some(String::new())), None);
        assert_eq!(
            compilation_log(vec![], Some("invalid module".to_string())),
            Some("invalid module".to_string())
        );
    }

    #[test]
    fn compile_errors_take_precedence() {
        let errors = vec!["3:5: unknown type".to_string(), "4:1: expected `;`".to_string()];
        assert_eq!(
            compilation_log(errors, Some("invalid module".to_string())),
            Some("3:5: unknown type\n4:1: expected `;`".to_string())
        );
    }
}
