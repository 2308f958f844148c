//! Console output of the harness.
//!
//! This is the program's result stream, so it goes to stdout directly rather
//! than through `tracing`.

use std::io::{self, Write};

use crate::{error::DriverErrorCode, limits::WorkGroupLimits};

/// Formats every value followed by `", "`.
pub fn format_texels(values: &[f32]) -> String {
    values.iter().map(|value| format!("{value}, ")).collect()
}

pub fn format_driver_error(code: DriverErrorCode) -> String {
    format!("GPU error: {code}")
}

pub fn print_limits(limits: &WorkGroupLimits) {
    emit(&limits.to_string());
}

pub fn print_texels(values: &[f32]) {
    emit(&format_texels(values));
}

pub fn print_driver_error(code: DriverErrorCode) {
    emit(&format_driver_error(code));
}

fn emit(line: &str) {
    let mut out = io::stdout().lock();
    // A closed stdout must not stop the dispatch loop.
    let _ = writeln!(out, "{line}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn texels_are_comma_terminated() {
        assert_eq!(format_texels(&[0.5, 1.0, 2.25]), "0.5, 1, 2.25, ");
        assert_eq!(format_texels(&[]), "");
    }

    #[test]
    fn driver_error_line() {
        assert_eq!(format_driver_error(DriverErrorCode::NoError), "GPU error: 0");
        assert_eq!(
            format_driver_error(DriverErrorCode::OutOfMemory),
            "GPU error: 2"
        );
    }
}
