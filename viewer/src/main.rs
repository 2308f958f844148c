use std::{path::PathBuf, process::ExitCode};

use anyhow::{Context, Result};
use clap::Parser;
use compute_harness::{Harness, HarnessConfig, ImageSize, logging};
use tracing::error;

const DEFAULT_LOG_DIRECTIVES: &str = "error,compute_harness=info,viewer=info";

#[derive(Parser, Debug)]
#[command(name = "viewer")]
#[command(version, about = "Dispatch a compute shader over a storage image and print the result", long_about = None)]
struct Cli {
    /// WGSL compute shader to run. Defaults to $COMPUTE_ROOT/src/compute.wgsl
    #[arg(short, long, env = "COMPUTE_SHADER")]
    shader: Option<PathBuf>,
    /// Image width in texels
    #[arg(long, default_value_t = 10)]
    width: u32,
    /// Image height in texels
    #[arg(long, default_value_t = 5)]
    height: u32,
    /// Initial value of every channel
    #[arg(long, default_value_t = 0.5)]
    fill: f32,
    /// Stop after this many dispatch iterations
    #[arg(short, long)]
    frames: Option<u64>,
    /// Run without a window
    #[arg(long)]
    headless: bool,
    /// Abort after this many consecutive iterations with a driver error
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    max_driver_errors: Option<u32>,
}

impl Cli {
    fn into_config(self) -> HarnessConfig {
        HarnessConfig {
            shader_path: self.shader,
            image_size: ImageSize::new(self.width, self.height),
            fill_value: self.fill,
            max_frames: self.frames,
            max_consecutive_driver_errors: self.max_driver_errors,
            headless: self.headless,
            ..Default::default()
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    Harness::run(cli.into_config()).context("compute harness failed")
}

fn main() -> ExitCode {
    logging::init_tracing(DEFAULT_LOG_DIRECTIVES);

    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}
