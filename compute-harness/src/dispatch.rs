//! Dispatching the program over the image.
//!
//! Dispatch and synchronization are one operation. The compute pass is
//! submitted and the call returns only after the device has finished it, so
//! shader writes to the image are complete before any readback is recorded.
//! There is no way to dispatch without that wait.

use tracing::debug;

use crate::{
    config::DispatchExtent, context::GpuContext, error::HarnessError, image::ImageResource,
    program::ComputeProgram,
};

/// Runs `program` over `extent` work groups with `image` bound, then waits for
/// the GPU to finish.
#[tracing::instrument(level = "debug", skip(ctx, program, image))]
pub fn dispatch_and_barrier(
    ctx: &GpuContext,
    program: &ComputeProgram,
    image: &ImageResource,
    extent: DispatchExtent,
) -> Result<(), HarnessError> {
    let mut encoder = ctx
        .device()
        .create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Compute Dispatch Encoder"),
        });
    {
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("Compute Dispatch Pass"),
            timestamp_writes: None,
        });
        pass.set_pipeline(program.pipeline());
        pass.set_bind_group(0, image.bind_group(), &[]);
        pass.dispatch_workgroups(extent.x, extent.y, extent.z);
    }
    ctx.queue().submit(std::iter::once(encoder.finish()));
    ctx.wait_idle()?;
    debug!("Dispatch of {extent} work groups completed");
    Ok(())
}
