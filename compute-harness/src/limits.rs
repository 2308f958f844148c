//! Compute work-group limits of the active device.

use std::fmt;

use crate::{config::DispatchExtent, context::GpuContext, error::HarnessError};

/// Hardware bounds on compute dispatches, read once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkGroupLimits {
    /// Maximum number of work groups per dispatch, per axis.
    pub count: [u32; 3],
    /// Maximum work-group size, per axis.
    pub size: [u32; 3],
    /// Maximum invocations in a single work group.
    pub invocations: u32,
}

impl WorkGroupLimits {
    pub fn query(ctx: &GpuContext) -> Self {
        Self::from_limits(&ctx.device().limits())
    }

    /// wgpu reports a single per-dimension group count; it applies to every axis.
    pub fn from_limits(limits: &wgpu::Limits) -> Self {
        let count = limits.max_compute_workgroups_per_dimension;
        Self {
            count: [count; 3],
            size: [
                limits.max_compute_workgroup_size_x,
                limits.max_compute_workgroup_size_y,
                limits.max_compute_workgroup_size_z,
            ],
            invocations: limits.max_compute_invocations_per_workgroup,
        }
    }

    /// Fails if any axis of `extent` is zero or above the group count limit.
    pub fn check_extent(&self, extent: DispatchExtent) -> Result<(), HarnessError> {
        let fits = extent
            .as_array()
            .iter()
            .zip(self.count)
            .all(|(&groups, max)| groups > 0 && groups <= max);
        if fits {
            Ok(())
        } else {
            let [x, y, z] = self.count;
            Err(HarnessError::DispatchExceedsLimits {
                extent,
                max: DispatchExtent::new(x, y, z),
            })
        }
    }
}

impl fmt::Display for WorkGroupLimits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [cx, cy, cz] = self.count;
        let [sx, sy, sz] = self.size;
        write!(
            f,
            "Max amount of workgroups: [{cx}, {cy}, {cz}], max size of each workgroup: [{sx}, {sy}, {sz}]. Maximum local work group invocations: {}",
            self.invocations
        )
    }
}
