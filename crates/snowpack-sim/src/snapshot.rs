//! Per-tick results handed back to the caller.

use crate::collision::ColliderDescriptor;
use crate::pipeline::TickReport;
use crate::readback::ReadbackStatus;

/// Column-mass bookkeeping across one tick.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct MassBalance {
    /// Column mass at the end of the previous tick.
    pub before: f64,
    /// Mass deposited since the previous tick.
    pub added: f64,
    /// Column mass at the end of this tick.
    pub after: f64,
}

impl MassBalance {
    /// Mass created or destroyed by the tick.
    #[inline]
    pub fn drift(&self) -> f64 {
        self.after - (self.before + self.added)
    }

    /// Drift relative to the expected total, zero for an empty field.
    pub fn relative_drift(&self) -> f64 {
        let expected = self.before + self.added;
        if expected.abs() > f64::EPSILON {
            self.drift() / expected
        } else {
            self.drift()
        }
    }
}

/// Outcome of [`crate::SimulationContext::step`].
#[derive(Clone, Debug, Default)]
pub struct SimulationSnapshot {
    /// Number of completed ticks.
    pub tick: u64,
    /// Simulated seconds, advanced by `dt * time_scale`.
    pub sim_time: f64,
    /// Scaled step used by this tick.
    pub dt_sim: f32,
    pub report: TickReport,
    pub mass: MassBalance,
    pub max_snow_height: f32,
    /// Freshness of the readback the colliders were settled against.
    pub readback: ReadbackStatus,
    /// Colliders resting on the last read-back snow surface.
    pub settled_colliders: Vec<ColliderDescriptor>,
}
