//! Stage ordering for one simulation tick.
//!
//! A tick walks the stages in a fixed order. Each stage sees the complete
//! output of the one before it; stages that have nothing to do (no collision
//! cells) are skipped and recorded as such.

use bitflags::bitflags;
use snowpack_core::{CollisionData, Recovered, Tunables};
use snowpack_terrain::{ColumnAggregate, HeightField};
use tracing::trace;

use crate::grid::VoxelGrid;
use crate::solver::{aggregate_columns, apply_forces, compute_forces, resample_density};

#[cfg(feature = "profiling")]
use snowpack_profiler::{profile_scope, EventCategory};

bitflags! {
    /// Set of pipeline stages.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct StageFlags: u16 {
        const CLEAR_TOTALS      = 1 << 0;
        const POPULATE          = 1 << 1;
        const INJECT_PRESSURE   = 1 << 2;
        const COMPUTE_FORCES    = 1 << 3;
        const APPLY_FORCES      = 1 << 4;
        const RESAMPLE_DENSITY  = 1 << 5;
        const AGGREGATE_COLUMNS = 1 << 6;
        const CLEAR_GRID        = 1 << 7;
    }
}

/// One step of the tick pipeline, in execution order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Stage {
    ClearTotals,
    Populate,
    InjectPressure,
    ComputeForces,
    ApplyForces,
    ResampleDensity,
    AggregateColumns,
    ClearGrid,
}

impl Stage {
    pub const ALL: [Self; 8] = [
        Self::ClearTotals,
        Self::Populate,
        Self::InjectPressure,
        Self::ComputeForces,
        Self::ApplyForces,
        Self::ResampleDensity,
        Self::AggregateColumns,
        Self::ClearGrid,
    ];

    #[inline]
    pub const fn first() -> Self {
        Self::ClearTotals
    }

    /// The stage that runs after this one, if any.
    pub const fn next(self) -> Option<Self> {
        match self {
            Self::ClearTotals => Some(Self::Populate),
            Self::Populate => Some(Self::InjectPressure),
            Self::InjectPressure => Some(Self::ComputeForces),
            Self::ComputeForces => Some(Self::ApplyForces),
            Self::ApplyForces => Some(Self::ResampleDensity),
            Self::ResampleDensity => Some(Self::AggregateColumns),
            Self::AggregateColumns => Some(Self::ClearGrid),
            Self::ClearGrid => None,
        }
    }

    pub const fn flag(self) -> StageFlags {
        match self {
            Self::ClearTotals => StageFlags::CLEAR_TOTALS,
            Self::Populate => StageFlags::POPULATE,
            Self::InjectPressure => StageFlags::INJECT_PRESSURE,
            Self::ComputeForces => StageFlags::COMPUTE_FORCES,
            Self::ApplyForces => StageFlags::APPLY_FORCES,
            Self::ResampleDensity => StageFlags::RESAMPLE_DENSITY,
            Self::AggregateColumns => StageFlags::AGGREGATE_COLUMNS,
            Self::ClearGrid => StageFlags::CLEAR_GRID,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::ClearTotals => "clear totals",
            Self::Populate => "populate",
            Self::InjectPressure => "inject pressure",
            Self::ComputeForces => "compute forces",
            Self::ApplyForces => "apply forces",
            Self::ResampleDensity => "resample density",
            Self::AggregateColumns => "aggregate columns",
            Self::ClearGrid => "clear grid",
        }
    }

    #[cfg(feature = "profiling")]
    const fn event_category(self) -> EventCategory {
        match self {
            Self::ClearTotals => EventCategory::ClearTotals,
            Self::Populate => EventCategory::Populate,
            Self::InjectPressure => EventCategory::InjectPressure,
            Self::ComputeForces => EventCategory::ComputeForces,
            Self::ApplyForces => EventCategory::ApplyForces,
            Self::ResampleDensity => EventCategory::ResampleDensity,
            Self::AggregateColumns => EventCategory::AggregateColumns,
            Self::ClearGrid => EventCategory::ClearGrid,
        }
    }
}

/// Occurrences of each recovered condition during a tick.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RecoveredCounts {
    pub input_clamped: u32,
    pub degenerate_geometry: u32,
    pub readback_stale: u32,
    pub capacity_exceeded: u32,
}

impl RecoveredCounts {
    pub fn add(&mut self, kind: Recovered, count: usize) {
        let count = u32::try_from(count).unwrap_or(u32::MAX);
        let slot = match kind {
            Recovered::InputClamped => &mut self.input_clamped,
            Recovered::DegenerateGeometry => &mut self.degenerate_geometry,
            Recovered::ReadbackStale => &mut self.readback_stale,
            Recovered::CapacityExceeded => &mut self.capacity_exceeded,
        };
        *slot = slot.saturating_add(count);
    }

    pub const fn get(&self, kind: Recovered) -> u32 {
        match kind {
            Recovered::InputClamped => self.input_clamped,
            Recovered::DegenerateGeometry => self.degenerate_geometry,
            Recovered::ReadbackStale => self.readback_stale,
            Recovered::CapacityExceeded => self.capacity_exceeded,
        }
    }

    pub fn merge(&mut self, other: &Self) {
        for kind in Self::KINDS {
            self.add(kind, other.get(kind) as usize);
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Conditions with a non-zero count.
    pub fn iter(&self) -> impl Iterator<Item = (Recovered, u32)> + '_ {
        Self::KINDS
            .into_iter()
            .map(|kind| (kind, self.get(kind)))
            .filter(|(_, count)| *count > 0)
    }

    const KINDS: [Recovered; 4] = [
        Recovered::InputClamped,
        Recovered::DegenerateGeometry,
        Recovered::ReadbackStale,
        Recovered::CapacityExceeded,
    ];
}

/// What happened during one tick.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TickReport {
    pub executed: StageFlags,
    pub skipped: StageFlags,
    pub occupied_cells: usize,
    /// Cells carrying overflow straight after populate.
    pub overfull_cells: usize,
    /// Collision entries that landed on a grid column.
    pub collision_cells: usize,
    pub compacted_cells: usize,
    pub recovered: RecoveredCounts,
    /// Grid mass straight after populate.
    pub grid_mass_in: f64,
    /// Settled and overflow grid mass after the solver stages.
    pub grid_settled: f64,
    pub grid_overflow: f64,
}

impl TickReport {
    /// Mass gained or lost by the grid during the tick.
    pub fn grid_drift(&self) -> f64 {
        self.grid_settled + self.grid_overflow - self.grid_mass_in
    }
}

/// Per-tick inputs shared by every stage.
pub struct TickInputs<'a> {
    pub tunables: &'a Tunables,
    /// Scaled time step.
    pub dt_sim: f32,
    pub collisions: &'a [CollisionData],
    pub deposit_temperature: f32,
}

/// Buffers the stages read and write.
pub struct TickBuffers<'a> {
    pub grid: &'a mut VoxelGrid,
    pub columns: &'a mut ColumnAggregate,
    pub height_field: &'a mut HeightField,
}

/// Run every stage once, in order.
pub fn run_tick(buffers: &mut TickBuffers<'_>, inputs: &TickInputs<'_>) -> TickReport {
    let mut report = TickReport::default();
    let mut next = Some(Stage::first());
    while let Some(stage) = next {
        if run_stage(stage, buffers, inputs, &mut report) {
            report.executed |= stage.flag();
        } else {
            report.skipped |= stage.flag();
            trace!(stage = stage.name(), "Stage skipped");
        }
        next = stage.next();
    }
    report
}

fn run_stage(
    stage: Stage,
    buffers: &mut TickBuffers<'_>,
    inputs: &TickInputs<'_>,
    report: &mut TickReport,
) -> bool {
    #[cfg(feature = "profiling")]
    profile_scope!(stage.event_category());

    let tunables = inputs.tunables;
    match stage {
        Stage::ClearTotals => buffers.columns.clear_totals(),
        Stage::Populate => {
            let stats =
                buffers
                    .grid
                    .populate(buffers.columns.as_slice(), tunables, inputs.deposit_temperature);
            report.occupied_cells = stats.occupied_cells;
            report.overfull_cells = stats.overfull_cells;
            let (settled, overflow) = buffers.grid.mass_totals();
            report.grid_mass_in = settled + overflow;
        }
        Stage::InjectPressure => {
            if inputs.collisions.is_empty() {
                return false;
            }
            let outside = buffers.grid.inject_pressure(inputs.collisions);
            report.collision_cells = inputs.collisions.len() - outside;
        }
        Stage::ComputeForces => compute_forces(buffers.grid, tunables),
        Stage::ApplyForces => {
            let stats = apply_forces(buffers.grid, tunables, inputs.dt_sim);
            report.compacted_cells = stats.compacted_cells;
            report
                .recovered
                .add(Recovered::CapacityExceeded, stats.saturated_cells);
        }
        Stage::ResampleDensity => resample_density(buffers.grid, tunables, inputs.dt_sim),
        Stage::AggregateColumns => {
            aggregate_columns(buffers.grid, buffers.columns.as_mut_slice());
            buffers.height_field.sync_from(buffers.columns);
            let (settled, overflow) = buffers.grid.mass_totals();
            report.grid_settled = settled;
            report.grid_overflow = overflow;
        }
        Stage::ClearGrid => buffers.grid.clear_transient(),
    }
    true
}
