//! Deformable snow simulation.
//!
//! This crate drives the per-tick compaction pipeline:
//! - [`grid`]: terrain-following cell grid bound to the column raster
//! - [`collision`]: collider footprints and the collision buffer
//! - [`solver`]: force, compaction, resampling and aggregation kernels
//! - [`pipeline`]: stage ordering and per-tick reports
//! - [`readback`]: asynchronous column readback on a worker thread
//! - [`context`]: the [`SimulationContext`] that owns it all
//!
//! # Feature Flags
//!
//! - `profiling`: time every stage through `snowpack-profiler`.

pub mod collision;
pub mod context;
pub mod grid;
pub mod pipeline;
pub mod readback;
pub mod snapshot;
pub mod solver;

#[cfg(test)]
mod scenarios;

pub use collision::{ColliderDescriptor, CollisionInjector, InjectStats};
pub use context::{ColumnQuery, SimulationContext};
pub use grid::{ColumnBinding, PopulateStats, VoxelGrid};
pub use pipeline::{RecoveredCounts, Stage, StageFlags, TickReport};
pub use readback::{ColumnSnapshot, ReadbackHandle, ReadbackStatus};
pub use snapshot::{MassBalance, SimulationSnapshot};
