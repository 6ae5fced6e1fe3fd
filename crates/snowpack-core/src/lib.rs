//! Core types, configuration and errors for the Snowpack simulation.
//!
//! This crate provides the foundational types shared by every stage:
//! - Grid and column coordinate systems
//! - Plain-old-data records for cells, columns and collision cells
//! - Simulation configuration and per-tick tunables
//! - The error type and the recovered-condition taxonomy

pub mod config;
pub mod coords;
pub mod error;
pub mod math;
pub mod types;

pub use config::{CompactionCoefficients, GroundConfig, PlaneConfig, SimConfig, Tunables};
pub use coords::{ColumnIndex, GridDimensions, GridIndex};
pub use error::{Error, Recovered, Result};
pub use math::Aabb;
pub use types::{Cell, CellInstance, CollisionData, ColumnData, INITIAL_GRAIN_SIZE};

/// Physical constants used by the solver.
pub mod constants {
    /// Gravitational acceleration in m/s^2.
    pub const GRAVITY: f32 = 9.81;
    /// Reference pressure (1 kPa) used to normalise the compaction law.
    pub const REFERENCE_PRESSURE: f32 = 1000.0;
    /// Tolerance when converting a snow height into a count of grid slots.
    pub const SLOT_EPSILON: f32 = 1.0e-4;
}
