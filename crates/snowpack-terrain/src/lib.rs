//! Ground generation, height field and column aggregate for the Snowpack
//! simulation.

pub mod columns;
pub mod generation;
pub mod heightfield;
pub mod mapping;

pub use columns::ColumnAggregate;
pub use generation::GroundGenerator;
pub use heightfield::HeightField;
pub use mapping::{ColumnLookup, PlaneMapping};
