//! Error types for the simulation.

use thiserror::Error;

/// Simulation-wide error type.
///
/// Only setup and teardown can fail. Conditions met while ticking are
/// absorbed locally and reported as [`Recovered`].
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration rejected by validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Out of bounds access
    #[error("Out of bounds: {0}")]
    OutOfBounds(String),

    /// Background worker failure
    #[error("Worker error: {0}")]
    Worker(String),
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Conditions the pipeline recovers from without interrupting a tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Recovered {
    /// A world position fell outside the column raster and was clamped.
    InputClamped,
    /// A collider with zero contact area contributed no pressure.
    DegenerateGeometry,
    /// A consumer reused the last completed column readback.
    ReadbackStale,
    /// Mass above the density ceiling was moved to overflow.
    CapacityExceeded,
}

impl Recovered {
    /// Get a display name for this condition.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::InputClamped => "input clamped",
            Self::DegenerateGeometry => "degenerate geometry",
            Self::ReadbackStale => "readback stale",
            Self::CapacityExceeded => "capacity exceeded",
        }
    }
}

impl std::fmt::Display for Recovered {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
