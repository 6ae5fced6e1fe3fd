//! Per-stage timing instrumentation for the Snowpack simulation.
//!
//! # Feature Flags
//!
//! - `profiling`: Enable profiling instrumentation. When disabled, all profiling
//!   macros expand to no-ops for zero overhead.
//!
//! # Usage
//!
//! ```ignore
//! snowpack_profiler::init();
//!
//! fn populate() {
//!     profile_scope!(EventCategory::Populate);
//!     // ... populate the grid
//! }
//!
//! // once per tick
//! snowpack_profiler::end_tick(tick, sim_time);
//! ```

mod collector;
mod context;
mod events;
mod macros;

pub use collector::Collector;
pub use context::{
    end_tick, init, is_initialized, record, record_duration, reset, shutdown, snapshot,
};
pub use events::{CategoryStats, EventCategory, ProfilerSnapshot, TimingEvent};
pub use macros::ScopeGuard;
