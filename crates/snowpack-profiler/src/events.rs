//! Profiler event types and statistics.

use serde::{Deserialize, Serialize};

/// Categories for profiling events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum EventCategory {
    /// Full tick timing.
    #[default]
    Tick = 0,
    ClearTotals = 1,
    Populate = 2,
    InjectPressure = 3,
    ComputeForces = 4,
    ApplyForces = 5,
    ResampleDensity = 6,
    AggregateColumns = 7,
    ClearGrid = 8,
    /// Column buffer copy handed to the readback worker.
    Readback = 10,
    /// Custom event with ID.
    Custom(u32) = 255,
}

impl EventCategory {
    /// Get a display name for this category.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Tick => "Tick",
            Self::ClearTotals => "Clear Totals",
            Self::Populate => "Populate",
            Self::InjectPressure => "Inject Pressure",
            Self::ComputeForces => "Compute Forces",
            Self::ApplyForces => "Apply Forces",
            Self::ResampleDensity => "Resample Density",
            Self::AggregateColumns => "Aggregate Columns",
            Self::ClearGrid => "Clear Grid",
            Self::Readback => "Readback",
            Self::Custom(_) => "Custom",
        }
    }

    /// Display order, pipeline stages in execution order.
    #[must_use]
    pub const fn sort_key(&self) -> u32 {
        match self {
            Self::Tick => 0,
            Self::ClearTotals => 1,
            Self::Populate => 2,
            Self::InjectPressure => 3,
            Self::ComputeForces => 4,
            Self::ApplyForces => 5,
            Self::ResampleDensity => 6,
            Self::AggregateColumns => 7,
            Self::ClearGrid => 8,
            Self::Readback => 10,
            Self::Custom(id) => 100 + *id,
        }
    }
}

/// A single timing event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TimingEvent {
    /// Event category.
    pub category: EventCategory,
    /// Duration in nanoseconds.
    pub duration_ns: u64,
}

impl TimingEvent {
    /// Create a new timing event.
    #[must_use]
    pub const fn new(category: EventCategory, duration_ns: u64) -> Self {
        Self {
            category,
            duration_ns,
        }
    }
}

/// Running timings for one category, in nanoseconds.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CategoryStats {
    pub category: EventCategory,
    /// Samples recorded since the last reset.
    pub count: u32,
    pub total_ns: u64,
    pub min_ns: u64,
    pub max_ns: u64,
    /// Most recent sample, usually the last tick.
    pub last_ns: u64,
    /// Approximate, over the recent sample window.
    pub p95_ns: u64,
}

impl CategoryStats {
    #[must_use]
    pub const fn new(category: EventCategory) -> Self {
        Self {
            category,
            count: 0,
            total_ns: 0,
            min_ns: u64::MAX,
            max_ns: 0,
            last_ns: 0,
            p95_ns: 0,
        }
    }

    pub fn record(&mut self, duration_ns: u64) {
        self.count = self.count.saturating_add(1);
        self.total_ns = self.total_ns.saturating_add(duration_ns);
        self.min_ns = self.min_ns.min(duration_ns);
        self.max_ns = self.max_ns.max(duration_ns);
        self.last_ns = duration_ns;
    }

    /// Mean sample, zero before the first one.
    #[must_use]
    pub fn avg_ns(&self) -> u64 {
        self.total_ns.checked_div(u64::from(self.count)).unwrap_or(0)
    }

    #[must_use]
    pub fn avg_ms(&self) -> f64 {
        ns_to_ms(self.avg_ns())
    }

    #[must_use]
    pub fn max_ms(&self) -> f64 {
        ns_to_ms(self.max_ns)
    }

    #[must_use]
    pub fn p95_ms(&self) -> f64 {
        ns_to_ms(self.p95_ns)
    }

    #[must_use]
    pub fn last_ms(&self) -> f64 {
        ns_to_ms(self.last_ns)
    }
}

#[inline]
fn ns_to_ms(ns: u64) -> f64 {
    ns as f64 / 1_000_000.0
}

/// Profiling data at the end of a tick.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfilerSnapshot {
    /// Tick the snapshot was taken after.
    pub tick: u64,
    /// Simulated time in seconds.
    pub sim_time: f64,
    /// Per-category statistics, in pipeline order.
    pub categories: Vec<CategoryStats>,
}

impl ProfilerSnapshot {
    /// Stats for one category, if any events were recorded.
    #[must_use]
    pub fn category(&self, category: EventCategory) -> Option<&CategoryStats> {
        self.categories.iter().find(|s| s.category == category)
    }
}
