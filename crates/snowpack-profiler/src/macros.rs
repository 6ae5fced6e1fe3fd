//! Profiling macros and scope guards.

use std::time::Instant;

use crate::events::EventCategory;

/// RAII guard that records timing on drop.
pub struct ScopeGuard {
    category: EventCategory,
    start: Instant,
}

impl ScopeGuard {
    /// Create a new scope guard.
    #[inline]
    #[must_use]
    pub fn new(category: EventCategory) -> Self {
        Self {
            category,
            start: Instant::now(),
        }
    }
}

impl Drop for ScopeGuard {
    #[inline]
    fn drop(&mut self) {
        let duration = self.start.elapsed().as_nanos() as u64;
        crate::context::record_duration(self.category, duration);
    }
}

/// Create a profiling scope that measures execution time until end of scope.
///
/// When the `profiling` feature is disabled, this macro expands to nothing.
///
/// ```ignore
/// use snowpack_profiler::{profile_scope, EventCategory};
///
/// fn compute_forces() {
///     profile_scope!(EventCategory::ComputeForces);
///     // ... stage body
/// } // timing recorded here
/// ```
#[cfg(feature = "profiling")]
#[macro_export]
macro_rules! profile_scope {
    ($category:expr) => {
        let _guard = $crate::ScopeGuard::new($category);
    };
}

#[cfg(not(feature = "profiling"))]
#[macro_export]
macro_rules! profile_scope {
    ($category:expr) => {};
}

/// Record a duration directly (for when you already have the timing).
///
/// When the `profiling` feature is disabled, this macro expands to nothing.
#[cfg(feature = "profiling")]
#[macro_export]
macro_rules! profile_duration {
    ($category:expr, $duration:expr) => {
        $crate::record_duration($category, $duration.as_nanos() as u64);
    };
}

#[cfg(not(feature = "profiling"))]
#[macro_export]
macro_rules! profile_duration {
    ($category:expr, $duration:expr) => {};
}
