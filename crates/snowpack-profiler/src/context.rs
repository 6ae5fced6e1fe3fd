//! Process-wide collector fed by the simulation's stage scopes.
//!
//! Everything here is a no-op until [`init`] runs, so library code can record
//! unconditionally and the driving binary decides whether timings are kept.

use parking_lot::Mutex;

use crate::collector::Collector;
use crate::events::{EventCategory, ProfilerSnapshot, TimingEvent};

static PROFILER: Mutex<Option<Collector>> = Mutex::new(None);

/// Start collecting. Calling it again keeps the existing statistics.
pub fn init() {
    let mut guard = PROFILER.lock();
    if guard.is_none() {
        *guard = Some(Collector::new());
        tracing::debug!("Profiler initialized");
    }
}

/// Stop collecting and drop all statistics.
pub fn shutdown() {
    PROFILER.lock().take();
}

#[inline]
pub fn record(event: TimingEvent) {
    if let Some(collector) = PROFILER.lock().as_mut() {
        collector.record(event);
    }
}

#[inline]
pub fn record_duration(category: EventCategory, duration_ns: u64) {
    record(TimingEvent::new(category, duration_ns));
}

/// Fold the tick's pending samples into the statistics.
///
/// Called by the simulation once per step, after every stage scope closed.
pub fn end_tick(tick: u64, sim_time: f64) {
    if let Some(collector) = PROFILER.lock().as_mut() {
        collector.set_tick_info(tick, sim_time);
        collector.flush();
        if let Some(stats) = collector.get_stats(EventCategory::Tick) {
            tracing::trace!(tick, tick_ms = stats.last_ms(), "Tick timed");
        }
    }
}

/// Statistics as of the last [`end_tick`]; empty when not initialised.
#[must_use]
pub fn snapshot() -> ProfilerSnapshot {
    PROFILER
        .lock()
        .as_ref()
        .map_or_else(ProfilerSnapshot::default, Collector::snapshot)
}

/// Clear statistics but keep collecting.
pub fn reset() {
    if let Some(collector) = PROFILER.lock().as_mut() {
        collector.reset();
    }
}

#[must_use]
pub fn is_initialized() -> bool {
    PROFILER.lock().is_some()
}
