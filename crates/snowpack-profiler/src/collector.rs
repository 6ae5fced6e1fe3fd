//! Event collection and aggregation.

use std::collections::{HashMap, VecDeque};

use crate::events::{CategoryStats, EventCategory, ProfilerSnapshot, TimingEvent};

/// Samples kept per category for the p95 window.
const SAMPLE_HISTORY_SIZE: usize = 100;

/// p95 stays zero until a category has this many samples.
const MIN_P95_SAMPLES: usize = 10;

/// Upper bound on events buffered between flushes.
const MAX_PENDING: usize = 4096;

/// Collects and aggregates profiling events.
#[derive(Default)]
pub struct Collector {
    /// Events recorded since the last flush.
    pending: Vec<TimingEvent>,
    /// Per-category statistics.
    stats: HashMap<EventCategory, CategoryStats>,
    /// Recent samples per category for percentile calculation.
    samples: HashMap<EventCategory, VecDeque<u64>>,
    tick: u64,
    sim_time: f64,
}

impl Collector {
    /// Create a new collector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a timing event.
    pub fn record(&mut self, event: TimingEvent) {
        // Drops events if nobody flushes, which is acceptable for profiling
        if self.pending.len() < MAX_PENDING {
            self.pending.push(event);
        }
    }

    /// Record a duration for a category.
    pub fn record_duration(&mut self, category: EventCategory, duration_ns: u64) {
        self.record(TimingEvent::new(category, duration_ns));
    }

    /// Update tick info.
    pub fn set_tick_info(&mut self, tick: u64, sim_time: f64) {
        self.tick = tick;
        self.sim_time = sim_time;
    }

    /// Process all pending events and update statistics.
    pub fn flush(&mut self) {
        for event in self.pending.drain(..) {
            let stats = self
                .stats
                .entry(event.category)
                .or_insert_with(|| CategoryStats::new(event.category));
            stats.record(event.duration_ns);

            let samples = self
                .samples
                .entry(event.category)
                .or_insert_with(|| VecDeque::with_capacity(SAMPLE_HISTORY_SIZE));
            if samples.len() == SAMPLE_HISTORY_SIZE {
                samples.pop_front();
            }
            samples.push_back(event.duration_ns);

            if samples.len() >= MIN_P95_SAMPLES {
                let mut sorted: Vec<u64> = samples.iter().copied().collect();
                sorted.sort_unstable();
                stats.p95_ns = sorted[(sorted.len() * 95) / 100];
            }
        }
    }

    /// Reset all statistics.
    pub fn reset(&mut self) {
        self.pending.clear();
        self.stats.clear();
        self.samples.clear();
    }

    /// Get a snapshot of current profiling data.
    #[must_use]
    pub fn snapshot(&self) -> ProfilerSnapshot {
        let mut categories: Vec<CategoryStats> = self.stats.values().copied().collect();
        categories.sort_by_key(|s| s.category.sort_key());

        ProfilerSnapshot {
            tick: self.tick,
            sim_time: self.sim_time,
            categories,
        }
    }

    /// Get stats for a specific category.
    #[must_use]
    pub fn get_stats(&self, category: EventCategory) -> Option<&CategoryStats> {
        self.stats.get(&category)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_and_flush() {
        let mut collector = Collector::new();

        collector.record_duration(EventCategory::Tick, 16_000_000);
        collector.record_duration(EventCategory::Tick, 17_000_000);
        collector.record_duration(EventCategory::ApplyForces, 5_000_000);

        collector.flush();

        let tick_stats = collector.get_stats(EventCategory::Tick).unwrap();
        assert_eq!(tick_stats.count, 2);
        assert_eq!(tick_stats.min_ns, 16_000_000);
        assert_eq!(tick_stats.max_ns, 17_000_000);

        let apply_stats = collector.get_stats(EventCategory::ApplyForces).unwrap();
        assert_eq!(apply_stats.count, 1);
    }

    #[test]
    fn snapshot_is_in_pipeline_order() {
        let mut collector = Collector::new();

        collector.record_duration(EventCategory::ClearGrid, 1_000);
        collector.record_duration(EventCategory::Populate, 4_000_000);
        collector.record_duration(EventCategory::Tick, 10_000_000);
        collector.set_tick_info(3, 0.05);
        collector.flush();

        let snapshot = collector.snapshot();
        let order: Vec<_> = snapshot.categories.iter().map(|s| s.category).collect();
        assert_eq!(
            order,
            vec![EventCategory::Tick, EventCategory::Populate, EventCategory::ClearGrid]
        );
        assert_eq!(snapshot.tick, 3);
    }

    #[test]
    fn p95_after_enough_samples() {
        let mut collector = Collector::new();
        for i in 1..=20 {
            collector.record_duration(EventCategory::Populate, i * 1_000);
        }
        collector.flush();
        let stats = collector.get_stats(EventCategory::Populate).unwrap();
        assert_eq!(stats.p95_ns, 20_000);
    }

    #[test]
    fn reset_clears_stats() {
        let mut collector = Collector::new();

        collector.record_duration(EventCategory::Tick, 16_000_000);
        collector.flush();

        assert!(collector.get_stats(EventCategory::Tick).is_some());

        collector.reset();

        assert!(collector.get_stats(EventCategory::Tick).is_none());
    }
}
