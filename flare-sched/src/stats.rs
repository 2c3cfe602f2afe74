//! Scheduler health counters, snapshotted periodically into a ring buffer so
//! a debug dump can show recent history rather than just the current totals.

use flare_time::MonotonicTime;
use flare_util::ring::RingBuffer;

/// Cumulative scheduler counters. All fields saturate rather than wrap, since
/// an overflowed counter is more useful for diagnosis than a wrapped one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    pub loops: u32,
    pub handled_work: u32,
    pub handled_timed: u32,
    pub skipped_sleep: u32,
    pub time_in_work_us: u64,
    pub time_in_timed_us: u64,
    pub time_in_sleep_us: u64,
    /// Number of timer fires that happened late (a positive latency),
    /// incremented alongside `sum_latent_us`.
    pub count_latent_wake: u32,
    pub sum_latent_us: u64,
    /// Count of low-priority work items dropped because the queue was full.
    pub low_priority_overflow: u32,
}

impl Stats {
    pub const fn new() -> Self {
        Self {
            loops: 0,
            handled_work: 0,
            handled_timed: 0,
            skipped_sleep: 0,
            time_in_work_us: 0,
            time_in_timed_us: 0,
            time_in_sleep_us: 0,
            count_latent_wake: 0,
            sum_latent_us: 0,
            low_priority_overflow: 0,
        }
    }

    pub(crate) fn record_loop(&mut self) {
        self.loops = self.loops.saturating_add(1);
    }

    pub(crate) fn record_work(&mut self, duration_us: u64) {
        self.handled_work = self.handled_work.saturating_add(1);
        self.time_in_work_us = self.time_in_work_us.saturating_add(duration_us);
    }

    pub(crate) fn record_timed(&mut self, duration_us: u64, latency_us: i64) {
        self.handled_timed = self.handled_timed.saturating_add(1);
        self.time_in_timed_us = self.time_in_timed_us.saturating_add(duration_us);
        if latency_us > 0 {
            self.count_latent_wake = self.count_latent_wake.saturating_add(1);
            self.sum_latent_us = self.sum_latent_us.saturating_add(latency_us as u64);
        }
    }

    pub(crate) fn record_sleep(&mut self, duration_us: u64) {
        self.time_in_sleep_us = self.time_in_sleep_us.saturating_add(duration_us);
    }

    pub(crate) fn record_skipped_sleep(&mut self) {
        self.skipped_sleep = self.skipped_sleep.saturating_add(1);
    }

    pub(crate) fn record_low_priority_overflow(&mut self) {
        self.low_priority_overflow = self.low_priority_overflow.saturating_add(1);
    }
}

/// A [`Stats`] snapshot tagged with the monotonic time it was taken at.
#[derive(Debug, Clone, Copy)]
pub struct StatsSnapshot {
    pub at: MonotonicTime,
    pub stats: Stats,
}

/// Rolling history of periodic stats snapshots, for a debug dump of recent
/// scheduler load rather than just the lifetime totals.
pub type StatsHistory<const N: usize> = RingBuffer<StatsSnapshot, N>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_timed_only_counts_positive_latency() {
        let mut stats = Stats::new();
        stats.record_timed(100, -50);
        assert_eq!(stats.count_latent_wake, 0);
        stats.record_timed(100, 50);
        assert_eq!(stats.count_latent_wake, 1);
        assert_eq!(stats.sum_latent_us, 50);
    }

    #[test]
    fn counters_saturate_instead_of_wrapping() {
        let mut stats = Stats {
            loops: u32::MAX,
            ..Stats::new()
        };
        stats.record_loop();
        assert_eq!(stats.loops, u32::MAX);
    }
}
