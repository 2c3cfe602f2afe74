//! Monotonic and notional (wall-clock) time.
//!
//! - [`MonotonicTime`] wraps the 1 MHz hardware counter widened to 64 bits.
//! - [`NotionalClock`] tracks wall-clock time as a signed microsecond offset
//!   from the monotonic clock, so that retargeting the wall clock (e.g. after
//!   a GPS time fix) is a cheap, auditable operation rather than a write to
//!   every subsystem that cares about time.

#![cfg_attr(not(feature = "std"), no_std)]

pub mod format;

use core::sync::atomic::{AtomicI64, Ordering};

/// Microseconds since boot. Saturating-never: callers are expected to run for
/// at most ~584,000 years before this wraps, which we do not guard against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MonotonicTime(pub u64);

impl MonotonicTime {
    pub const ZERO: MonotonicTime = MonotonicTime(0);

    pub const fn from_micros(us: u64) -> Self {
        MonotonicTime(us)
    }

    pub const fn as_micros(self) -> u64 {
        self.0
    }

    /// `self - other`, in signed microseconds. Used throughout the scheduler
    /// so that an overdue deadline compares as a negative remaining time.
    pub fn signed_diff(self, other: MonotonicTime) -> i64 {
        self.0 as i64 - other.0 as i64
    }

    pub fn checked_add_micros(self, us: u64) -> Option<MonotonicTime> {
        self.0.checked_add(us).map(MonotonicTime)
    }
}

impl core::ops::Add<u64> for MonotonicTime {
    type Output = MonotonicTime;

    fn add(self, rhs: u64) -> MonotonicTime {
        MonotonicTime(self.0 + rhs)
    }
}

/// Source of the underlying 1 MHz hardware counter. Implemented by the board
/// support package; a `std`-backed implementation is provided for host tests.
pub trait MonotonicSource {
    fn now_us(&self) -> u64;
}

#[cfg(feature = "std")]
pub struct StdMonotonicSource {
    start: std::time::Instant,
}

#[cfg(feature = "std")]
impl StdMonotonicSource {
    pub fn new() -> Self {
        Self {
            start: std::time::Instant::now(),
        }
    }
}

#[cfg(feature = "std")]
impl Default for StdMonotonicSource {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "std")]
impl MonotonicSource for StdMonotonicSource {
    fn now_us(&self) -> u64 {
        self.start.elapsed().as_micros() as u64
    }
}

/// Wall-clock ("notional") time tracked as a signed offset from the
/// monotonic clock.
///
/// The offset is stored atomically so that it can be read from an interrupt
/// context without a critical section; writers (setters) are expected to run
/// on the main thread only.
pub struct NotionalClock {
    offset_us: AtomicI64,
    last_set_at: AtomicI64,
}

impl NotionalClock {
    pub const fn new() -> Self {
        Self {
            offset_us: AtomicI64::new(0),
            last_set_at: AtomicI64::new(0),
        }
    }

    /// Returns the current notional time, in signed microseconds since the
    /// Unix epoch (or whatever epoch the offset was seeded against).
    pub fn now(&self, monotonic: MonotonicTime) -> i64 {
        monotonic.0 as i64 + self.offset_us.load(Ordering::Relaxed)
    }

    /// Retargets the notional clock so that `now(monotonic) == new_wall_time_us`.
    ///
    /// Returns the signed difference between the new and old offset: a
    /// positive value means the wall clock jumped forward. Also records
    /// `monotonic` as the time of the change, so callers can later
    /// distinguish "the wall clock was retargeted at this monotonic instant"
    /// from ordinary drift.
    pub fn set(&self, monotonic: MonotonicTime, new_wall_time_us: i64) -> i64 {
        let new_offset = new_wall_time_us - monotonic.0 as i64;
        let old_offset = self.offset_us.swap(new_offset, Ordering::Relaxed);
        self.last_set_at.store(monotonic.0 as i64, Ordering::Relaxed);
        new_offset - old_offset
    }

    /// Adjusts the notional clock by a relative amount without needing to
    /// know the current wall time. Returns the same delta passed in (kept for
    /// symmetry with [`NotionalClock::set`]).
    pub fn adjust(&self, monotonic: MonotonicTime, delta_us: i64) -> i64 {
        self.offset_us.fetch_add(delta_us, Ordering::Relaxed);
        self.last_set_at.store(monotonic.0 as i64, Ordering::Relaxed);
        delta_us
    }

    /// The monotonic instant at which the offset was last changed.
    pub fn last_set_at(&self) -> MonotonicTime {
        MonotonicTime(self.last_set_at.load(Ordering::Relaxed) as u64)
    }

    pub fn offset_us(&self) -> i64 {
        self.offset_us.load(Ordering::Relaxed)
    }
}

impl Default for NotionalClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_reports_forward_jump_as_positive() {
        let clock = NotionalClock::new();
        let t0 = MonotonicTime::from_micros(1_000_000);
        clock.set(t0, 0);
        assert_eq!(clock.now(t0), 0);

        let t1 = MonotonicTime::from_micros(2_000_000);
        let delta = clock.set(t1, 10_000_000);
        assert_eq!(clock.now(t1), 10_000_000);
        // previously offset was -1_000_000 (0 - 1_000_000); now it's
        // 10_000_000 - 2_000_000 = 8_000_000; delta = 8_000_000 - (-1_000_000)
        assert_eq!(delta, 9_000_000);
        assert_eq!(clock.last_set_at(), t1);
    }

    #[test]
    fn monotonic_signed_diff_allows_overdue_negative() {
        let earlier = MonotonicTime::from_micros(100);
        let later = MonotonicTime::from_micros(150);
        assert_eq!(earlier.signed_diff(later), -50);
        assert_eq!(later.signed_diff(earlier), 50);
    }
}
