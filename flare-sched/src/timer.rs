//! Timer primitives (§4.C): one-shot, interval, and grid-snapped timers, all
//! expressed through a single [`TimerSpec`] builder that the scheduler
//! consumes at registration time.

use flare_time::MonotonicTime;

/// Opaque, stable identifier for a registered timer. The scheduler keys its
/// side map by this id rather than by a raw pointer, per the memory-safe
/// rewrite of the original's back-referencing design.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerId(pub(crate) u64);

/// How an interval timer re-arms after firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rearm {
    /// `expiry += interval`: cadence does not drift even if a fire was late.
    Rigid,
    /// `expiry = now + interval`: simpler, but jitter accumulates.
    Drifting,
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum TimerKind {
    At(MonotonicTime),
    In(u64),
    Interval {
        interval_us: u64,
        first_in_us: Option<u64>,
        rearm: Rearm,
    },
}

/// A not-yet-registered timer. Configure it, then hand it to
/// [`crate::SchedulerHandle::timeout_at`] and friends, or use one of the
/// dedicated builder methods below and pass it to
/// [`crate::scheduler::Scheduler::register`].
#[derive(Debug, Clone, Copy)]
pub struct TimerSpec {
    pub(crate) kind: TimerKind,
    pub(crate) grid_snap_us: Option<u64>,
    pub(crate) name: Option<&'static str>,
}

impl TimerSpec {
    pub fn timeout_at(time: MonotonicTime) -> Self {
        Self {
            kind: TimerKind::At(time),
            grid_snap_us: None,
            name: None,
        }
    }

    pub fn timeout_in(duration_us: u64) -> Self {
        Self {
            kind: TimerKind::In(duration_us),
            grid_snap_us: None,
            name: None,
        }
    }

    pub fn timeout_interval(interval_us: u64) -> Self {
        Self {
            kind: TimerKind::Interval {
                interval_us,
                first_in_us: None,
                rearm: Rearm::Drifting,
            },
            grid_snap_us: None,
            name: None,
        }
    }

    pub fn timeout_interval_rigid(interval_us: u64) -> Self {
        Self {
            kind: TimerKind::Interval {
                interval_us,
                first_in_us: None,
                rearm: Rearm::Rigid,
            },
            grid_snap_us: None,
            name: None,
        }
    }

    /// Sets the delay before the first firing of an interval timer. No-op for
    /// one-shot timers.
    pub fn first_in(mut self, first_in_us: u64) -> Self {
        if let TimerKind::Interval { first_in_us: f, .. } = &mut self.kind {
            *f = Some(first_in_us);
        }
        self
    }

    /// Attaches a grid-snap quantum: the computed expiry (and every
    /// subsequent rigid re-arm) is rounded up to the next multiple of
    /// `quantum_us`.
    pub fn snap_to(mut self, quantum_us: u64) -> Self {
        self.grid_snap_us = Some(quantum_us);
        self
    }

    pub fn named(mut self, name: &'static str) -> Self {
        self.name = Some(name);
        self
    }

    pub(crate) fn is_interval(&self) -> bool {
        matches!(self.kind, TimerKind::Interval { .. })
    }

    pub(crate) fn initial_expiry(&self, now: MonotonicTime) -> MonotonicTime {
        let raw = match self.kind {
            TimerKind::At(t) => t,
            TimerKind::In(d) => now + d,
            TimerKind::Interval {
                interval_us,
                first_in_us,
                ..
            } => now + first_in_us.unwrap_or(interval_us),
        };
        snap_up(raw, self.grid_snap_us)
    }
}

pub(crate) fn snap_up(time: MonotonicTime, quantum_us: Option<u64>) -> MonotonicTime {
    match quantum_us {
        None | Some(0) => time,
        Some(q) => {
            let us = time.as_micros();
            let rem = us % q;
            if rem == 0 {
                time
            } else {
                MonotonicTime::from_micros(us + (q - rem))
            }
        }
    }
}

/// The scheduler's bookkeeping for a single registered timer. Not
/// constructible outside this crate; callers only ever see a [`TimerId`].
#[derive(Debug, Clone, Copy)]
pub(crate) struct TimerRecord {
    pub(crate) expiry: MonotonicTime,
    pub(crate) registered_at: MonotonicTime,
    pub(crate) seq: u64,
    pub(crate) interval: Option<(u64, Rearm)>,
    pub(crate) grid_snap_us: Option<u64>,
    #[allow(dead_code)]
    pub(crate) name: Option<&'static str>,
}

impl TimerRecord {
    /// Computes the next expiry after a fire, honoring the re-arm mode.
    pub(crate) fn rearmed_expiry(&self, now: MonotonicTime) -> Option<MonotonicTime> {
        let (interval_us, rearm) = self.interval?;
        let raw = match rearm {
            Rearm::Rigid => self.expiry + interval_us,
            Rearm::Drifting => now + interval_us,
        };
        Some(snap_up(raw, self.grid_snap_us))
    }
}

/// The total order key used by the scheduler's ordered timer set: earliest
/// expiry first, then earliest registration, then registration sequence
/// number. This tuple never needs "now" to compare two timers (see
/// `flare-sched::scheduler` module docs for why that's sound), so a plain
/// `BTreeSet` suffices.
pub(crate) type OrderKey = (u64, u64, u64, u64);

pub(crate) fn order_key(id: TimerId, record: &TimerRecord) -> OrderKey {
    (
        record.expiry.as_micros(),
        record.registered_at.as_micros(),
        record.seq,
        id.0,
    )
}
