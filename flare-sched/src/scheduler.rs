//! The scheduler's main loop: a bounded-work-per-iteration policy over two
//! work queues and an ordered set of timers.
//!
//! # Why a plain `BTreeSet` suffices for timer ordering
//!
//! Timers are ordered by `(expiry, registered_at, seq)`, which reads like it
//! needs "time since registration" computed against the current instant.
//! But at any single comparison, "now" is the same value for both operands,
//! so subtracting it from each side's registration time does not change
//! which one is smaller: the comparison reduces to plain `registered_at`
//! ascending. The order is therefore static once a timer is registered, and
//! a `BTreeSet` keyed by `(expiry_us, registered_at_us, seq, id)` is exactly
//! the totally-ordered structure the policy needs.

use alloc::boxed::Box;
use alloc::collections::{BTreeMap, BTreeSet};

use flare_time::{MonotonicSource, MonotonicTime};
use flare_util::label::Label;
use flare_util::SeqCounter;

use crate::queue::{HighPriorityQueue, LowPriorityQueue, WorkItem};
use crate::semaphore::SleepSemaphore;
use crate::stats::{Stats, StatsHistory, StatsSnapshot};
use crate::timer::{order_key, OrderKey, TimerId, TimerKind, TimerRecord, TimerSpec};

/// Bound on high-priority work items drained per scheduler iteration.
pub const HIGH_PRIORITY_WORK_PER_ITER: usize = 4;
/// Bound on low-priority work items drained per scheduler iteration.
pub const LOW_PRIORITY_WORK_PER_ITER: usize = 4;
/// Bound on timer fires per scheduler iteration.
pub const TIMERS_PER_ITER: usize = 1;

/// A work item callback. Runs on the main thread with full scheduler access.
pub type WorkCallback = Box<dyn FnOnce(&mut dyn SchedulerHandle)>;
/// A timer callback. May re-register itself or other timers/work through the
/// handle it is given.
pub type TimerCallback = Box<dyn FnMut(&mut dyn SchedulerHandle, TimerId)>;

/// The API surface collaborators are given instead of a concrete [`Scheduler`]
/// type, so callback types do not need to name the scheduler's const generic
/// parameters.
pub trait SchedulerHandle {
    fn now(&self) -> MonotonicTime;

    /// Enqueues high-priority work. Fails (returning the item) if the queue
    /// is full; callers decide how to react to backpressure.
    fn queue_work(&mut self, label: Label, callback: WorkCallback) -> Result<(), WorkItem>;

    /// Enqueues low-priority work. Returns `true` if enqueuing evicted an
    /// older pending item.
    fn queue_low_priority_work(&mut self, label: Label, callback: WorkCallback) -> bool;

    /// Removes every pending low-priority item with a matching label.
    /// Returns the number removed.
    fn clear_low_priority_by_label(&mut self, label: Label) -> u32;

    fn register_timer(&mut self, spec: TimerSpec, callback: TimerCallback) -> TimerId;

    /// Cancels a timer. Returns `true` if it was pending (or, called from
    /// within its own callback, suppresses the next re-arm of an interval
    /// timer).
    fn cancel_timer(&mut self, id: TimerId) -> bool;

    fn stats(&self) -> Stats;
}

struct TimerSlot {
    record: TimerRecord,
    callback: Option<TimerCallback>,
}

/// The cooperative scheduler. Owns the main thread: construct one, register
/// timers and initial work, then call [`Scheduler::run_forever`] (or
/// [`Scheduler::run_for`] in tests).
///
/// - `HIGH_CAP` / `LOW_CAP`: work queue capacities.
/// - `STATS_HIST`: number of periodic [`StatsSnapshot`]s retained.
pub struct Scheduler<M, S, const HIGH_CAP: usize, const LOW_CAP: usize, const STATS_HIST: usize>
where
    M: MonotonicSource,
    S: SleepSemaphore,
{
    clock: M,
    semaphore: S,
    high: HighPriorityQueue<HIGH_CAP>,
    low: LowPriorityQueue<LOW_CAP>,
    timer_order: BTreeSet<OrderKey>,
    timers: BTreeMap<TimerId, TimerSlot>,
    next_timer_id: u64,
    seq: SeqCounter,
    stats: Stats,
    stats_history: StatsHistory<STATS_HIST>,
    currently_firing: Option<TimerId>,
    firing_no_rearm: Option<TimerId>,
    keep_running: bool,
}

impl<M, S, const HIGH_CAP: usize, const LOW_CAP: usize, const STATS_HIST: usize>
    Scheduler<M, S, HIGH_CAP, LOW_CAP, STATS_HIST>
where
    M: MonotonicSource,
    S: SleepSemaphore,
{
    pub fn new(clock: M, semaphore: S) -> Self {
        Self {
            clock,
            semaphore,
            high: HighPriorityQueue::new(),
            low: LowPriorityQueue::new(),
            timer_order: BTreeSet::new(),
            timers: BTreeMap::new(),
            next_timer_id: 1,
            seq: SeqCounter::new(),
            stats: Stats::new(),
            stats_history: StatsHistory::new(),
            currently_firing: None,
            firing_no_rearm: None,
            keep_running: false,
        }
    }

    pub fn stats(&self) -> Stats {
        self.stats
    }

    pub fn stats_history(&self) -> &StatsHistory<STATS_HIST> {
        &self.stats_history
    }

    /// Takes a periodic snapshot of the current stats into the rolling
    /// history. Callers typically drive this from a recurring timer.
    pub fn snapshot_stats(&mut self) {
        let at = self.now_monotonic();
        self.stats_history.push(StatsSnapshot { at, stats: self.stats });
    }

    pub fn stop(&mut self) {
        self.keep_running = false;
    }

    fn now_monotonic(&self) -> MonotonicTime {
        MonotonicTime::from_micros(self.clock.now_us())
    }

    fn register_timer_inner(&mut self, spec: TimerSpec, callback: TimerCallback) -> TimerId {
        let now = self.now_monotonic();
        let id = TimerId(self.next_timer_id);
        self.next_timer_id += 1;

        let interval = match spec.kind {
            TimerKind::Interval { interval_us, rearm, .. } => Some((interval_us, rearm)),
            _ => None,
        };

        let record = TimerRecord {
            expiry: spec.initial_expiry(now),
            registered_at: now,
            seq: self.seq.next(),
            interval,
            grid_snap_us: spec.grid_snap_us,
            name: spec.name,
        };

        self.timer_order.insert(order_key(id, &record));
        self.timers.insert(
            id,
            TimerSlot {
                record,
                callback: Some(callback),
            },
        );
        id
    }

    fn cancel_timer_inner(&mut self, id: TimerId) -> bool {
        if self.currently_firing == Some(id) {
            self.firing_no_rearm = Some(id);
            return true;
        }
        if let Some(slot) = self.timers.remove(&id) {
            self.timer_order.remove(&order_key(id, &slot.record));
            true
        } else {
            false
        }
    }

    /// Fires up to `budget` expired timers, decrementing `budget` for each.
    /// Returns `true` if at least one timer fired.
    fn fire_due_timers(&mut self, now: MonotonicTime, budget: &mut usize) -> bool {
        let mut fired_any = false;
        while *budget > 0 {
            let Some(&key) = self.timer_order.iter().next() else {
                break;
            };
            let (expiry_us, _, _, id_raw) = key;
            if expiry_us > now.as_micros() {
                break;
            }
            let id = TimerId(id_raw);
            self.timer_order.remove(&key);
            let mut slot = self
                .timers
                .remove(&id)
                .expect("timer_order and timers must stay in sync");

            let mut callback = slot.callback.take();
            let latency_us = now.signed_diff(slot.record.expiry);

            self.currently_firing = Some(id);
            let start = self.clock.now_us();
            if let Some(cb) = callback.as_mut() {
                cb(self, id);
            }
            let elapsed = self.clock.now_us() - start;
            self.stats.record_timed(elapsed, latency_us);
            self.currently_firing = None;

            let cancel_requested = self.firing_no_rearm.take() == Some(id);
            if !cancel_requested {
                if let Some(next_expiry) = slot.record.rearmed_expiry(now) {
                    slot.record.expiry = next_expiry;
                    slot.record.registered_at = now;
                    slot.record.seq = self.seq.next();
                    slot.callback = callback;
                    self.timer_order.insert(order_key(id, &slot.record));
                    self.timers.insert(id, slot);
                }
            }

            fired_any = true;
            *budget -= 1;
        }
        fired_any
    }

    /// How long the scheduler may sleep: `None` means no timer is pending
    /// (sleep indefinitely), `Some(0)` means a timer is already due (don't
    /// sleep at all).
    fn next_sleep_duration(&self, now: MonotonicTime) -> Option<u64> {
        let (expiry_us, ..) = *self.timer_order.iter().next()?;
        if expiry_us <= now.as_micros() {
            Some(0)
        } else {
            Some(expiry_us - now.as_micros())
        }
    }

    /// Runs a single scheduler iteration: drains bounded work from both
    /// queues, fires at most one due timer, and sleeps if there was nothing
    /// to do.
    pub fn tick(&mut self) {
        self.stats.record_loop();
        let mut did_work = false;

        let mut high_budget = HIGH_PRIORITY_WORK_PER_ITER;
        while high_budget > 0 {
            let Some(item) = self.high.pop() else { break };
            did_work = true;
            high_budget -= 1;
            let start = self.clock.now_us();
            item.run(self);
            self.stats.record_work(self.clock.now_us() - start);
        }

        let mut low_budget = LOW_PRIORITY_WORK_PER_ITER;
        while low_budget > 0 {
            let Some(item) = self.low.pop() else { break };
            did_work = true;
            low_budget -= 1;
            let start = self.clock.now_us();
            item.run(self);
            self.stats.record_work(self.clock.now_us() - start);
        }

        let now = self.now_monotonic();
        let mut timer_budget = TIMERS_PER_ITER;
        if self.fire_due_timers(now, &mut timer_budget) {
            did_work = true;
        }

        if !did_work && self.high.is_empty() && self.low.is_empty() {
            match self.next_sleep_duration(now) {
                Some(0) => self.stats.record_skipped_sleep(),
                Some(us) => {
                    let start = self.clock.now_us();
                    self.semaphore.wait_timeout(us);
                    self.stats.record_sleep(self.clock.now_us() - start);
                }
                None => {
                    let start = self.clock.now_us();
                    self.semaphore.wait_timeout(u64::MAX);
                    self.stats.record_sleep(self.clock.now_us() - start);
                }
            }
        }
    }

    /// Runs [`Scheduler::tick`] until [`Scheduler::stop`] is called.
    pub fn run_forever(&mut self) {
        self.keep_running = true;
        while self.keep_running {
            self.tick();
        }
    }

    /// Runs [`Scheduler::tick`] until at least `duration_us` of monotonic
    /// time has elapsed. Intended for tests and bounded simulations.
    pub fn run_for(&mut self, duration_us: u64) {
        let start = self.clock.now_us();
        self.keep_running = true;
        while self.keep_running && self.clock.now_us() - start < duration_us {
            self.tick();
        }
        self.keep_running = false;
    }
}

impl<M, S, const HIGH_CAP: usize, const LOW_CAP: usize, const STATS_HIST: usize> SchedulerHandle
    for Scheduler<M, S, HIGH_CAP, LOW_CAP, STATS_HIST>
where
    M: MonotonicSource,
    S: SleepSemaphore,
{
    fn now(&self) -> MonotonicTime {
        self.now_monotonic()
    }

    fn queue_work(&mut self, label: Label, callback: WorkCallback) -> Result<(), WorkItem> {
        let result = self.high.push(WorkItem::new(label, callback));
        if result.is_ok() {
            self.semaphore.signal();
        }
        result
    }

    fn queue_low_priority_work(&mut self, label: Label, callback: WorkCallback) -> bool {
        let evicted = self.low.push(WorkItem::new(label, callback));
        if evicted {
            self.stats.record_low_priority_overflow();
        }
        self.semaphore.signal();
        evicted
    }

    fn clear_low_priority_by_label(&mut self, label: Label) -> u32 {
        self.low.clear_by_label(label)
    }

    fn register_timer(&mut self, spec: TimerSpec, callback: TimerCallback) -> TimerId {
        let id = self.register_timer_inner(spec, callback);
        self.semaphore.signal();
        id
    }

    fn cancel_timer(&mut self, id: TimerId) -> bool {
        self.cancel_timer_inner(id)
    }

    fn stats(&self) -> Stats {
        self.stats
    }
}

#[cfg(all(test, feature = "std"))]
pub(crate) mod tests {
    use super::*;
    use crate::semaphore::StdSemaphore;
    use alloc::rc::Rc;
    use core::cell::RefCell;
    use flare_time::StdMonotonicSource;

    /// A handle that discards every call, for tests of queue types that only
    /// need a valid `&mut dyn SchedulerHandle` to run a closure against.
    pub struct NullHandle;

    impl SchedulerHandle for NullHandle {
        fn now(&self) -> MonotonicTime {
            MonotonicTime::ZERO
        }
        fn queue_work(&mut self, _label: Label, _callback: WorkCallback) -> Result<(), WorkItem> {
            Ok(())
        }
        fn queue_low_priority_work(&mut self, _label: Label, _callback: WorkCallback) -> bool {
            false
        }
        fn clear_low_priority_by_label(&mut self, _label: Label) -> u32 {
            0
        }
        fn register_timer(&mut self, _spec: TimerSpec, _callback: TimerCallback) -> TimerId {
            TimerId(0)
        }
        fn cancel_timer(&mut self, _id: TimerId) -> bool {
            false
        }
        fn stats(&self) -> Stats {
            Stats::new()
        }
    }

    type TestScheduler = Scheduler<StdMonotonicSource, StdSemaphore, 8, 8, 4>;

    fn new_scheduler() -> TestScheduler {
        Scheduler::new(StdMonotonicSource::new(), StdSemaphore::new())
    }

    #[test]
    fn high_priority_work_runs_before_low_priority() {
        let mut sched = new_scheduler();
        let order: Rc<RefCell<heapless::Vec<&'static str, 4>>> = Rc::new(RefCell::new(heapless::Vec::new()));

        let order_low = order.clone();
        let low_cb: WorkCallback = Box::new(move |_h: &mut dyn SchedulerHandle| {
            let _ = order_low.borrow_mut().push("low");
        });
        sched.queue_low_priority_work(Label::from("low"), low_cb);

        let order_high = order.clone();
        let high_cb: WorkCallback = Box::new(move |_h: &mut dyn SchedulerHandle| {
            let _ = order_high.borrow_mut().push("high");
        });
        sched.queue_work(Label::from("high"), high_cb).unwrap();

        sched.tick();

        assert_eq!(order.borrow().as_slice(), &["high", "low"]);
    }

    #[test]
    fn timers_fire_in_expiry_then_registration_order() {
        let mut sched = new_scheduler();
        let fired: Rc<RefCell<heapless::Vec<&'static str, 4>>> = Rc::new(RefCell::new(heapless::Vec::new()));

        let fired_a = fired.clone();
        let cb_a: TimerCallback = Box::new(move |_h: &mut dyn SchedulerHandle, _id: TimerId| {
            let _ = fired_a.borrow_mut().push("a");
        });
        sched.register_timer(TimerSpec::timeout_in(2_000).named("a"), cb_a);

        let fired_b = fired.clone();
        let cb_b: TimerCallback = Box::new(move |_h: &mut dyn SchedulerHandle, _id: TimerId| {
            let _ = fired_b.borrow_mut().push("b");
        });
        sched.register_timer(TimerSpec::timeout_in(1_000).named("b"), cb_b);

        // Busy-wait until both timers are due; avoids depending on sleep
        // wake-up timing in the test.
        std::thread::sleep(std::time::Duration::from_millis(5));
        sched.tick();
        sched.tick();

        assert_eq!(fired.borrow().as_slice(), &["b", "a"]);
    }

    #[test]
    fn interval_timer_rearms_after_firing() {
        let mut sched = new_scheduler();
        let count = Rc::new(RefCell::new(0u32));
        let count_cb = count.clone();

        let cb: TimerCallback = Box::new(move |_h: &mut dyn SchedulerHandle, _id: TimerId| {
            *count_cb.borrow_mut() += 1;
        });
        sched.register_timer(TimerSpec::timeout_interval_rigid(1_000).named("tick"), cb);

        for _ in 0..5 {
            std::thread::sleep(std::time::Duration::from_millis(2));
            sched.tick();
        }

        assert!(*count.borrow() >= 2);
    }

    #[test]
    fn timer_can_cancel_itself_to_suppress_rearm() {
        let mut sched = new_scheduler();
        let count = Rc::new(RefCell::new(0u32));
        let count_cb = count.clone();

        let cb: TimerCallback = Box::new(move |h: &mut dyn SchedulerHandle, id: TimerId| {
            *count_cb.borrow_mut() += 1;
            if *count_cb.borrow() == 1 {
                h.cancel_timer(id);
            }
        });
        sched.register_timer(TimerSpec::timeout_interval(1_000).named("once-more"), cb);

        for _ in 0..5 {
            std::thread::sleep(std::time::Duration::from_millis(2));
            sched.tick();
        }

        assert_eq!(*count.borrow(), 1);
    }

    #[test]
    fn high_priority_queue_overflow_is_reported_to_caller() {
        let mut sched: Scheduler<StdMonotonicSource, StdSemaphore, 1, 8, 4> =
            Scheduler::new(StdMonotonicSource::new(), StdSemaphore::new());
        let noop: WorkCallback = Box::new(|_h: &mut dyn SchedulerHandle| {});
        assert!(sched.queue_work(Label::from("a"), noop).is_ok());
        let noop: WorkCallback = Box::new(|_h: &mut dyn SchedulerHandle| {});
        assert!(sched.queue_work(Label::from("b"), noop).is_err());
    }

    #[test]
    fn low_priority_overflow_is_counted_in_stats() {
        let mut sched: Scheduler<StdMonotonicSource, StdSemaphore, 8, 1, 4> =
            Scheduler::new(StdMonotonicSource::new(), StdSemaphore::new());
        let noop: WorkCallback = Box::new(|_h: &mut dyn SchedulerHandle| {});
        sched.queue_low_priority_work(Label::from("a"), noop);
        let noop: WorkCallback = Box::new(|_h: &mut dyn SchedulerHandle| {});
        sched.queue_low_priority_work(Label::from("b"), noop);
        assert_eq!(sched.stats().low_priority_overflow, 1);
    }

    #[test]
    fn clear_low_priority_by_label_removes_matching_items_only() {
        let mut sched = new_scheduler();
        let noop: WorkCallback = Box::new(|_h: &mut dyn SchedulerHandle| {});
        sched.queue_low_priority_work(Label::from("keep"), noop);
        let noop: WorkCallback = Box::new(|_h: &mut dyn SchedulerHandle| {});
        sched.queue_low_priority_work(Label::from("drop"), noop);
        let removed = sched.clear_low_priority_by_label(Label::from("drop"));
        assert_eq!(removed, 1);
        assert_eq!(sched.low.len(), 1);
    }
}
