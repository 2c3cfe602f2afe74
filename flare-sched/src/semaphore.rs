//! The semaphore the scheduler blocks on when it has no high-priority work,
//! no low-priority work, and no timer due before some future instant.
//!
//! Interrupt context (or any other preemptive producer) signals the
//! semaphore after pushing a [`crate::WorkItem`] so the main thread wakes
//! promptly instead of sleeping out the rest of its timeout.

/// Why [`SleepSemaphore::wait_timeout`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeReason {
    /// Someone called `signal()` before the timeout elapsed.
    Signaled,
    /// The timeout elapsed with no signal.
    TimedOut,
}

/// Abstraction over whatever blocking primitive the platform provides: a
/// `WFE`/event-register pair on Cortex-M, a condvar on a hosted build, or a
/// no-op busy-wait in a unit test.
pub trait SleepSemaphore {
    /// Marks the semaphore as signaled, waking one pending or future waiter.
    fn signal(&self);

    /// Blocks until signaled or until `timeout_us` elapses, whichever comes
    /// first. A `timeout_us` of `0` must return immediately.
    fn wait_timeout(&self, timeout_us: u64) -> WakeReason;
}

#[cfg(feature = "std")]
pub use self::std_impl::StdSemaphore;

#[cfg(feature = "std")]
mod std_impl {
    use super::{SleepSemaphore, WakeReason};
    use std::sync::{Condvar, Mutex};
    use std::time::Duration;

    /// A [`SleepSemaphore`] backed by a `Condvar`/`Mutex` pair, for hosted
    /// builds and tests. Latches a signal that arrives before anyone is
    /// waiting, so `signal()` followed by `wait_timeout()` never blocks.
    pub struct StdSemaphore {
        state: Mutex<bool>,
        condvar: Condvar,
    }

    impl StdSemaphore {
        pub fn new() -> Self {
            Self {
                state: Mutex::new(false),
                condvar: Condvar::new(),
            }
        }
    }

    impl Default for StdSemaphore {
        fn default() -> Self {
            Self::new()
        }
    }

    impl SleepSemaphore for StdSemaphore {
        fn signal(&self) {
            let mut signaled = self.state.lock().unwrap();
            *signaled = true;
            self.condvar.notify_one();
        }

        fn wait_timeout(&self, timeout_us: u64) -> WakeReason {
            let mut signaled = self.state.lock().unwrap();
            if *signaled {
                *signaled = false;
                return WakeReason::Signaled;
            }
            if timeout_us == 0 {
                return WakeReason::TimedOut;
            }
            let (mut guard, result) = self
                .condvar
                .wait_timeout(signaled, Duration::from_micros(timeout_us))
                .unwrap();
            if *guard {
                *guard = false;
                WakeReason::Signaled
            } else if result.timed_out() {
                WakeReason::TimedOut
            } else {
                // Spuriously woken with no signal pending: treat as a timeout
                // so the caller re-evaluates scheduler state.
                WakeReason::TimedOut
            }
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use std::sync::Arc;
        use std::thread;

        #[test]
        fn signal_before_wait_is_not_lost() {
            let sem = StdSemaphore::new();
            sem.signal();
            assert_eq!(sem.wait_timeout(1_000_000), WakeReason::Signaled);
        }

        #[test]
        fn wait_times_out_without_signal() {
            let sem = StdSemaphore::new();
            assert_eq!(sem.wait_timeout(1_000), WakeReason::TimedOut);
        }

        #[test]
        fn signal_from_another_thread_wakes_waiter() {
            let sem = Arc::new(StdSemaphore::new());
            let sem2 = sem.clone();
            let handle = thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                sem2.signal();
            });
            let reason = sem.wait_timeout(5_000_000);
            handle.join().unwrap();
            assert_eq!(reason, WakeReason::Signaled);
        }
    }
}
