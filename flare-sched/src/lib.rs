//! The cooperative, single-threaded event scheduler.
//!
//! [`Scheduler`] owns the main thread. It multiplexes a high-priority and a
//! low-priority [`WorkItem`] queue against an ordered set of [`Timer`]s and
//! blocks on a [`SleepSemaphore`] when there is nothing left to do. This is
//! the only way interrupt context or preemptive threads are allowed to run
//! code on the main thread: they enqueue a [`WorkItem`] and signal the
//! semaphore (see [`SchedulerHandle`]).

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

pub mod queue;
pub mod scheduler;
pub mod semaphore;
pub mod stats;
pub mod timer;

pub use flare_time::MonotonicTime;
pub use flare_util::label::Label;

pub use queue::WorkItem;
pub use scheduler::{Scheduler, SchedulerHandle, TimerCallback, WorkCallback};
pub use semaphore::{SleepSemaphore, WakeReason};
pub use stats::{Stats, StatsSnapshot};
pub use timer::{Rearm, TimerId, TimerSpec};
