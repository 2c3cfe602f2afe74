//! High- and low-priority work queues: the only channel through which
//! interrupt context (or any other preemptive context) is allowed to hand
//! work to the scheduler's main thread.

use flare_util::label::Label;
use heapless::Deque;

use crate::scheduler::{SchedulerHandle, WorkCallback};

/// One deferred unit of work: a human-readable label plus the closure to run.
pub struct WorkItem {
    pub label: Label,
    pub(crate) callback: WorkCallback,
}

impl WorkItem {
    pub fn new(label: Label, callback: WorkCallback) -> Self {
        Self { label, callback }
    }

    pub(crate) fn run(self, handle: &mut dyn SchedulerHandle) {
        (self.callback)(handle)
    }
}

impl core::fmt::Debug for WorkItem {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("WorkItem").field("label", &self.label).finish()
    }
}

/// High-priority work queue: fixed capacity, overflow is rejected rather than
/// silently dropped so the caller can decide how to handle backpressure.
pub struct HighPriorityQueue<const N: usize> {
    items: Deque<WorkItem, N>,
}

impl<const N: usize> HighPriorityQueue<N> {
    pub const fn new() -> Self {
        Self { items: Deque::new() }
    }

    /// Enqueues `item`. On failure, returns the item back to the caller so it
    /// is never silently lost.
    pub fn push(&mut self, item: WorkItem) -> Result<(), WorkItem> {
        self.items.push_back(item)
    }

    pub fn pop(&mut self) -> Option<WorkItem> {
        self.items.pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<const N: usize> Default for HighPriorityQueue<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Low-priority work queue: fixed capacity, overflow silently evicts the
/// oldest entry. Callers that care track drops via [`crate::Stats::low_priority_overflow`].
pub struct LowPriorityQueue<const N: usize> {
    items: Deque<WorkItem, N>,
}

impl<const N: usize> LowPriorityQueue<N> {
    pub const fn new() -> Self {
        Self { items: Deque::new() }
    }

    /// Enqueues `item`, evicting the oldest entry if the queue is full.
    /// Returns `true` if an eviction occurred.
    pub fn push(&mut self, item: WorkItem) -> bool {
        let evicted = if self.items.is_full() {
            self.items.pop_front();
            true
        } else {
            false
        };
        // Capacity was just freed (or was never exhausted), so this cannot fail.
        let _ = self.items.push_back(item);
        evicted
    }

    pub fn pop(&mut self) -> Option<WorkItem> {
        self.items.pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Removes every pending item whose label equals `label`. Returns the
    /// number of items removed.
    pub fn clear_by_label(&mut self, label: Label) -> u32 {
        let mut removed = 0u32;
        let mut kept: Deque<WorkItem, N> = Deque::new();
        while let Some(item) = self.items.pop_front() {
            if item.label == label {
                removed += 1;
            } else {
                let _ = kept.push_back(item);
            }
        }
        self.items = kept;
        removed
    }
}

impl<const N: usize> Default for LowPriorityQueue<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Pushes `item` into a high-priority queue shared with interrupt context.
///
/// This is the only sanctioned way for an ISR to hand work to the scheduler:
/// the queue lives behind a [`critical_section::Mutex`] and the push happens
/// inside a short critical section, never by reaching into the scheduler's
/// state directly.
pub fn push_high_priority_from_isr<const N: usize>(
    queue: &critical_section::Mutex<core::cell::RefCell<HighPriorityQueue<N>>>,
    item: WorkItem,
) -> Result<(), WorkItem> {
    critical_section::with(|cs| queue.borrow(cs).borrow_mut().push(item))
}

/// The interrupt-context counterpart of [`push_high_priority_from_isr`] for
/// the low-priority queue.
pub fn push_low_priority_from_isr<const N: usize>(
    queue: &critical_section::Mutex<core::cell::RefCell<LowPriorityQueue<N>>>,
    item: WorkItem,
) -> bool {
    critical_section::with(|cs| queue.borrow(cs).borrow_mut().push(item))
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;
    use crate::scheduler::tests::NullHandle;
    use alloc::boxed::Box;

    fn item(label: &'static str) -> WorkItem {
        let cb: WorkCallback = Box::new(|_h: &mut dyn SchedulerHandle| {});
        WorkItem::new(Label::from(label), cb)
    }

    #[test]
    fn high_priority_queue_rejects_overflow() {
        let mut q: HighPriorityQueue<2> = HighPriorityQueue::new();
        assert!(q.push(item("a")).is_ok());
        assert!(q.push(item("b")).is_ok());
        assert!(q.push(item("c")).is_err());
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn low_priority_queue_evicts_oldest_on_overflow() {
        let mut q: LowPriorityQueue<2> = LowPriorityQueue::new();
        assert!(!q.push(item("a")));
        assert!(!q.push(item("b")));
        assert!(q.push(item("c")));
        let mut handle = NullHandle;
        let first = q.pop().unwrap();
        assert_eq!(first.label, Label::from("b"));
        first.run(&mut handle);
    }

    #[test]
    fn isr_push_reaches_the_queue_through_a_critical_section() {
        let queue: critical_section::Mutex<core::cell::RefCell<HighPriorityQueue<2>>> =
            critical_section::Mutex::new(core::cell::RefCell::new(HighPriorityQueue::new()));
        assert!(push_high_priority_from_isr(&queue, item("from-isr")).is_ok());
        critical_section::with(|cs| {
            assert_eq!(queue.borrow(cs).borrow().len(), 1);
        });
    }

    #[test]
    fn low_priority_queue_clears_by_label() {
        let mut q: LowPriorityQueue<4> = LowPriorityQueue::new();
        q.push(item("keep"));
        q.push(item("drop"));
        q.push(item("drop"));
        q.push(item("keep"));
        let removed = q.clear_by_label(Label::from("drop"));
        assert_eq!(removed, 2);
        assert_eq!(q.len(), 2);
    }
}
