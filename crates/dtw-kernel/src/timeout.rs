use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TimerState {
    Armed,
    Fired,
    Cancelled,
}

#[derive(Debug)]
pub(crate) struct TimerShared {
    state: Cell<TimerState>,
    waker: RefCell<Option<Waker>>,
}

impl TimerShared {
    pub(crate) fn new() -> Self {
        Self {
            state: Cell::new(TimerState::Armed),
            waker: RefCell::new(None),
        }
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.state.get() == TimerState::Cancelled
    }

    pub(crate) fn is_armed(&self) -> bool {
        self.state.get() == TimerState::Armed
    }

    pub(crate) fn fire(&self) {
        self.state.set(TimerState::Fired);
        let waker = self.waker.borrow_mut().take();
        if let Some(waker) = waker {
            waker.wake();
        }
    }
}

/// An entry of the clock's event queue.
///
/// Ordered so that a `BinaryHeap` pops the earliest fire time first, with
/// ties broken by creation sequence (FIFO).
#[derive(Debug)]
pub(crate) struct TimerEntry {
    pub(crate) at: f64,
    pub(crate) seq: u64,
    pub(crate) shared: Rc<TimerShared>,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for TimerEntry {}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .at
            .total_cmp(&self.at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// A clock-timed wait, created by [`Environment::timeout`](crate::Environment::timeout).
///
/// The fire time is fixed and queued when the timeout is created. Dropping a
/// timeout before it fires cancels it: it never advances the clock.
#[derive(Debug)]
#[must_use = "a timeout does nothing unless awaited"]
pub struct Timeout {
    at: f64,
    shared: Rc<TimerShared>,
}

impl Timeout {
    pub(crate) fn new(at: f64, shared: Rc<TimerShared>) -> Self {
        Self { at, shared }
    }

    /// The virtual time at which this timeout fires.
    pub fn deadline(&self) -> f64 {
        self.at
    }

    /// `true` once the clock has reached the deadline.
    pub fn has_fired(&self) -> bool {
        self.shared.state.get() == TimerState::Fired
    }
}

impl Future for Timeout {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.has_fired() {
            return Poll::Ready(());
        }
        *self.shared.waker.borrow_mut() = Some(cx.waker().clone());
        Poll::Pending
    }
}

impl Drop for Timeout {
    fn drop(&mut self) {
        if self.shared.is_armed() {
            self.shared.state.set(TimerState::Cancelled);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BinaryHeap;

    fn entry(at: f64, seq: u64) -> TimerEntry {
        TimerEntry {
            at,
            seq,
            shared: Rc::new(TimerShared::new()),
        }
    }

    #[test]
    fn heap_pops_earliest_then_fifo() {
        let mut heap = BinaryHeap::new();
        heap.push(entry(5.0, 0));
        heap.push(entry(1.0, 1));
        heap.push(entry(5.0, 2));
        heap.push(entry(1.0, 3));

        let order: Vec<(f64, u64)> = std::iter::from_fn(|| heap.pop())
            .map(|e| (e.at, e.seq))
            .collect();
        assert_eq!(order, vec![(1.0, 1), (1.0, 3), (5.0, 0), (5.0, 2)]);
    }

    #[test]
    fn dropping_armed_timeout_cancels_it() {
        let shared = Rc::new(TimerShared::new());
        let timeout = Timeout::new(3.0, Rc::clone(&shared));
        assert_eq!(timeout.deadline(), 3.0);
        drop(timeout);
        assert!(shared.is_cancelled());
    }

    #[test]
    fn fired_timeout_stays_fired_after_drop() {
        let shared = Rc::new(TimerShared::new());
        let timeout = Timeout::new(1.0, Rc::clone(&shared));
        shared.fire();
        assert!(timeout.has_fired());
        drop(timeout);
        assert!(!shared.is_cancelled());
    }
}
