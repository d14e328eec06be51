use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;
use std::sync::{Arc, Mutex, PoisonError};

use futures::task::ArcWake;

use crate::entity::ProcessId;

/// Lifecycle of a spawned process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessState {
    /// Not yet completed: either waiting for its first poll or suspended at
    /// an await point. A process still pending when the run ends is
    /// quiescent, not failed.
    Pending,
    /// The computation ran to completion.
    Finished,
    /// The computation returned an error; the message is kept.
    Failed(String),
}

/// Handle to a spawned process.
///
/// Holding a handle does not keep the process alive or affect scheduling.
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    id: ProcessId,
    name: Rc<str>,
    state: Rc<RefCell<ProcessState>>,
}

impl ProcessHandle {
    pub(crate) fn new(id: ProcessId, name: Rc<str>, state: Rc<RefCell<ProcessState>>) -> Self {
        Self { id, name, state }
    }

    /// The process identifier (allocated in spawn order).
    pub fn id(&self) -> ProcessId {
        self.id
    }

    /// The name given at spawn time.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Snapshot of the current lifecycle state.
    pub fn state(&self) -> ProcessState {
        self.state.borrow().clone()
    }

    /// `true` once the computation has completed successfully.
    pub fn is_finished(&self) -> bool {
        *self.state.borrow() == ProcessState::Finished
    }

    /// `true` if the computation returned an error.
    pub fn is_failed(&self) -> bool {
        matches!(*self.state.borrow(), ProcessState::Failed(_))
    }

    /// `true` while the process has neither finished nor failed.
    pub fn is_pending(&self) -> bool {
        *self.state.borrow() == ProcessState::Pending
    }
}

impl fmt::Display for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}

/// FIFO of processes to poll. Shared with wakers, hence `Arc<Mutex<_>>`,
/// although only the executor thread ever touches it.
pub(crate) type ReadyQueue = Arc<Mutex<VecDeque<ProcessId>>>;

pub(crate) fn lock_ready(ready: &ReadyQueue) -> std::sync::MutexGuard<'_, VecDeque<ProcessId>> {
    ready.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Waker that re-queues its process. Duplicate wakes collapse into one poll.
pub(crate) struct ProcessWaker {
    pub(crate) id: ProcessId,
    pub(crate) ready: ReadyQueue,
}

impl ArcWake for ProcessWaker {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        let mut ready = lock_ready(&arc_self.ready);
        if !ready.contains(&arc_self.id) {
            ready.push_back(arc_self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn waker_collapses_duplicate_wakes() {
        let ready: ReadyQueue = Arc::new(Mutex::new(VecDeque::new()));
        let waker = futures::task::waker(Arc::new(ProcessWaker {
            id: ProcessId(7),
            ready: Arc::clone(&ready),
        }));
        waker.wake_by_ref();
        waker.wake_by_ref();
        assert_eq!(lock_ready(&ready).len(), 1);
    }

    #[test]
    fn handle_reports_state_changes() {
        let state = Rc::new(RefCell::new(ProcessState::Pending));
        let handle = ProcessHandle::new(ProcessId(1), Rc::from("vessel"), Rc::clone(&state));
        assert!(handle.is_pending());
        *state.borrow_mut() = ProcessState::Failed("boom".into());
        assert!(handle.is_failed());
        assert_eq!(handle.to_string(), "vessel (p1)");
    }
}
