use std::cell::{Cell, Ref, RefCell};
use std::collections::{BTreeMap, BinaryHeap, VecDeque};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use chrono::{DateTime, Utc};
use tracing::{debug, error, trace};

use crate::clock::SimClock;
use crate::config::SimConfig;
use crate::entity::{EntityId, ProcessId, ResourceId};
use crate::error::{SimError, SimResult};
use crate::event::{EventLog, EventSink, SimEvent, SimEventKind};
use crate::process::{ProcessHandle, ProcessState, ProcessWaker, ReadyQueue, lock_ready};
use crate::timeout::{Timeout, TimerEntry, TimerShared};

type BoxedProcess = Pin<Box<dyn Future<Output = ()>>>;

struct ProcessSlot {
    name: Rc<str>,
    /// `None` while the future is being polled.
    future: Option<BoxedProcess>,
    state: Rc<RefCell<ProcessState>>,
}

/// Summary of a call to [`Environment::run`] or [`Environment::run_until`].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RunStats {
    /// Timers that fired during the call.
    pub events_fired: u64,
    /// Process polls performed during the call.
    pub polls: u64,
    /// Processes that completed successfully during the call.
    pub finished: u64,
    /// Processes that returned an error during the call.
    pub failed: u64,
    /// Processes still suspended when the call returned.
    pub suspended: usize,
    /// Virtual time when the call returned.
    pub final_time: f64,
}

struct Inner {
    clock: RefCell<SimClock>,
    timers: RefCell<BinaryHeap<TimerEntry>>,
    next_seq: Cell<u64>,
    processes: RefCell<BTreeMap<ProcessId, ProcessSlot>>,
    next_process: Cell<u64>,
    next_resource: Cell<u64>,
    ready: ReadyQueue,
    events: RefCell<EventLog>,
    sinks: RefCell<Vec<Box<dyn EventSink>>>,
}

/// The simulation environment: virtual clock, event queue and process executor.
///
/// Cheap to clone; clones share the same state. All processes run on the
/// thread that calls [`run`](Self::run) and interleave only at await points,
/// so between two awaits a process observes and mutates state atomically.
///
/// Within one instant, processes are polled in the order they became ready;
/// timers with equal fire times fire in creation order. The clock only moves
/// when no process is ready.
#[derive(Clone)]
pub struct Environment {
    inner: Rc<Inner>,
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environment")
            .field("now", &self.now())
            .field("processes", &self.inner.processes.borrow().len())
            .field("timers", &self.inner.timers.borrow().len())
            .field("events", &self.inner.events.borrow().len())
            .finish()
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new(SimConfig::default())
    }
}

impl Environment {
    /// Create an environment at time 0 of the configured epoch.
    pub fn new(config: SimConfig) -> Self {
        Self {
            inner: Rc::new(Inner {
                clock: RefCell::new(SimClock::new(config.epoch)),
                timers: RefCell::new(BinaryHeap::new()),
                next_seq: Cell::new(0),
                processes: RefCell::new(BTreeMap::new()),
                next_process: Cell::new(0),
                next_resource: Cell::new(0),
                ready: Arc::new(Mutex::new(VecDeque::new())),
                events: RefCell::new(EventLog::new(config.max_events)),
                sinks: RefCell::new(Vec::new()),
            }),
        }
    }

    /// Current virtual time in seconds since the epoch.
    pub fn now(&self) -> f64 {
        self.inner.clock.borrow().now()
    }

    /// The date virtual time 0 corresponds to.
    pub fn epoch(&self) -> DateTime<Utc> {
        self.inner.clock.borrow().epoch()
    }

    /// Current virtual time as an absolute date.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.inner.clock.borrow().timestamp()
    }

    /// Virtual offset of an absolute date.
    pub fn offset_of(&self, date: DateTime<Utc>) -> f64 {
        self.inner.clock.borrow().offset_of(date)
    }

    /// Absolute date of a virtual offset.
    pub fn date_of(&self, offset: f64) -> DateTime<Utc> {
        self.inner.clock.borrow().date_of(offset)
    }

    /// A wait that completes `delay` seconds from now.
    ///
    /// A zero delay still yields: the timeout fires at the current instant,
    /// after every process already ready has run.
    pub fn timeout(&self, delay: f64) -> SimResult<Timeout> {
        if !delay.is_finite() || delay < 0.0 {
            return Err(SimError::InvalidDelay(delay));
        }
        Ok(self.arm(self.now() + delay))
    }

    /// A wait that completes at absolute virtual time `time`.
    ///
    /// Instants in the past fire at the current instant.
    pub fn timeout_at(&self, time: f64) -> SimResult<Timeout> {
        if !time.is_finite() {
            return Err(SimError::InvalidDelay(time));
        }
        Ok(self.arm(time.max(self.now())))
    }

    fn arm(&self, at: f64) -> Timeout {
        let seq = self.inner.next_seq.get();
        self.inner.next_seq.set(seq + 1);
        let shared = Rc::new(TimerShared::new());
        self.inner.timers.borrow_mut().push(TimerEntry {
            at,
            seq,
            shared: Rc::clone(&shared),
        });
        Timeout::new(at, shared)
    }

    /// Run `action` once the clock reaches `time`.
    pub fn schedule_at<F>(&self, time: f64, action: F) -> SimResult<ProcessHandle>
    where
        F: FnOnce(&Environment) + 'static,
    {
        let timeout = self.timeout_at(time)?;
        let env = self.clone();
        Ok(self.spawn("scheduled", async move {
            timeout.await;
            action(&env);
        }))
    }

    /// Run `action` after `delay` seconds.
    pub fn schedule_after<F>(&self, delay: f64, action: F) -> SimResult<ProcessHandle>
    where
        F: FnOnce(&Environment) + 'static,
    {
        let timeout = self.timeout(delay)?;
        let env = self.clone();
        Ok(self.spawn("scheduled", async move {
            timeout.await;
            action(&env);
        }))
    }

    /// Register an infallible process. It first runs at the current instant.
    pub fn spawn<F>(&self, name: impl Into<String>, future: F) -> ProcessHandle
    where
        F: Future<Output = ()> + 'static,
    {
        let name: Rc<str> = Rc::from(name.into());
        let state = Rc::new(RefCell::new(ProcessState::Pending));
        self.insert(name, state, Box::pin(future))
    }

    /// Register a fallible process.
    ///
    /// An error ends the process and marks it [`ProcessState::Failed`]; other
    /// processes keep running.
    pub fn process<F, E>(&self, name: impl Into<String>, future: F) -> ProcessHandle
    where
        F: Future<Output = Result<(), E>> + 'static,
        E: fmt::Display + 'static,
    {
        let name: Rc<str> = Rc::from(name.into());
        let state = Rc::new(RefCell::new(ProcessState::Pending));
        let wrapped = {
            let name = Rc::clone(&name);
            let state = Rc::clone(&state);
            async move {
                if let Err(err) = future.await {
                    let message = err.to_string();
                    error!(process = %name, error = %message, "process failed");
                    *state.borrow_mut() = ProcessState::Failed(message);
                }
            }
        };
        self.insert(name, state, Box::pin(wrapped))
    }

    fn insert(
        &self,
        name: Rc<str>,
        state: Rc<RefCell<ProcessState>>,
        future: BoxedProcess,
    ) -> ProcessHandle {
        let id = ProcessId(self.inner.next_process.get());
        self.inner.next_process.set(id.0 + 1);
        trace!(process = %name, %id, "process spawned");
        self.inner.processes.borrow_mut().insert(
            id,
            ProcessSlot {
                name: Rc::clone(&name),
                future: Some(future),
                state: Rc::clone(&state),
            },
        );
        lock_ready(&self.inner.ready).push_back(id);
        ProcessHandle::new(id, name, state)
    }

    /// Run until no process is ready and the event queue is empty.
    ///
    /// Processes still suspended afterwards are quiescent: they wait on
    /// something that will never happen. That is a normal outcome.
    pub fn run(&self) -> RunStats {
        self.run_until(f64::INFINITY)
    }

    /// Run until the queue is exhausted or the next event lies beyond
    /// `until`. The clock then rests at `until` (when finite).
    pub fn run_until(&self, until: f64) -> RunStats {
        let mut stats = RunStats::default();
        loop {
            self.poll_ready(&mut stats);
            let Some(entry) = self.pop_timer(until) else {
                break;
            };
            let elapsed = self.inner.clock.borrow_mut().advance_to(entry.at);
            if elapsed > 0.0 {
                trace!(now = entry.at, "clock advanced");
            }
            entry.shared.fire();
            stats.events_fired += 1;
        }
        if until.is_finite() {
            self.inner.clock.borrow_mut().advance_to(until);
        }
        stats.suspended = self.inner.processes.borrow().len();
        stats.final_time = self.now();
        debug!(
            now = stats.final_time,
            fired = stats.events_fired,
            finished = stats.finished,
            failed = stats.failed,
            suspended = stats.suspended,
            "run returned"
        );
        stats
    }

    fn pop_timer(&self, until: f64) -> Option<TimerEntry> {
        let mut timers = self.inner.timers.borrow_mut();
        loop {
            let (cancelled, at) = match timers.peek() {
                Some(head) => (head.shared.is_cancelled(), head.at),
                None => return None,
            };
            if cancelled {
                timers.pop();
                continue;
            }
            if at > until {
                return None;
            }
            return timers.pop();
        }
    }

    fn poll_ready(&self, stats: &mut RunStats) {
        loop {
            let next = lock_ready(&self.inner.ready).pop_front();
            let Some(id) = next else {
                return;
            };

            // Take the future out so the process may freely spawn or wake
            // others while it runs.
            let taken = self
                .inner
                .processes
                .borrow_mut()
                .get_mut(&id)
                .and_then(|slot| slot.future.take());
            let Some(mut future) = taken else {
                continue;
            };

            let waker = futures::task::waker(Arc::new(ProcessWaker {
                id,
                ready: Arc::clone(&self.inner.ready),
            }));
            let mut cx = Context::from_waker(&waker);
            stats.polls += 1;

            match future.as_mut().poll(&mut cx) {
                Poll::Ready(()) => {
                    let removed = self.inner.processes.borrow_mut().remove(&id);
                    if let Some(slot) = removed {
                        let mut state = slot.state.borrow_mut();
                        if *state == ProcessState::Pending {
                            *state = ProcessState::Finished;
                            stats.finished += 1;
                        } else {
                            stats.failed += 1;
                        }
                        trace!(process = %slot.name, %id, "process ended");
                    }
                }
                Poll::Pending => {
                    let mut processes = self.inner.processes.borrow_mut();
                    if let Some(slot) = processes.get_mut(&id) {
                        slot.future = Some(future);
                    }
                }
            }
        }
    }

    /// Names of processes that have not completed.
    pub fn suspended_processes(&self) -> Vec<String> {
        self.inner
            .processes
            .borrow()
            .values()
            .map(|slot| slot.name.to_string())
            .collect()
    }

    /// Number of timers still waiting to fire.
    pub fn pending_timers(&self) -> usize {
        self.inner
            .timers
            .borrow()
            .iter()
            .filter(|entry| entry.shared.is_armed())
            .count()
    }

    /// Allocate an identifier for a new resource.
    pub(crate) fn next_resource_id(&self) -> ResourceId {
        let id = ResourceId(self.inner.next_resource.get());
        self.inner.next_resource.set(id.0 + 1);
        id
    }

    /// Emit a telemetry record stamped with the current time.
    ///
    /// The record goes to the event log, every registered sink, and the
    /// `tracing` subscriber at debug level.
    pub fn record(&self, entity: EntityId, kind: SimEventKind, description: impl Into<String>) {
        let event = SimEvent::new(self.now(), entity, kind, description);
        debug!(
            time = event.time,
            entity = %event.entity,
            kind = event.kind.name(),
            "{}",
            event.description
        );
        for sink in self.inner.sinks.borrow_mut().iter_mut() {
            sink.record(&event);
        }
        self.inner.events.borrow_mut().push(event);
    }

    /// Register an additional telemetry sink.
    pub fn add_sink(&self, sink: Box<dyn EventSink>) {
        self.inner.sinks.borrow_mut().push(sink);
    }

    /// Borrow the event log.
    ///
    /// Do not hold the borrow across an await point.
    pub fn events(&self) -> Ref<'_, EventLog> {
        self.inner.events.borrow()
    }
}
