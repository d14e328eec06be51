use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

use tracing::trace;

use crate::entity::EntityId;
use crate::environment::Environment;
use crate::error::{SimError, SimResult};
use crate::event::SimEventKind;

/// Whether a pending request adds or removes material.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Adds material; needs room.
    Put,
    /// Removes material; needs content.
    Get,
}

/// Relative slack absorbing the last-bit rounding of a request that asks
/// for exactly the remaining room or content. Anything larger waits.
const ROUNDING: f64 = 4.0 * f64::EPSILON;

#[derive(Debug)]
struct PendingOp {
    amount: f64,
    done: Cell<bool>,
    waker: RefCell<Option<Waker>>,
}

#[derive(Debug, Default)]
struct ContainerState {
    level: f64,
    puts: VecDeque<Rc<PendingOp>>,
    gets: VecDeque<Rc<PendingOp>>,
    watchers: Vec<Rc<Watcher>>,
}

#[derive(Debug, Default)]
struct Watcher {
    fired: Cell<bool>,
    waker: RefCell<Option<Waker>>,
}

struct ContainerInner {
    capacity: f64,
    owner: Cell<EntityId>,
    env: Environment,
    state: RefCell<ContainerState>,
}

/// A bounded store of a scalar quantity with blocking, all-or-nothing
/// `put`/`get`.
///
/// Pending puts and pending gets each form a FIFO queue. A request at the
/// head of its queue that cannot be satisfied blocks every request behind it.
/// Cloning yields another handle to the same container.
#[derive(Clone)]
pub struct Container {
    inner: Rc<ContainerInner>,
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.borrow();
        f.debug_struct("Container")
            .field("level", &state.level)
            .field("capacity", &self.inner.capacity)
            .field("pending_puts", &state.puts.len())
            .field("pending_gets", &state.gets.len())
            .finish()
    }
}

impl Container {
    /// Create a container holding `level` out of `capacity`.
    pub fn new(env: &Environment, capacity: f64, level: f64) -> SimResult<Self> {
        if !capacity.is_finite() || capacity <= 0.0 {
            return Err(SimError::InvalidConfiguration(format!(
                "container capacity must be finite and positive, got {capacity}"
            )));
        }
        if !level.is_finite() || !(0.0..=capacity).contains(&level) {
            return Err(SimError::InvalidConfiguration(format!(
                "container level {level} outside [0, {capacity}]"
            )));
        }
        Ok(Self {
            inner: Rc::new(ContainerInner {
                capacity,
                owner: Cell::new(EntityId::new()),
                env: env.clone(),
                state: RefCell::new(ContainerState {
                    level,
                    ..ContainerState::default()
                }),
            }),
        })
    }

    /// Attribute telemetry records of this container to `owner`.
    pub fn with_owner(self, owner: EntityId) -> Self {
        self.inner.owner.set(owner);
        self
    }

    /// The entity telemetry is attributed to.
    pub fn owner(&self) -> EntityId {
        self.inner.owner.get()
    }

    /// Current content.
    pub fn level(&self) -> f64 {
        self.inner.state.borrow().level
    }

    /// Maximum content.
    pub fn capacity(&self) -> f64 {
        self.inner.capacity
    }

    /// Free room: `capacity - level`.
    pub fn room(&self) -> f64 {
        self.inner.capacity - self.level()
    }

    /// `level / capacity`, in `[0, 1]`.
    pub fn fill_fraction(&self) -> f64 {
        self.level() / self.inner.capacity
    }

    /// Number of puts waiting for room.
    pub fn pending_puts(&self) -> usize {
        self.inner.state.borrow().puts.len()
    }

    /// Number of gets waiting for content.
    pub fn pending_gets(&self) -> usize {
        self.inner.state.borrow().gets.len()
    }

    /// Add `amount` once there is room for all of it.
    pub fn put(&self, amount: f64) -> SimResult<ContainerRequest> {
        self.enqueue(Direction::Put, amount)
    }

    /// Remove `amount` once all of it is present.
    pub fn get(&self, amount: f64) -> SimResult<ContainerRequest> {
        self.enqueue(Direction::Get, amount)
    }

    /// Resolves on the next change of level. Dropping the watch before then
    /// unregisters it.
    pub fn changed(&self) -> LevelChanged {
        let watcher = Rc::new(Watcher::default());
        self.inner
            .state
            .borrow_mut()
            .watchers
            .push(Rc::clone(&watcher));
        LevelChanged {
            container: self.clone(),
            watcher,
        }
    }

    /// Number of registered level watches that have not fired yet.
    pub fn pending_watches(&self) -> usize {
        self.inner.state.borrow().watchers.len()
    }

    fn enqueue(&self, direction: Direction, amount: f64) -> SimResult<ContainerRequest> {
        if !amount.is_finite() || amount < 0.0 {
            return Err(SimError::InvalidAmount(amount));
        }
        let op = Rc::new(PendingOp {
            amount,
            done: Cell::new(false),
            waker: RefCell::new(None),
        });
        {
            let mut state = self.inner.state.borrow_mut();
            match direction {
                Direction::Put => state.puts.push_back(Rc::clone(&op)),
                Direction::Get => state.gets.push_back(Rc::clone(&op)),
            }
        }
        self.admit();
        Ok(ContainerRequest {
            container: self.clone(),
            direction,
            op: Some(op),
        })
    }

    /// Satisfy the satisfiable head-runs of both queues until neither moves.
    fn admit(&self) {
        let mut satisfied = Vec::new();
        let mut watchers = Vec::new();
        let level = {
            let mut state = self.inner.state.borrow_mut();
            let capacity = self.inner.capacity;
            let slack = capacity * ROUNDING;
            let before = state.level;
            loop {
                let mut progressed = false;
                while let Some(amount) = state.puts.front().map(|op| op.amount) {
                    if state.level + amount > capacity + slack {
                        break;
                    }
                    state.level = (state.level + amount).min(capacity);
                    if let Some(op) = state.puts.pop_front() {
                        satisfied.push(op);
                    }
                    progressed = true;
                }
                while let Some(amount) = state.gets.front().map(|op| op.amount) {
                    if amount > state.level + slack {
                        break;
                    }
                    state.level = (state.level - amount).max(0.0);
                    if let Some(op) = state.gets.pop_front() {
                        satisfied.push(op);
                    }
                    progressed = true;
                }
                if !progressed {
                    break;
                }
            }
            if state.level != before {
                watchers = std::mem::take(&mut state.watchers);
            }
            (state.level != before).then_some(state.level)
        };

        if let Some(level) = level {
            trace!(owner = %self.owner(), level, "level changed");
            self.inner.env.record(
                self.owner(),
                SimEventKind::LevelChanged {
                    level,
                    capacity: self.inner.capacity,
                },
                format!("level {level}/{}", self.inner.capacity),
            );
        }
        for op in satisfied {
            op.done.set(true);
            let waker = op.waker.borrow_mut().take();
            if let Some(waker) = waker {
                waker.wake();
            }
        }
        for watcher in watchers {
            watcher.fired.set(true);
            let waker = watcher.waker.borrow_mut().take();
            if let Some(waker) = waker {
                waker.wake();
            }
        }
    }

    fn withdraw(&self, direction: Direction, op: &Rc<PendingOp>) {
        {
            let mut state = self.inner.state.borrow_mut();
            let queue = match direction {
                Direction::Put => &mut state.puts,
                Direction::Get => &mut state.gets,
            };
            queue.retain(|queued| !Rc::ptr_eq(queued, op));
        }
        // The withdrawn request may have been blocking the head.
        self.admit();
    }
}

/// A pending `put` or `get`. Resolves once the full amount has moved.
///
/// The request is queued when created, not when first polled. Dropping it
/// before it completes withdraws it; a completed request is never undone.
#[must_use = "dropping a container request withdraws it"]
pub struct ContainerRequest {
    container: Container,
    direction: Direction,
    op: Option<Rc<PendingOp>>,
}

impl fmt::Debug for ContainerRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContainerRequest")
            .field("direction", &self.direction)
            .field("amount", &self.amount())
            .field("done", &self.is_done())
            .finish()
    }
}

impl ContainerRequest {
    /// The requested quantity.
    pub fn amount(&self) -> f64 {
        self.op.as_ref().map_or(0.0, |op| op.amount)
    }

    /// `true` once the request has been satisfied.
    pub fn is_done(&self) -> bool {
        self.op.as_ref().is_none_or(|op| op.done.get())
    }

    /// Put or get.
    pub fn direction(&self) -> Direction {
        self.direction
    }
}

impl Future for ContainerRequest {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let done = match &self.op {
            Some(op) if op.done.get() => true,
            Some(op) => {
                *op.waker.borrow_mut() = Some(cx.waker().clone());
                false
            }
            None => true,
        };
        if done {
            self.op = None;
            Poll::Ready(())
        } else {
            Poll::Pending
        }
    }
}

impl Drop for ContainerRequest {
    fn drop(&mut self) {
        if let Some(op) = self.op.take() {
            if !op.done.get() {
                self.container.withdraw(self.direction, &op);
            }
        }
    }
}

/// Resolves on the next level change of a container; see [`Container::changed`].
#[must_use = "a level watch does nothing unless awaited"]
#[derive(Debug)]
pub struct LevelChanged {
    container: Container,
    watcher: Rc<Watcher>,
}

impl Future for LevelChanged {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.watcher.fired.get() {
            return Poll::Ready(());
        }
        *self.watcher.waker.borrow_mut() = Some(cx.waker().clone());
        Poll::Pending
    }
}

impl Drop for LevelChanged {
    fn drop(&mut self) {
        if !self.watcher.fired.get() {
            self.container
                .inner
                .state
                .borrow_mut()
                .watchers
                .retain(|watcher| !Rc::ptr_eq(watcher, &self.watcher));
        }
    }
}
