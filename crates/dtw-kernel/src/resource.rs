use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

use tracing::trace;

use crate::entity::{EntityId, ResourceId};
use crate::environment::Environment;
use crate::error::{SimError, SimResult};
use crate::event::SimEventKind;

#[derive(Debug, Default)]
struct Ticket {
    granted: Cell<bool>,
    waker: RefCell<Option<Waker>>,
}

#[derive(Debug, Default)]
struct ResourceState {
    in_use: usize,
    queue: VecDeque<Rc<Ticket>>,
}

struct ResourceInner {
    id: ResourceId,
    capacity: usize,
    owner: Cell<EntityId>,
    env: Environment,
    state: RefCell<ResourceState>,
}

/// A counting semaphore with `capacity` interchangeable slots and a FIFO
/// wait queue.
///
/// Cloning yields another handle to the same resource.
#[derive(Clone)]
pub struct Resource {
    inner: Rc<ResourceInner>,
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("id", &self.inner.id)
            .field("capacity", &self.inner.capacity)
            .field("in_use", &self.in_use())
            .field("queued", &self.queue_len())
            .finish()
    }
}

impl Resource {
    /// Create a resource with `capacity` slots.
    pub fn new(env: &Environment, capacity: usize) -> SimResult<Self> {
        if capacity == 0 {
            return Err(SimError::InvalidConfiguration(
                "resource capacity must be at least 1".into(),
            ));
        }
        Ok(Self {
            inner: Rc::new(ResourceInner {
                id: env.next_resource_id(),
                capacity,
                owner: Cell::new(EntityId::new()),
                env: env.clone(),
                state: RefCell::new(ResourceState::default()),
            }),
        })
    }

    /// Attribute telemetry records of this resource to `owner`.
    pub fn with_owner(self, owner: EntityId) -> Self {
        self.inner.owner.set(owner);
        self
    }

    /// Identifier, unique within the environment.
    pub fn id(&self) -> ResourceId {
        self.inner.id
    }

    /// The entity telemetry is attributed to.
    pub fn owner(&self) -> EntityId {
        self.inner.owner.get()
    }

    /// Total number of slots.
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Slots currently granted.
    pub fn in_use(&self) -> usize {
        self.inner.state.borrow().in_use
    }

    /// Requests waiting for a slot.
    pub fn queue_len(&self) -> usize {
        self.inner.state.borrow().queue.len()
    }

    /// Ask for a slot.
    ///
    /// The request joins the queue immediately, so arrival order is call
    /// order even if the returned future is polled later.
    pub fn request(&self) -> Request {
        let ticket = Rc::new(Ticket::default());
        self.inner
            .state
            .borrow_mut()
            .queue
            .push_back(Rc::clone(&ticket));
        self.grant_waiting();
        Request {
            resource: self.clone(),
            ticket: Some(ticket),
        }
    }

    /// Grant slots to the head of the queue while any are free.
    fn grant_waiting(&self) {
        let mut granted = Vec::new();
        {
            let mut state = self.inner.state.borrow_mut();
            while state.in_use < self.inner.capacity {
                let Some(ticket) = state.queue.pop_front() else {
                    break;
                };
                ticket.granted.set(true);
                state.in_use += 1;
                granted.push((ticket, state.in_use));
            }
        }
        for (ticket, in_use) in granted {
            trace!(resource = %self.inner.id, in_use, "slot granted");
            self.inner.env.record(
                self.owner(),
                SimEventKind::ResourceGranted {
                    in_use,
                    capacity: self.inner.capacity,
                },
                format!("{} granted ({in_use}/{})", self.inner.id, self.inner.capacity),
            );
            let waker = ticket.waker.borrow_mut().take();
            if let Some(waker) = waker {
                waker.wake();
            }
        }
    }

    fn release(&self) {
        let in_use = {
            let mut state = self.inner.state.borrow_mut();
            state.in_use = state.in_use.saturating_sub(1);
            state.in_use
        };
        trace!(resource = %self.inner.id, in_use, "slot released");
        self.inner.env.record(
            self.owner(),
            SimEventKind::ResourceReleased {
                in_use,
                capacity: self.inner.capacity,
            },
            format!("{} released ({in_use}/{})", self.inner.id, self.inner.capacity),
        );
        self.grant_waiting();
    }

    fn withdraw(&self, ticket: &Rc<Ticket>) {
        self.inner
            .state
            .borrow_mut()
            .queue
            .retain(|queued| !Rc::ptr_eq(queued, ticket));
    }
}

/// A pending slot request; resolves to a [`ResourceGuard`].
///
/// Dropping an unresolved request withdraws it from the queue, or gives the
/// slot back if it had already been granted.
#[must_use = "a request holds its place in the queue until dropped"]
pub struct Request {
    resource: Resource,
    ticket: Option<Rc<Ticket>>,
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("resource", &self.resource.id())
            .field("granted", &self.is_granted())
            .finish()
    }
}

impl Request {
    /// `true` once a slot has been assigned to this request.
    pub fn is_granted(&self) -> bool {
        self.ticket
            .as_ref()
            .is_some_and(|ticket| ticket.granted.get())
    }
}

impl Future for Request {
    type Output = ResourceGuard;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<ResourceGuard> {
        let granted = match &self.ticket {
            Some(ticket) if ticket.granted.get() => true,
            Some(ticket) => {
                *ticket.waker.borrow_mut() = Some(cx.waker().clone());
                false
            }
            None => return Poll::Pending,
        };
        if granted {
            self.ticket = None;
            Poll::Ready(ResourceGuard {
                resource: self.resource.clone(),
            })
        } else {
            Poll::Pending
        }
    }
}

impl Drop for Request {
    fn drop(&mut self) {
        if let Some(ticket) = self.ticket.take() {
            if ticket.granted.get() {
                self.resource.release();
            } else {
                self.resource.withdraw(&ticket);
            }
        }
    }
}

/// A held resource slot. Dropping the guard releases it.
#[must_use = "dropping the guard releases the slot immediately"]
pub struct ResourceGuard {
    resource: Resource,
}

impl fmt::Debug for ResourceGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceGuard")
            .field("resource", &self.resource.id())
            .finish()
    }
}

impl ResourceGuard {
    /// The resource this slot belongs to.
    pub fn resource(&self) -> &Resource {
        &self.resource
    }

    /// Release the slot now. Equivalent to dropping the guard.
    pub fn release(self) {}
}

impl Drop for ResourceGuard {
    fn drop(&mut self) {
        self.resource.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn zero_capacity_is_rejected() {
        let env = Environment::default();
        assert!(matches!(
            Resource::new(&env, 0),
            Err(SimError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn ids_follow_creation_order() {
        let env = Environment::default();
        let a = Resource::new(&env, 1).unwrap();
        let b = Resource::new(&env, 1).unwrap();
        assert!(a.id() < b.id());
    }

    #[test]
    fn requests_are_granted_in_fifo_order() {
        let env = Environment::default();
        let resource = Resource::new(&env, 1).unwrap();
        let order = Rc::new(RefCell::new(Vec::new()));
        for name in ["first", "second", "third"] {
            let env2 = env.clone();
            let resource = resource.clone();
            let order = Rc::clone(&order);
            env.spawn(name, async move {
                let _slot = resource.request().await;
                order.borrow_mut().push((name, env2.now()));
                env2.timeout(10.0).unwrap().await;
            });
        }
        env.run();
        assert_eq!(
            *order.borrow(),
            vec![("first", 0.0), ("second", 10.0), ("third", 20.0)]
        );
        assert_eq!(resource.in_use(), 0);
    }

    #[test]
    fn capacity_two_serves_two_at_once() {
        let env = Environment::default();
        let resource = Resource::new(&env, 2).unwrap();
        let finish = Rc::new(RefCell::new(Vec::new()));
        for _ in 0..4 {
            let env2 = env.clone();
            let resource = resource.clone();
            let finish = Rc::clone(&finish);
            env.spawn("user", async move {
                let _slot = resource.request().await;
                env2.timeout(5.0).unwrap().await;
                finish.borrow_mut().push(env2.now());
            });
        }
        env.run();
        assert_eq!(*finish.borrow(), vec![5.0, 5.0, 10.0, 10.0]);
    }

    #[test]
    fn dropped_request_leaves_the_queue() {
        let env = Environment::default();
        let resource = Resource::new(&env, 1).unwrap();
        let held = resource.request();
        assert!(held.is_granted());
        let waiting = resource.request();
        assert_eq!(resource.queue_len(), 1);
        drop(waiting);
        assert_eq!(resource.queue_len(), 0);
        drop(held);
        assert_eq!(resource.in_use(), 0);
    }

    #[test]
    fn guard_release_wakes_next_waiter() {
        let env = Environment::default();
        let resource = Resource::new(&env, 1).unwrap();
        let got_it_at = Rc::new(Cell::new(-1.0));
        {
            let env2 = env.clone();
            let resource = resource.clone();
            env.spawn("holder", async move {
                let slot = resource.request().await;
                env2.timeout(3.0).unwrap().await;
                slot.release();
            });
        }
        {
            let env2 = env.clone();
            let resource = resource.clone();
            let got_it_at = Rc::clone(&got_it_at);
            env.spawn("waiter", async move {
                let _slot = resource.request().await;
                got_it_at.set(env2.now());
            });
        }
        env.run();
        assert_eq!(got_it_at.get(), 3.0);
        assert_eq!(env.events().events_named("resource_granted").len(), 2);
        assert_eq!(env.events().events_named("resource_released").len(), 2);
    }

    proptest! {
        #[test]
        fn in_use_never_exceeds_capacity(
            capacity in 1usize..4,
            holds in proptest::collection::vec(0.0f64..20.0, 1..12),
        ) {
            let env = Environment::default();
            let resource = Resource::new(&env, capacity).unwrap();
            let peak = Rc::new(Cell::new(0usize));
            for hold in holds {
                let env2 = env.clone();
                let resource = resource.clone();
                let peak = Rc::clone(&peak);
                env.spawn("user", async move {
                    let _slot = resource.request().await;
                    peak.set(peak.get().max(resource.in_use()));
                    env2.timeout(hold).unwrap().await;
                });
            }
            let stats = env.run();
            prop_assert!(peak.get() <= capacity);
            prop_assert_eq!(resource.in_use(), 0);
            prop_assert_eq!(stats.suspended, 0);
        }
    }
}
