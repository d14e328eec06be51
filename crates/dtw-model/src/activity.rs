use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use dtw_kernel::{EntityId, Environment, ProcessHandle, SimEventKind};
use tracing::{debug, info};

use crate::capability::{HasContainer, Identifiable, Storage};
use crate::condition::Condition;
use crate::error::ModelResult;
use crate::movable::Mover;
use crate::processor::{TRANSFER_EPSILON, Transferer};

/// Where an activity is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityState {
    /// Waiting for the start condition.
    AwaitingStart,
    /// Filling the mover at the origin (or waiting for material to load).
    Loading,
    /// Travelling between origin and destination.
    Moving,
    /// Emptying the mover at the destination.
    Unloading,
    /// Evaluating the stop condition after a cycle.
    CheckStop,
    /// The stop condition held; the activity is over.
    Terminated,
}

impl fmt::Display for ActivityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::AwaitingStart => "awaiting start",
            Self::Loading => "loading",
            Self::Moving => "moving",
            Self::Unloading => "unloading",
            Self::CheckStop => "checking stop",
            Self::Terminated => "terminated",
        };
        f.write_str(label)
    }
}

/// Repeatedly carries material from `origin` to `destination`: load, sail,
/// unload, sail back, until the stop condition holds.
///
/// Loader, mover and unloader may be the same unit. The loading leg is
/// timed by the loader's loading rate, the unloading leg by the unloader's
/// unloading rate. Cloning yields another handle to the same activity.
pub struct Activity<L, M, U> {
    id: EntityId,
    name: Rc<str>,
    origin: Rc<dyn Storage>,
    destination: Rc<dyn Storage>,
    loader: Rc<L>,
    mover: Rc<M>,
    unloader: Rc<U>,
    start_condition: Option<Condition>,
    stop_condition: Option<Condition>,
    state: Rc<Cell<ActivityState>>,
    cycles: Rc<Cell<u64>>,
}

impl<L, M, U> Clone for Activity<L, M, U> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            name: Rc::clone(&self.name),
            origin: Rc::clone(&self.origin),
            destination: Rc::clone(&self.destination),
            loader: Rc::clone(&self.loader),
            mover: Rc::clone(&self.mover),
            unloader: Rc::clone(&self.unloader),
            start_condition: self.start_condition.clone(),
            stop_condition: self.stop_condition.clone(),
            state: Rc::clone(&self.state),
            cycles: Rc::clone(&self.cycles),
        }
    }
}

impl<L, M, U> fmt::Debug for Activity<L, M, U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Activity")
            .field("name", &self.name)
            .field("origin", &self.origin.name())
            .field("destination", &self.destination.name())
            .field("state", &self.state.get())
            .field("cycles", &self.cycles.get())
            .finish()
    }
}

impl<L, M, U> Activity<L, M, U>
where
    L: Transferer + 'static,
    M: Mover + Storage + 'static,
    U: Transferer + 'static,
{
    /// Create an activity. Nothing happens until [`start`](Self::start).
    pub fn new(
        name: impl Into<String>,
        origin: Rc<dyn Storage>,
        destination: Rc<dyn Storage>,
        loader: Rc<L>,
        mover: Rc<M>,
        unloader: Rc<U>,
    ) -> Self {
        Self {
            id: EntityId::new(),
            name: Rc::from(name.into()),
            origin,
            destination,
            loader,
            mover,
            unloader,
            start_condition: None,
            stop_condition: None,
            state: Rc::new(Cell::new(ActivityState::AwaitingStart)),
            cycles: Rc::new(Cell::new(0)),
        }
    }

    /// Wait for `condition` before the first cycle.
    pub fn with_start_condition(mut self, condition: Condition) -> Self {
        self.start_condition = Some(condition);
        self
    }

    /// Stop after the first cycle that ends with `condition` satisfied.
    pub fn with_stop_condition(mut self, condition: Condition) -> Self {
        self.stop_condition = Some(condition);
        self
    }

    /// Identifier used in telemetry.
    pub fn id(&self) -> EntityId {
        self.id
    }

    /// The activity's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state.
    pub fn state(&self) -> ActivityState {
        self.state.get()
    }

    /// Completed cycles.
    pub fn cycles(&self) -> u64 {
        self.cycles.get()
    }

    /// Spawn the activity's process.
    pub fn start(&self, env: &Environment) -> ProcessHandle {
        let activity = self.clone();
        let env2 = env.clone();
        env.process(self.name.to_string(), async move { activity.run(&env2).await })
    }

    async fn run(&self, env: &Environment) -> ModelResult<()> {
        self.state.set(ActivityState::AwaitingStart);
        if let Some(start) = &self.start_condition {
            start.await_satisfied(env).await?;
        }
        self.record(env, SimEventKind::ActivityStarted, "started".into());
        info!(activity = %self.name, now = env.now(), "activity started");

        loop {
            self.state.set(ActivityState::Loading);
            let amount = self.next_amount().await;
            let cycle = self.cycles.get() + 1;
            self.record(
                env,
                SimEventKind::CycleStarted { cycle, amount },
                format!("cycle {cycle} carries {amount}"),
            );

            let hold = self.mover.container();
            let loaded = (hold.level() + amount).min(hold.capacity());
            self.loader
                .process(env, &*self.mover, loaded, &*self.origin)
                .await?;

            self.state.set(ActivityState::Moving);
            self.mover.move_to(env, &*self.destination).await?;

            self.state.set(ActivityState::Unloading);
            let emptied = (self.mover.container().level() - amount).max(0.0);
            self.unloader
                .process(env, &*self.mover, emptied, &*self.destination)
                .await?;

            self.state.set(ActivityState::Moving);
            self.mover.move_to(env, &*self.origin).await?;

            self.cycles.set(cycle);
            self.record(
                env,
                SimEventKind::CycleCompleted { cycle },
                format!("cycle {cycle} done"),
            );
            debug!(activity = %self.name, cycle, now = env.now(), "cycle completed");

            self.state.set(ActivityState::CheckStop);
            let stop = self.stop_condition.as_ref();
            if stop.is_some_and(|condition| condition.is_satisfied(env)) {
                self.state.set(ActivityState::Terminated);
                self.record(
                    env,
                    SimEventKind::ActivityTerminated { cycles: cycle },
                    format!("terminated after {cycle} cycles"),
                );
                info!(activity = %self.name, cycles = cycle, now = env.now(), "activity terminated");
                return Ok(());
            }
        }
    }

    /// The lesser of the mover's room and the origin's content, waiting
    /// for a level change while that is zero.
    async fn next_amount(&self) -> f64 {
        loop {
            let room = self.mover.container().room();
            let content = self.origin.container().level();
            let amount = room.min(content);
            if amount > TRANSFER_EPSILON {
                return amount;
            }
            let more_content = self.origin.container().changed();
            let more_room = self.mover.container().changed();
            futures::future::select(more_content, more_room).await;
        }
    }

    fn record(&self, env: &Environment, kind: SimEventKind, description: String) {
        env.record(self.id, kind, format!("{}: {description}", self.name));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::Locatable;
    use crate::condition::LevelCondition;
    use crate::geometry::Point;
    use crate::movable::Speed;
    use crate::processor::{Processing, Processor, Rate};
    use crate::site::Site;
    use crate::vessel::{Vessel, VesselConfig};

    struct Route {
        env: Environment,
        origin: Rc<Site>,
        destination: Rc<Site>,
        barge: Rc<Vessel>,
    }

    fn route() -> Route {
        let env = Environment::default();
        let origin = Rc::new(Site::new(&env, "pit", Point::new(0.0, 0.0), 100.0, 100.0, 1).unwrap());
        let destination =
            Rc::new(Site::new(&env, "dump", Point::new(1.0, 0.0), 100.0, 0.0, 1).unwrap());
        let config = VesselConfig::new(100.0, Speed::Constant(10.0), Processing::flat(1.0).unwrap());
        let barge = Rc::new(Vessel::new(&env, "barge", Point::new(0.0, 0.0), config).unwrap());
        Route {
            env,
            origin,
            destination,
            barge,
        }
    }

    #[test]
    fn separate_loader_and_unloader() {
        let route = route();
        let loader = Rc::new(Processor::new(
            "excavator",
            route.origin.geometry(),
            Processing::flat(2.0).unwrap(),
        ));
        let unloader = Rc::new(Processor::new(
            "pump",
            route.destination.geometry(),
            Processing::flat(1.0).unwrap(),
        ));
        let drained = LevelCondition::new(&*route.origin, 0.0, 0.0).unwrap();
        let activity = Activity::new(
            "haul",
            route.origin.clone(),
            route.destination.clone(),
            loader,
            route.barge.clone(),
            unloader,
        )
        .with_stop_condition(drained.into());
        assert_eq!(activity.state(), ActivityState::AwaitingStart);

        let handle = activity.start(&route.env);
        route.env.run();

        assert!(handle.is_finished());
        assert_eq!(activity.state(), ActivityState::Terminated);
        assert_eq!(activity.cycles(), 1);
        assert_eq!(route.destination.container().level(), 100.0);
        assert_eq!(route.barge.geometry(), route.origin.geometry());
        let sailing = 111_319.49 / 10.0;
        assert!((route.env.now() - (50.0 + 100.0 + 2.0 * sailing)).abs() < 0.01);
        assert_eq!(route.env.events().events_named("activity_terminated").len(), 1);
    }

    #[test]
    fn misplaced_unloader_fails_the_activity() {
        let route = route();
        let stranded = Rc::new(Processor::new(
            "stranded",
            route.origin.geometry(),
            Processing::flat(1.0).unwrap(),
        ));
        let activity = Activity::new(
            "haul",
            route.origin.clone(),
            route.destination.clone(),
            route.barge.clone(),
            route.barge.clone(),
            stranded,
        );
        let handle = activity.start(&route.env);
        route.env.run();

        assert!(handle.is_failed());
        assert_eq!(activity.state(), ActivityState::Unloading);
        assert_eq!(route.barge.container().level(), 100.0);
    }

    #[test]
    #[tracing_test::traced_test]
    fn legs_are_timed_by_their_own_rate() {
        let env = Environment::default();
        let quay = Point::new(4.18, 52.18);
        let origin = Rc::new(Site::new(&env, "pit", quay, 1000.0, 1000.0, 1).unwrap());
        let destination = Rc::new(Site::new(&env, "dump", quay, 1000.0, 0.0, 1).unwrap());
        let processing = Processing::new(Rate::flat(1.0).unwrap(), Rate::flat(4.0).unwrap());
        let config = VesselConfig::new(1000.0, Speed::Constant(1.0), processing);
        let hopper = Rc::new(Vessel::new(&env, "hopper", quay, config).unwrap());
        let drained = LevelCondition::new(&*origin, 0.0, 0.0).unwrap();
        let activity = Activity::new(
            "haul",
            origin.clone(),
            destination.clone(),
            hopper.clone(),
            hopper.clone(),
            hopper.clone(),
        )
        .with_stop_condition(drained.into());

        activity.start(&env);
        env.run();

        assert_eq!(activity.state(), ActivityState::Terminated);
        assert_eq!(env.now(), 1000.0 / 1.0 + 1000.0 / 4.0);
        assert_eq!(destination.container().level(), 1000.0);
        assert_eq!(hopper.container().level(), 0.0);
        assert!(logs_contain("activity started"));
        assert!(logs_contain("activity terminated"));
    }

    #[test]
    fn display_names_states() {
        assert_eq!(ActivityState::CheckStop.to_string(), "checking stop");
        assert_eq!(ActivityState::Terminated.to_string(), "terminated");
    }
}
