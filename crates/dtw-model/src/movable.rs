use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use dtw_kernel::{Container, EntityId, Environment, SimEventKind};
use tracing::debug;

use crate::capability::{HasContainer, Identifiable, Locatable};
use crate::error::{ModelError, ModelResult};
use crate::geometry::{Point, distance};

/// How a movable's speed (metres per second) depends on its load.
#[derive(Clone)]
pub enum Speed {
    /// The same speed whatever the load.
    Constant(f64),
    /// Linear between the speed when empty and the speed when full.
    Linear {
        /// Speed at fill fraction 0.
        empty: f64,
        /// Speed at fill fraction 1.
        full: f64,
    },
    /// Any function of the fill fraction.
    Custom(Rc<dyn Fn(f64) -> f64>),
}

impl fmt::Debug for Speed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Constant(v) => f.debug_tuple("Constant").field(v).finish(),
            Self::Linear { empty, full } => f
                .debug_struct("Linear")
                .field("empty", empty)
                .field("full", full)
                .finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

impl Speed {
    /// Speed at the given fill fraction.
    pub fn at(&self, fill_fraction: f64) -> f64 {
        match self {
            Self::Constant(v) => *v,
            Self::Linear { empty, full } => fill_fraction * (full - empty) + empty,
            Self::Custom(compute) => compute(fill_fraction),
        }
    }
}

fn checked_speed(name: &str, speed: f64) -> ModelResult<f64> {
    if speed.is_finite() && speed > 0.0 {
        Ok(speed)
    } else {
        Err(ModelError::InvalidConfiguration(format!(
            "{name}: speed must be positive and finite, got {speed}"
        )))
    }
}

/// Something that travels between locations.
#[allow(async_fn_in_trait)]
pub trait Mover: Locatable {
    /// Overwrite the current position.
    fn set_geometry(&self, point: Point);

    /// Speed for a trip starting now. Evaluated once per move.
    fn resolve_speed(&self) -> f64;

    /// Remember the speed of the trip in progress.
    fn note_speed(&self, _speed: f64) {}

    /// Travel to `destination`.
    ///
    /// A zero-distance move completes at once without yielding. Otherwise the
    /// mover suspends for `distance / speed` and then takes the destination's
    /// position. A non-positive speed is an error.
    async fn move_to<D: Locatable + ?Sized>(
        &self,
        env: &Environment,
        destination: &D,
    ) -> ModelResult<()> {
        let from = self.geometry();
        let to = destination.geometry();
        let meters = distance(from, to);
        if meters == 0.0 {
            self.set_geometry(to);
            return Ok(());
        }

        let speed = checked_speed(self.name(), self.resolve_speed())?;
        self.note_speed(speed);
        env.record(
            self.id(),
            SimEventKind::Departed {
                lon: from.lon,
                lat: from.lat,
                speed,
            },
            format!("{} departs for {}", self.name(), destination.name()),
        );
        debug!(mover = self.name(), meters, speed, "departing");

        env.timeout(meters / speed)?.await;

        self.set_geometry(to);
        env.record(
            self.id(),
            SimEventKind::Arrived {
                lon: to.lon,
                lat: to.lat,
            },
            format!("{} arrived at {}", self.name(), destination.name()),
        );
        Ok(())
    }
}

/// A movable with a constant speed.
#[derive(Debug)]
pub struct Movable {
    id: EntityId,
    name: String,
    geometry: Cell<Point>,
    speed: f64,
}

impl Movable {
    /// Create a movable at `geometry` travelling at `speed` m/s.
    pub fn new(name: impl Into<String>, geometry: Point, speed: f64) -> ModelResult<Self> {
        let name = name.into();
        let speed = checked_speed(&name, speed)?;
        Ok(Self {
            id: EntityId::new(),
            name,
            geometry: Cell::new(geometry),
            speed,
        })
    }

    /// The constant travel speed.
    pub fn speed(&self) -> f64 {
        self.speed
    }
}

impl Identifiable for Movable {
    fn id(&self) -> EntityId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Locatable for Movable {
    fn geometry(&self) -> Point {
        self.geometry.get()
    }
}

impl Mover for Movable {
    fn set_geometry(&self, point: Point) {
        self.geometry.set(point);
    }

    fn resolve_speed(&self) -> f64 {
        self.speed
    }
}

/// A movable carrying a container whose speed depends on how full it is.
///
/// The speed is sampled once at the start of each move from
/// `level / capacity`; level changes during the trip do not affect it.
#[derive(Debug)]
pub struct ContainerDependentMovable {
    id: EntityId,
    name: String,
    geometry: Cell<Point>,
    container: Container,
    speed: Speed,
    current_speed: Cell<Option<f64>>,
}

impl ContainerDependentMovable {
    /// Create an empty movable with a container of `capacity`.
    pub fn new(
        env: &Environment,
        name: impl Into<String>,
        geometry: Point,
        capacity: f64,
        speed: Speed,
    ) -> ModelResult<Self> {
        let id = EntityId::new();
        Ok(Self {
            id,
            name: name.into(),
            geometry: Cell::new(geometry),
            container: Container::new(env, capacity, 0.0)?.with_owner(id),
            speed,
            current_speed: Cell::new(None),
        })
    }

    /// Speed of the most recent move, if any.
    pub fn current_speed(&self) -> Option<f64> {
        self.current_speed.get()
    }
}

impl Identifiable for ContainerDependentMovable {
    fn id(&self) -> EntityId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Locatable for ContainerDependentMovable {
    fn geometry(&self) -> Point {
        self.geometry.get()
    }
}

impl HasContainer for ContainerDependentMovable {
    fn container(&self) -> &Container {
        &self.container
    }
}

impl Mover for ContainerDependentMovable {
    fn set_geometry(&self, point: Point) {
        self.geometry.set(point);
    }

    fn resolve_speed(&self) -> f64 {
        self.speed.at(self.container.fill_fraction())
    }

    fn note_speed(&self, speed: f64) {
        self.current_speed.set(Some(speed));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::site::Site;

    fn origin() -> Point {
        Point::new(0.0, 0.0)
    }

    #[test]
    fn linear_speed_interpolates() {
        let speed = Speed::Linear {
            empty: 20.0,
            full: 10.0,
        };
        assert_eq!(speed.at(0.0), 20.0);
        assert_eq!(speed.at(0.2), 18.0);
        assert_eq!(speed.at(1.0), 10.0);
    }

    #[test]
    fn non_positive_speed_is_rejected() {
        assert!(matches!(
            Movable::new("drifter", origin(), 0.0),
            Err(ModelError::InvalidConfiguration(_))
        ));
        assert!(Movable::new("drifter", origin(), f64::NAN).is_err());
    }

    #[test]
    fn move_takes_distance_over_speed() {
        let env = Environment::default();
        let target = Site::new(&env, "target", Point::new(1.0, 0.0), 1.0, 0.0, 1).unwrap();
        let movable = Rc::new(Movable::new("tug", origin(), 10.0).unwrap());
        {
            let env2 = env.clone();
            let movable = Rc::clone(&movable);
            let target = Rc::new(target);
            env.process("tug", async move { movable.move_to(&env2, &*target).await });
        }
        env.run();
        assert!((env.now() - 11_131.949).abs() < 0.01, "got {}", env.now());
        assert_eq!(movable.geometry(), Point::new(1.0, 0.0));
        assert_eq!(env.events().events_named("departed").len(), 1);
        assert_eq!(env.events().events_named("arrived").len(), 1);
    }

    #[test]
    fn zero_speed_at_move_time_fails_the_process() {
        let env = Environment::default();
        let target = Rc::new(Site::new(&env, "target", Point::new(1.0, 1.0), 1.0, 0.0, 1).unwrap());
        let stalled = Rc::new(
            ContainerDependentMovable::new(&env, "stalled", origin(), 10.0, Speed::Constant(0.0))
                .unwrap(),
        );
        let handle = {
            let env2 = env.clone();
            let stalled = Rc::clone(&stalled);
            env.process("stalled", async move { stalled.move_to(&env2, &*target).await })
        };
        env.run();
        assert!(handle.is_failed());
        assert_eq!(env.now(), 0.0);
        assert_eq!(stalled.current_speed(), None);
    }
}
