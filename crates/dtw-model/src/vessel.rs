use std::cell::Cell;

use dtw_kernel::{Container, EntityId, Environment, Resource};

use crate::capability::{HasContainer, HasResource, Identifiable, Locatable};
use crate::error::ModelResult;
use crate::geometry::Point;
use crate::movable::{Mover, Speed};
use crate::processor::{Processing, Transferer};

/// Parameters of a [`Vessel`].
#[derive(Debug, Clone)]
pub struct VesselConfig {
    /// Hold capacity.
    pub capacity: f64,
    /// Initial hold content.
    pub level: f64,
    /// Number of processors that may work on the vessel at once.
    pub nr_resources: usize,
    /// Speed as a function of load.
    pub speed: Speed,
    /// Own loading/unloading equipment.
    pub processing: Processing,
}

impl VesselConfig {
    /// An empty vessel with one service slot.
    pub fn new(capacity: f64, speed: Speed, processing: Processing) -> Self {
        Self {
            capacity,
            level: 0.0,
            nr_resources: 1,
            speed,
            processing,
        }
    }

    /// Set the initial hold content.
    pub fn with_level(mut self, level: f64) -> Self {
        self.level = level;
        self
    }

    /// Set the number of service slots.
    pub fn with_resources(mut self, nr_resources: usize) -> Self {
        self.nr_resources = nr_resources;
        self
    }
}

/// A self-propelled transport and processing unit, e.g. a hopper dredger:
/// it loads itself, sails with load-dependent speed and unloads itself.
#[derive(Debug)]
pub struct Vessel {
    id: EntityId,
    name: String,
    geometry: Cell<Point>,
    container: Container,
    resource: Resource,
    speed: Speed,
    current_speed: Cell<Option<f64>>,
    processing: Processing,
}

impl Vessel {
    /// Create a vessel at `geometry`.
    pub fn new(
        env: &Environment,
        name: impl Into<String>,
        geometry: Point,
        config: VesselConfig,
    ) -> ModelResult<Self> {
        let id = EntityId::new();
        Ok(Self {
            id,
            name: name.into(),
            geometry: Cell::new(geometry),
            container: Container::new(env, config.capacity, config.level)?.with_owner(id),
            resource: Resource::new(env, config.nr_resources)?.with_owner(id),
            speed: config.speed,
            current_speed: Cell::new(None),
            processing: config.processing,
        })
    }

    /// Speed of the most recent move, if any.
    pub fn current_speed(&self) -> Option<f64> {
        self.current_speed.get()
    }
}

impl Identifiable for Vessel {
    fn id(&self) -> EntityId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Locatable for Vessel {
    fn geometry(&self) -> Point {
        self.geometry.get()
    }
}

impl HasContainer for Vessel {
    fn container(&self) -> &Container {
        &self.container
    }
}

impl HasResource for Vessel {
    fn resource(&self) -> &Resource {
        &self.resource
    }
}

impl Mover for Vessel {
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

impl Transferer for Vessel {
    fn processing(&self) -> &Processing {
        &self.processing
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;
    use crate::site::Site;

    #[test]
    fn vessel_loads_itself_and_sails_slower_when_full() {
        let env = Environment::default();
        let quarry = Rc::new(Site::new(&env, "quarry", Point::new(0.0, 0.0), 100.0, 100.0, 1).unwrap());
        let harbour = Rc::new(Site::new(&env, "harbour", Point::new(1.0, 0.0), 100.0, 0.0, 1).unwrap());
        let config = VesselConfig::new(
            10.0,
            Speed::Linear {
                empty: 20.0,
                full: 10.0,
            },
            Processing::flat(1.0).unwrap(),
        );
        let vessel = Rc::new(Vessel::new(&env, "hopper", quarry.geometry(), config).unwrap());
        {
            let env2 = env.clone();
            let (vessel, quarry, harbour) = (vessel.clone(), quarry.clone(), harbour.clone());
            env.process("hopper", async move {
                vessel.transfer(&env2, &*quarry, 10.0, &*vessel).await?;
                vessel.move_to(&env2, &*harbour).await
            });
        }
        let stats = env.run();
        assert_eq!(stats.failed, 0);
        assert_eq!(vessel.current_speed(), Some(10.0));
        assert_eq!(vessel.geometry(), harbour.geometry());
        assert_eq!(vessel.container().level(), 10.0);
        assert!((env.now() - (10.0 + 11_131.949)).abs() < 0.01);
    }
}
