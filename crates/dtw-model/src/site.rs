use dtw_kernel::{Container, EntityId, Environment, Resource};

use crate::capability::{HasContainer, HasResource, Identifiable, Locatable};
use crate::error::ModelResult;
use crate::geometry::Point;

/// A fixed location holding material, served by a limited number of
/// processors at a time.
#[derive(Debug)]
pub struct Site {
    id: EntityId,
    name: String,
    geometry: Point,
    container: Container,
    resource: Resource,
}

impl Site {
    /// Create a site with `level` out of `capacity` material and
    /// `nr_resources` service slots.
    pub fn new(
        env: &Environment,
        name: impl Into<String>,
        geometry: Point,
        capacity: f64,
        level: f64,
        nr_resources: usize,
    ) -> ModelResult<Self> {
        let id = EntityId::new();
        Ok(Self {
            id,
            name: name.into(),
            geometry,
            container: Container::new(env, capacity, level)?.with_owner(id),
            resource: Resource::new(env, nr_resources)?.with_owner(id),
        })
    }
}

impl Identifiable for Site {
    fn id(&self) -> EntityId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Locatable for Site {
    fn geometry(&self) -> Point {
        self.geometry
    }
}

impl HasContainer for Site {
    fn container(&self) -> &Container {
        &self.container
    }
}

impl HasResource for Site {
    fn resource(&self) -> &Resource {
        &self.resource
    }
}
