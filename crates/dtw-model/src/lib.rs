//! Logistics model for dredging and transport simulations.
//!
//! Entities are assembled from narrow capabilities ([`Identifiable`],
//! [`Locatable`], [`HasContainer`], [`HasResource`]) and behaviours
//! ([`Mover`], [`Transferer`]). An [`Activity`] strings them into a
//! load, sail, unload, return cycle gated by [`Condition`]s. Everything runs
//! as processes on a [`dtw_kernel::Environment`].

/// The load, sail, unload cycle.
pub mod activity;
/// Capability traits shared by all entities.
pub mod capability;
/// Time and level predicates gating activities.
pub mod condition;
/// Error types for the model crate.
pub mod error;
/// Positions and geodesic distances.
pub mod geometry;
/// Moving entities and speed policies.
pub mod movable;
/// Transfer rates and processing units.
pub mod processor;
/// JSON scenario loading.
pub mod scenario;
/// Fixed locations.
pub mod site;
/// Self-propelled processing units.
pub mod vessel;

pub use activity::{Activity, ActivityState};
pub use capability::{
    COLOCATION_TOLERANCE, HasContainer, HasResource, Identifiable, Locatable, Storage, colocated,
};
pub use condition::{Condition, LevelCondition, TimeCondition};
pub use error::{ModelError, ModelResult};
pub use geometry::{Point, distance};
pub use movable::{ContainerDependentMovable, Movable, Mover, Speed};
pub use processor::{DurationRule, Processing, Processor, Rate, Transferer};
pub use scenario::{Scenario, ScenarioConfig};
pub use site::Site;
pub use vessel::{Vessel, VesselConfig};
