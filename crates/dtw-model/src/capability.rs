//! Narrow capability traits. A concrete entity implements the subset it
//! needs; [`Activity`](crate::Activity) depends only on these.

use dtw_kernel::{Container, EntityId, Resource};

use crate::geometry::{Point, distance};

/// Two positions closer than this (metres) count as the same place.
pub const COLOCATION_TOLERANCE: f64 = 1.0;

/// Something with an identity and a display name.
pub trait Identifiable {
    /// Stable identifier used in telemetry.
    fn id(&self) -> EntityId;
    /// Human-readable name.
    fn name(&self) -> &str;
}

/// Something with a position.
pub trait Locatable: Identifiable {
    /// Current position.
    fn geometry(&self) -> Point;
}

/// Something holding material.
pub trait HasContainer {
    /// The material store.
    fn container(&self) -> &Container;
}

/// Something whose access is limited to a number of concurrent users.
pub trait HasResource {
    /// The access-limiting resource.
    fn resource(&self) -> &Resource;
}

/// A located material store with limited access: a valid origin or
/// destination of a transfer.
pub trait Storage: Locatable + HasContainer + HasResource {}

impl<T: Locatable + HasContainer + HasResource> Storage for T {}

/// `true` if the two positions are within [`COLOCATION_TOLERANCE`].
pub fn colocated(a: Point, b: Point) -> bool {
    distance(a, b) <= COLOCATION_TOLERANCE
}
