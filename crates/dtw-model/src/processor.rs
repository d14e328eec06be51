use std::fmt;
use std::rc::Rc;

use dtw_kernel::{EntityId, Environment, Resource, ResourceGuard, SimEventKind};
use tracing::trace;

use crate::capability::{Identifiable, Locatable, Storage, colocated};
use crate::error::{ModelError, ModelResult};
use crate::geometry::Point;

/// Quantities below this are treated as nothing left to move.
pub(crate) const TRANSFER_EPSILON: f64 = 1e-9;

/// Time needed to change a container's level from one value to another.
#[derive(Clone)]
pub enum Rate {
    /// A constant throughput: `|to - from| / rate`.
    Flat(f64),
    /// `(level, cumulative_time)` pairs sorted by level, linearly
    /// interpolated and clamped at both ends.
    Table(Vec<(f64, f64)>),
    /// Any function of `(from, to)` returning seconds.
    Custom(Rc<dyn Fn(f64, f64) -> f64>),
}

impl fmt::Debug for Rate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Flat(rate) => f.debug_tuple("Flat").field(rate).finish(),
            Self::Table(points) => f.debug_tuple("Table").field(points).finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

impl Rate {
    /// A constant throughput in units per second.
    pub fn flat(rate: f64) -> ModelResult<Self> {
        if rate.is_finite() && rate > 0.0 {
            Ok(Self::Flat(rate))
        } else {
            Err(ModelError::InvalidConfiguration(format!(
                "rate must be positive and finite, got {rate}"
            )))
        }
    }

    /// A production curve of `(level, cumulative_time)` points.
    pub fn table(mut points: Vec<(f64, f64)>) -> ModelResult<Self> {
        if points.len() < 2 {
            return Err(ModelError::InvalidConfiguration(
                "rate table needs at least two points".into(),
            ));
        }
        if points.iter().any(|(l, t)| !l.is_finite() || !t.is_finite()) {
            return Err(ModelError::InvalidConfiguration(
                "rate table points must be finite".into(),
            ));
        }
        points.sort_by(|a, b| a.0.total_cmp(&b.0));
        if points.windows(2).any(|w| w[1].1 < w[0].1) {
            return Err(ModelError::InvalidConfiguration(
                "rate table time must not decrease with level".into(),
            ));
        }
        Ok(Self::Table(points))
    }

    /// Seconds needed to go from level `from` to level `to`.
    pub fn duration(&self, from: f64, to: f64) -> f64 {
        match self {
            Self::Flat(rate) => (to - from).abs() / rate,
            Self::Table(points) => (interpolate(points, to) - interpolate(points, from)).abs(),
            Self::Custom(compute) => compute(from, to),
        }
    }
}

fn interpolate(points: &[(f64, f64)], level: f64) -> f64 {
    let (Some(first), Some(last)) = (points.first(), points.last()) else {
        return 0.0;
    };
    if level <= first.0 {
        return first.1;
    }
    if level >= last.0 {
        return last.1;
    }
    for pair in points.windows(2) {
        let ((l0, t0), (l1, t1)) = (pair[0], pair[1]);
        if level <= l1 {
            if l1 == l0 {
                return t1;
            }
            return t0 + (level - l0) / (l1 - l0) * (t1 - t0);
        }
    }
    last.1
}

/// Combines the loading duration (measured on the destination's level) and
/// the unloading duration (measured on the origin's level) of one increment.
#[derive(Clone, Default)]
pub enum DurationRule {
    /// Only the loading side counts.
    Loading,
    /// Only the unloading side counts.
    Unloading,
    /// Both sides work in parallel; the slower one dominates.
    #[default]
    Max,
    /// The sides work one after the other.
    Sum,
    /// Any function of `(loading, unloading)`.
    Custom(Rc<dyn Fn(f64, f64) -> f64>),
}

impl fmt::Debug for DurationRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Loading => f.write_str("Loading"),
            Self::Unloading => f.write_str("Unloading"),
            Self::Max => f.write_str("Max"),
            Self::Sum => f.write_str("Sum"),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

impl DurationRule {
    /// Duration of an increment given both sides' durations.
    pub fn combine(&self, loading: f64, unloading: f64) -> f64 {
        match self {
            Self::Loading => loading,
            Self::Unloading => unloading,
            Self::Max => loading.max(unloading),
            Self::Sum => loading + unloading,
            Self::Custom(compute) => compute(loading, unloading),
        }
    }
}

/// Transfer policy of a processing unit.
#[derive(Debug, Clone)]
pub struct Processing {
    loading: Rate,
    unloading: Rate,
    rule: DurationRule,
    max_increment: Option<f64>,
    bounded_wait: bool,
}

impl Processing {
    /// Processing with the given loading and unloading rates, combined with
    /// [`DurationRule::Max`], moving each transfer in one increment.
    pub fn new(loading: Rate, unloading: Rate) -> Self {
        Self {
            loading,
            unloading,
            rule: DurationRule::default(),
            max_increment: None,
            bounded_wait: false,
        }
    }

    /// The same flat rate for loading and unloading.
    pub fn flat(rate: f64) -> ModelResult<Self> {
        Ok(Self::new(Rate::flat(rate)?, Rate::flat(rate)?))
    }

    /// Set how loading and unloading durations combine.
    pub fn with_rule(mut self, rule: DurationRule) -> Self {
        self.rule = rule;
        self
    }

    /// Cap the quantity moved per increment, letting other processors
    /// interleave on shared sites.
    pub fn with_max_increment(mut self, max: f64) -> ModelResult<Self> {
        if !max.is_finite() || max <= 0.0 {
            return Err(ModelError::InvalidConfiguration(format!(
                "max increment must be positive and finite, got {max}"
            )));
        }
        self.max_increment = Some(max);
        Ok(self)
    }

    /// Refuse transfers that the current content and room cannot cover,
    /// instead of waiting for other processes to make them possible.
    pub fn with_bounded_wait(mut self, bounded: bool) -> Self {
        self.bounded_wait = bounded;
        self
    }

    /// The loading rate.
    pub fn loading(&self) -> &Rate {
        &self.loading
    }

    /// The unloading rate.
    pub fn unloading(&self) -> &Rate {
        &self.unloading
    }

    /// The duration rule.
    pub fn rule(&self) -> &DurationRule {
        &self.rule
    }

    /// The per-increment cap, if any.
    pub fn max_increment(&self) -> Option<f64> {
        self.max_increment
    }

    /// Whether unsatisfiable transfers are refused up front.
    pub fn bounded_wait(&self) -> bool {
        self.bounded_wait
    }
}

/// Something that moves material between two storages.
#[allow(async_fn_in_trait)]
pub trait Transferer: Locatable {
    /// The transfer policy.
    fn processing(&self) -> &Processing;

    /// Move exactly `amount` from `origin` to `destination`.
    ///
    /// Proceeds in increments. Each increment holds both storages'
    /// resources for its duration and releases them before the next, so
    /// other processors can interleave. When nothing can move (origin empty
    /// or destination full) the transfer waits for a level change.
    async fn transfer<O, D>(
        &self,
        env: &Environment,
        origin: &O,
        amount: f64,
        destination: &D,
    ) -> ModelResult<()>
    where
        O: Storage + ?Sized,
        D: Storage + ?Sized,
    {
        let processing = self.processing();
        run_transfer(env, self, processing, processing.rule(), origin, amount, destination).await
    }

    /// Bring `ship`'s level to `desired_level` by unloading into `site` or
    /// loading from it.
    ///
    /// Unloading is timed by the unloading rate alone, loading by the
    /// loading rate alone.
    async fn process<S, T>(
        &self,
        env: &Environment,
        ship: &S,
        desired_level: f64,
        site: &T,
    ) -> ModelResult<()>
    where
        S: Storage + ?Sized,
        T: Storage + ?Sized,
    {
        let container = ship.container();
        if !desired_level.is_finite() || !(0.0..=container.capacity()).contains(&desired_level) {
            return Err(ModelError::InvalidTransfer {
                amount: desired_level,
                reason: format!(
                    "desired level outside [0, {}] of {}",
                    container.capacity(),
                    ship.name()
                ),
            });
        }
        let current = container.level();
        let processing = self.processing();
        if desired_level < current {
            let amount = current - desired_level;
            run_transfer(env, self, processing, &DurationRule::Unloading, ship, amount, site).await
        } else if desired_level > current {
            let amount = desired_level - current;
            run_transfer(env, self, processing, &DurationRule::Loading, site, amount, ship).await
        } else {
            Ok(())
        }
    }
}

/// Acquire every distinct resource in ascending id order.
async fn acquire_in_order(resources: &[&Resource]) -> Vec<ResourceGuard> {
    let mut ordered = resources.to_vec();
    ordered.sort_by_key(|resource| resource.id());
    ordered.dedup_by_key(|resource| resource.id());
    let mut guards = Vec::with_capacity(ordered.len());
    for resource in ordered {
        guards.push(resource.request().await);
    }
    guards
}

async fn run_transfer<P, O, D>(
    env: &Environment,
    processor: &P,
    processing: &Processing,
    rule: &DurationRule,
    origin: &O,
    amount: f64,
    destination: &D,
) -> ModelResult<()>
where
    P: Locatable + ?Sized,
    O: Storage + ?Sized,
    D: Storage + ?Sized,
{
    if !amount.is_finite() || amount < 0.0 {
        return Err(ModelError::InvalidTransfer {
            amount,
            reason: "amount must be finite and non-negative".into(),
        });
    }
    let here = processor.geometry();
    if !colocated(here, origin.geometry()) || !colocated(here, destination.geometry()) {
        return Err(ModelError::NotColocated {
            processor: processor.name().to_string(),
            origin: origin.name().to_string(),
            destination: destination.name().to_string(),
        });
    }

    let source = origin.container();
    let target = destination.container();
    if processing.bounded_wait() {
        if amount > source.level() + TRANSFER_EPSILON {
            return Err(ModelError::InvalidTransfer {
                amount,
                reason: format!("{} holds only {}", origin.name(), source.level()),
            });
        }
        if amount > target.room() + TRANSFER_EPSILON {
            return Err(ModelError::InvalidTransfer {
                amount,
                reason: format!("{} has room for only {}", destination.name(), target.room()),
            });
        }
    }

    let mut remaining = amount;
    while remaining > TRANSFER_EPSILON {
        let guards = acquire_in_order(&[origin.resource(), destination.resource()]).await;

        let mut quantity = remaining.min(source.level()).min(target.room());
        if let Some(max) = processing.max_increment() {
            quantity = quantity.min(max);
        }
        if quantity <= TRANSFER_EPSILON {
            let more_content = source.changed();
            let more_room = target.changed();
            drop(guards);
            trace!(
                processor = processor.name(),
                remaining,
                "waiting for content or room"
            );
            futures::future::select(more_content, more_room).await;
            continue;
        }

        let (source_level, target_level) = (source.level(), target.level());
        source.get(quantity)?.await;
        target.put(quantity)?.await;
        let duration = rule.combine(
            processing.loading().duration(target_level, target_level + quantity),
            processing.unloading().duration(source_level, source_level - quantity),
        );

        env.record(
            processor.id(),
            SimEventKind::TransferStarted {
                amount: quantity,
                from: origin.id(),
                to: destination.id(),
            },
            format!(
                "{} moves {quantity} from {} to {}",
                processor.name(),
                origin.name(),
                destination.name()
            ),
        );
        env.timeout(duration)?.await;
        env.record(
            processor.id(),
            SimEventKind::TransferStopped {
                amount: quantity,
                from: origin.id(),
                to: destination.id(),
            },
            format!("{} finished moving {quantity}", processor.name()),
        );

        drop(guards);
        remaining -= quantity;
    }
    Ok(())
}

/// A stationary processing unit, e.g. a crane or a pump at a site.
#[derive(Debug)]
pub struct Processor {
    id: EntityId,
    name: String,
    geometry: Point,
    processing: Processing,
}

impl Processor {
    /// Create a processor at `geometry`.
    pub fn new(name: impl Into<String>, geometry: Point, processing: Processing) -> Self {
        Self {
            id: EntityId::new(),
            name: name.into(),
            geometry,
            processing,
        }
    }
}

impl Identifiable for Processor {
    fn id(&self) -> EntityId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Locatable for Processor {
    fn geometry(&self) -> Point {
        self.geometry
    }
}

impl Transferer for Processor {
    fn processing(&self) -> &Processing {
        &self.processing
    }
}
