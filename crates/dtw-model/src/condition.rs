//! Start and stop gates for activities.

use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, TimeDelta, Utc};
use dtw_kernel::{Container, Environment};

use crate::capability::HasContainer;
use crate::error::{ModelError, ModelResult};

type Trigger = Pin<Box<dyn Future<Output = ()>>>;

/// Satisfied from `start` on, or within `[start, stop]` when `stop` is set.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeCondition {
    /// First instant at which the condition holds.
    pub start: DateTime<Utc>,
    /// Last instant at which the condition holds, if bounded.
    pub stop: Option<DateTime<Utc>>,
}

impl TimeCondition {
    /// A window from `start` to `stop` (inclusive), or open-ended.
    pub fn new(start: DateTime<Utc>, stop: Option<DateTime<Utc>>) -> ModelResult<Self> {
        match stop {
            Some(stop) if stop < start => Err(ModelError::InvalidConfiguration(format!(
                "time condition stops ({stop}) before it starts ({start})"
            ))),
            _ => Ok(Self { start, stop }),
        }
    }

    /// Open-ended, starting `seconds` after the current simulated time.
    pub fn after(env: &Environment, seconds: f64) -> Self {
        let micros = (seconds * 1_000_000.0).round() as i64;
        Self {
            start: env.timestamp() + TimeDelta::microseconds(micros),
            stop: None,
        }
    }

    fn is_satisfied(&self, env: &Environment) -> bool {
        let now = env.now();
        now >= env.offset_of(self.start)
            && self.stop.is_none_or(|stop| now <= env.offset_of(stop))
    }
}

/// Satisfied while `min <= level <= max` of the target container.
#[derive(Debug, Clone)]
pub struct LevelCondition {
    /// The watched container.
    pub container: Container,
    /// Lowest satisfying level.
    pub min: f64,
    /// Highest satisfying level.
    pub max: f64,
}

impl LevelCondition {
    /// Watch the container of `target`.
    pub fn new<T: HasContainer + ?Sized>(target: &T, min: f64, max: f64) -> ModelResult<Self> {
        if min.is_nan() || max.is_nan() || min > max {
            return Err(ModelError::InvalidConfiguration(format!(
                "level condition range [{min}, {max}] is empty"
            )));
        }
        Ok(Self {
            container: target.container().clone(),
            min,
            max,
        })
    }

    fn is_satisfied(&self) -> bool {
        let level = self.container.level();
        self.min <= level && level <= self.max
    }
}

/// A predicate over simulated time and container levels.
#[derive(Debug, Clone)]
pub enum Condition {
    /// A time threshold or window.
    Time(TimeCondition),
    /// A container level range.
    Level(LevelCondition),
    /// Every member holds.
    And(Vec<Condition>),
}

impl From<TimeCondition> for Condition {
    fn from(condition: TimeCondition) -> Self {
        Self::Time(condition)
    }
}

impl From<LevelCondition> for Condition {
    fn from(condition: LevelCondition) -> Self {
        Self::Level(condition)
    }
}

impl Condition {
    /// Evaluate against the current state.
    pub fn is_satisfied(&self, env: &Environment) -> bool {
        match self {
            Condition::Time(time) => time.is_satisfied(env),
            Condition::Level(level) => level.is_satisfied(),
            Condition::And(conditions) => conditions.iter().all(|c| c.is_satisfied(env)),
        }
    }

    /// Suspend until the condition holds.
    ///
    /// Re-evaluates whenever a start time is reached or a watched level
    /// changes. A condition that nothing can make true again suspends
    /// forever.
    pub async fn await_satisfied(&self, env: &Environment) -> ModelResult<()> {
        loop {
            if self.is_satisfied(env) {
                return Ok(());
            }
            let mut triggers = Vec::new();
            self.collect_triggers(env, &mut triggers)?;
            if triggers.is_empty() {
                return futures::future::pending().await;
            }
            futures::future::select_all(triggers).await;
        }
    }

    fn collect_triggers(&self, env: &Environment, triggers: &mut Vec<Trigger>) -> ModelResult<()> {
        match self {
            Condition::Time(time) => {
                let start = env.offset_of(time.start);
                if env.now() < start {
                    triggers.push(Box::pin(env.timeout_at(start)?));
                }
            }
            Condition::Level(level) => triggers.push(Box::pin(level.container.changed())),
            Condition::And(conditions) => {
                for condition in conditions {
                    condition.collect_triggers(env, triggers)?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use super::*;
    use crate::geometry::Point;
    use crate::site::Site;

    #[test]
    fn time_window_is_inclusive() {
        let env = Environment::default();
        let start = env.epoch();
        let stop = start + TimeDelta::seconds(10);
        let window = Condition::from(TimeCondition::new(start, Some(stop)).unwrap());
        assert!(window.is_satisfied(&env));

        let env2 = env.clone();
        env.spawn("clock", async move { env2.timeout(10.0).unwrap().await });
        env.run();
        assert!(window.is_satisfied(&env));

        let env2 = env.clone();
        env.spawn("clock", async move { env2.timeout(0.5).unwrap().await });
        env.run();
        assert!(!window.is_satisfied(&env));
    }

    #[test]
    fn reversed_window_is_rejected() {
        let env = Environment::default();
        let start = env.epoch();
        assert!(TimeCondition::new(start, Some(start - TimeDelta::seconds(1))).is_err());
    }

    #[test]
    fn and_requires_every_member() {
        let env = Environment::default();
        let site = Site::new(&env, "pit", Point::default(), 100.0, 50.0, 1).unwrap();
        let level = LevelCondition::new(&site, 0.0, 40.0).unwrap();
        let time = TimeCondition::new(env.epoch(), None).unwrap();
        let both = Condition::And(vec![level.into(), time.into()]);
        assert!(!both.is_satisfied(&env));

        let _taken = site.container().get(10.0).unwrap();
        assert!(both.is_satisfied(&env));
    }

    #[test]
    fn await_wakes_at_start_time() {
        let env = Environment::default();
        let gate = Condition::from(TimeCondition::after(&env, 3600.0));
        let opened_at = Rc::new(Cell::new(-1.0));
        {
            let env2 = env.clone();
            let opened_at = Rc::clone(&opened_at);
            env.process("gate", async move {
                gate.await_satisfied(&env2).await?;
                opened_at.set(env2.now());
                Ok::<_, ModelError>(())
            });
        }
        env.run();
        assert_eq!(opened_at.get(), 3600.0);
    }

    #[test]
    fn await_wakes_on_level_change() {
        let env = Environment::default();
        let site = Rc::new(Site::new(&env, "pit", Point::default(), 100.0, 0.0, 1).unwrap());
        let gate = Condition::from(LevelCondition::new(&*site, 50.0, 100.0).unwrap());
        let opened_at = Rc::new(Cell::new(-1.0));
        {
            let env2 = env.clone();
            let opened_at = Rc::clone(&opened_at);
            env.process("gate", async move {
                gate.await_satisfied(&env2).await?;
                opened_at.set(env2.now());
                Ok::<_, ModelError>(())
            });
        }
        for delay in [10.0, 20.0] {
            let env2 = env.clone();
            let site = Rc::clone(&site);
            env.spawn("filler", async move {
                env2.timeout(delay).unwrap().await;
                site.container().put(30.0).unwrap().await;
            });
        }
        env.run();
        assert_eq!(opened_at.get(), 20.0);
    }

    #[test]
    fn expired_window_never_opens() {
        let env = Environment::default();
        let env2 = env.clone();
        env.spawn("clock", async move { env2.timeout(100.0).unwrap().await });
        env.run();

        let epoch = env.epoch();
        let gate = Condition::from(
            TimeCondition::new(epoch, Some(epoch + TimeDelta::seconds(10))).unwrap(),
        );
        let env2 = env.clone();
        let handle = env.process("gate", async move { gate.await_satisfied(&env2).await });
        let stats = env.run();
        assert!(handle.is_pending());
        assert_eq!(stats.suspended, 1);
        assert_eq!(env.now(), 100.0);
    }
}
