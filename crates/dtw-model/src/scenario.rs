//! JSON scenario files: sites, vessels and the activities connecting them.

use std::collections::HashSet;
use std::path::Path;
use std::rc::Rc;

use chrono::{DateTime, Utc};
use dtw_kernel::{Environment, RunStats, SimConfig};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::activity::Activity;
use crate::capability::{HasContainer, Identifiable, Storage};
use crate::condition::{Condition, LevelCondition, TimeCondition};
use crate::error::{ModelError, ModelResult};
use crate::geometry::Point;
use crate::movable::Speed;
use crate::processor::{Processing, Rate};
use crate::site::Site;
use crate::vessel::{Vessel, VesselConfig};

fn default_resources() -> usize {
    1
}

/// A complete scenario as stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioConfig {
    /// Date of virtual time 0. Defaults to 2019-01-01T00:00:00Z.
    #[serde(default)]
    pub epoch: Option<DateTime<Utc>>,
    /// Event log bound (0 = unlimited).
    #[serde(default)]
    pub max_events: usize,
    /// Fixed locations.
    #[serde(default)]
    pub sites: Vec<SiteEntry>,
    /// Transport and processing units.
    #[serde(default)]
    pub vessels: Vec<VesselEntry>,
    /// Activities connecting sites through vessels.
    #[serde(default)]
    pub activities: Vec<ActivityEntry>,
}

/// A site entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteEntry {
    /// Unique name.
    pub name: String,
    /// Position.
    pub geometry: Point,
    /// Material capacity.
    pub capacity: f64,
    /// Initial material.
    #[serde(default)]
    pub level: f64,
    /// Concurrent service slots.
    #[serde(default = "default_resources")]
    pub nr_resources: usize,
}

/// Speed entry: `{"constant": 5}` or `{"linear": {"empty": 6, "full": 4}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeedConfig {
    /// Same speed whatever the load.
    Constant(f64),
    /// Linear in the fill fraction.
    Linear {
        /// Speed when empty.
        empty: f64,
        /// Speed when full.
        full: f64,
    },
}

impl From<&SpeedConfig> for Speed {
    fn from(config: &SpeedConfig) -> Self {
        match config {
            SpeedConfig::Constant(v) => Speed::Constant(*v),
            SpeedConfig::Linear { empty, full } => Speed::Linear {
                empty: *empty,
                full: *full,
            },
        }
    }
}

/// Rate entry: a flat number or `{"table": [[level, time], ...]}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RateConfig {
    /// Units per second.
    Flat(f64),
    /// Production curve.
    Table {
        /// `(level, cumulative_time)` points.
        table: Vec<(f64, f64)>,
    },
}

impl RateConfig {
    fn build(&self) -> ModelResult<Rate> {
        match self {
            RateConfig::Flat(rate) => Rate::flat(*rate),
            RateConfig::Table { table } => Rate::table(table.clone()),
        }
    }
}

/// A vessel entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VesselEntry {
    /// Unique name.
    pub name: String,
    /// Initial position.
    pub geometry: Point,
    /// Hold capacity.
    pub capacity: f64,
    /// Initial hold content.
    #[serde(default)]
    pub level: f64,
    /// Concurrent service slots.
    #[serde(default = "default_resources")]
    pub nr_resources: usize,
    /// Speed policy.
    pub speed: SpeedConfig,
    /// Loading rate.
    pub loading_rate: RateConfig,
    /// Unloading rate.
    pub unloading_rate: RateConfig,
    /// Per-increment cap.
    #[serde(default)]
    pub max_increment: Option<f64>,
}

/// Condition entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionConfig {
    /// `{"time": {"start": "...", "stop": "..."}}`
    Time {
        /// Window start.
        start: DateTime<Utc>,
        /// Optional window end.
        #[serde(default)]
        stop: Option<DateTime<Utc>>,
    },
    /// `{"level": {"target": "site or vessel", "min": 0, "max": 10}}`
    Level {
        /// Name of the watched site or vessel.
        target: String,
        /// Lowest satisfying level.
        min: f64,
        /// Highest satisfying level.
        max: f64,
    },
    /// `{"and": [...]}`
    And(Vec<ConditionConfig>),
}

/// An activity entry. The vessel loads, moves and unloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityEntry {
    /// Unique name.
    pub name: String,
    /// Name of the site material comes from.
    pub origin: String,
    /// Name of the site material goes to.
    pub destination: String,
    /// Name of the vessel doing the work.
    pub vessel: String,
    /// Gate before the first cycle.
    #[serde(default)]
    pub start_condition: Option<ConditionConfig>,
    /// Gate checked after every cycle.
    #[serde(default)]
    pub stop_condition: Option<ConditionConfig>,
}

/// Activities built from a scenario file: a single vessel does every step.
pub type VesselActivity = Activity<Vessel, Vessel, Vessel>;

/// A built scenario, ready to run.
#[derive(Debug)]
pub struct Scenario {
    env: Environment,
    sites: Vec<Rc<Site>>,
    vessels: Vec<Rc<Vessel>>,
    activities: Vec<VesselActivity>,
    started: bool,
}

impl ScenarioConfig {
    /// Parse a scenario from JSON text.
    pub fn from_json(text: &str) -> ModelResult<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Read and parse a scenario file.
    pub fn load(path: &Path) -> ModelResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }
}

impl Scenario {
    /// Validate `config` and construct its entities on a fresh environment.
    pub fn build(config: &ScenarioConfig) -> ModelResult<Self> {
        let mut sim_config = SimConfig::default().with_max_events(config.max_events);
        if let Some(epoch) = config.epoch {
            sim_config = sim_config.with_epoch(epoch);
        }
        let env = Environment::new(sim_config);

        let mut names = HashSet::new();
        let sites_and_vessels = config
            .sites
            .iter()
            .map(|s| &s.name)
            .chain(config.vessels.iter().map(|v| &v.name));
        for name in sites_and_vessels {
            if !names.insert(name.as_str()) {
                return Err(ModelError::DuplicateName(name.clone()));
            }
        }

        let sites = config
            .sites
            .iter()
            .map(|s| {
                Site::new(&env, &s.name, s.geometry, s.capacity, s.level, s.nr_resources)
                    .map(Rc::new)
            })
            .collect::<ModelResult<Vec<_>>>()?;

        let vessels = config
            .vessels
            .iter()
            .map(|v| build_vessel(&env, v).map(Rc::new))
            .collect::<ModelResult<Vec<_>>>()?;

        let mut scenario = Self {
            env,
            sites,
            vessels,
            activities: Vec::new(),
            started: false,
        };

        let mut activity_names = HashSet::new();
        for activity in &config.activities {
            if !activity_names.insert(activity.name.as_str()) {
                return Err(ModelError::DuplicateName(activity.name.clone()));
            }
            let built = scenario.build_activity(activity)?;
            scenario.activities.push(built);
        }
        Ok(scenario)
    }

    fn build_activity(&self, config: &ActivityEntry) -> ModelResult<VesselActivity> {
        let origin: Rc<dyn Storage> = self.require_site(&config.origin)?;
        let destination: Rc<dyn Storage> = self.require_site(&config.destination)?;
        let vessel = self
            .vessel(&config.vessel)
            .ok_or_else(|| ModelError::UnknownEntity {
                kind: "vessel",
                name: config.vessel.clone(),
            })?;

        let mut activity = Activity::new(
            &config.name,
            origin,
            destination,
            Rc::clone(&vessel),
            Rc::clone(&vessel),
            vessel,
        );
        if let Some(start) = &config.start_condition {
            activity = activity.with_start_condition(self.build_condition(start)?);
        }
        if let Some(stop) = &config.stop_condition {
            activity = activity.with_stop_condition(self.build_condition(stop)?);
        }
        Ok(activity)
    }

    fn build_condition(&self, config: &ConditionConfig) -> ModelResult<Condition> {
        Ok(match config {
            ConditionConfig::Time { start, stop } => {
                Condition::Time(TimeCondition::new(*start, *stop)?)
            }
            ConditionConfig::Level { target, min, max } => {
                let level = if let Some(site) = self.site(target) {
                    LevelCondition::new(&*site, *min, *max)?
                } else if let Some(vessel) = self.vessel(target) {
                    LevelCondition::new(&*vessel, *min, *max)?
                } else {
                    return Err(ModelError::UnknownEntity {
                        kind: "site or vessel",
                        name: target.clone(),
                    });
                };
                Condition::Level(level)
            }
            ConditionConfig::And(members) => Condition::And(
                members
                    .iter()
                    .map(|member| self.build_condition(member))
                    .collect::<ModelResult<Vec<_>>>()?,
            ),
        })
    }

    fn require_site(&self, name: &str) -> ModelResult<Rc<Site>> {
        self.site(name).ok_or_else(|| ModelError::UnknownEntity {
            kind: "site",
            name: name.to_string(),
        })
    }

    /// Look up a site by name.
    pub fn site(&self, name: &str) -> Option<Rc<Site>> {
        self.sites.iter().find(|s| s.name() == name).cloned()
    }

    /// Look up a vessel by name.
    pub fn vessel(&self, name: &str) -> Option<Rc<Vessel>> {
        self.vessels.iter().find(|v| v.name() == name).cloned()
    }

    /// The environment the scenario runs in.
    pub fn env(&self) -> &Environment {
        &self.env
    }

    /// All sites, in file order.
    pub fn sites(&self) -> &[Rc<Site>] {
        &self.sites
    }

    /// All vessels, in file order.
    pub fn vessels(&self) -> &[Rc<Vessel>] {
        &self.vessels
    }

    /// All activities, in file order.
    pub fn activities(&self) -> &[VesselActivity] {
        &self.activities
    }

    /// Start every activity (once) and run until nothing can happen.
    pub fn run(&mut self) -> RunStats {
        self.run_until(f64::INFINITY)
    }

    /// Start every activity (once) and run up to `until` seconds.
    pub fn run_until(&mut self, until: f64) -> RunStats {
        if !self.started {
            for activity in &self.activities {
                activity.start(&self.env);
            }
            self.started = true;
        }
        let stats = self.env.run_until(until);
        info!(
            now = stats.final_time,
            suspended = stats.suspended,
            "scenario run finished"
        );
        stats
    }

    /// Total material currently held at sites.
    pub fn material_at_sites(&self) -> f64 {
        self.sites.iter().map(|s| s.container().level()).sum()
    }
}

fn build_vessel(env: &Environment, entry: &VesselEntry) -> ModelResult<Vessel> {
    let mut processing = Processing::new(entry.loading_rate.build()?, entry.unloading_rate.build()?);
    if let Some(max) = entry.max_increment {
        processing = processing.with_max_increment(max)?;
    }
    let config = VesselConfig::new(entry.capacity, Speed::from(&entry.speed), processing)
        .with_level(entry.level)
        .with_resources(entry.nr_resources);
    Vessel::new(env, &entry.name, entry.geometry, config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::ActivityState;

    const SCENARIO: &str = r#"{
        "epoch": "2019-01-01T00:00:00Z",
        "sites": [
            {"name": "Pit", "geometry": {"lon": 4.18, "lat": 52.18}, "capacity": 3000, "level": 3000},
            {"name": "Dump", "geometry": {"lon": 4.18, "lat": 52.18}, "capacity": 3000}
        ],
        "vessels": [
            {
                "name": "Hopper",
                "geometry": {"lon": 4.18, "lat": 52.18},
                "capacity": 1000,
                "speed": {"constant": 1},
                "loading_rate": 1,
                "unloading_rate": {"table": [[0, 0], [1000, 500]]}
            }
        ],
        "activities": [
            {"name": "Haul", "origin": "Pit", "destination": "Dump", "vessel": "Hopper",
             "stop_condition": {"level": {"target": "Pit", "min": 0, "max": 1000}}}
        ]
    }"#;

    #[test]
    fn scenario_builds_and_runs() {
        let config = ScenarioConfig::from_json(SCENARIO).unwrap();
        let mut scenario = Scenario::build(&config).unwrap();
        assert_eq!(scenario.sites().len(), 2);
        let stats = scenario.run();
        assert_eq!(stats.failed, 0);

        let activity = &scenario.activities()[0];
        assert_eq!(activity.state(), ActivityState::Terminated);
        assert_eq!(activity.cycles(), 2);
        // 1000 s loading at 1/s plus 500 s along the unloading table.
        assert_eq!(stats.final_time, 3000.0);
        assert_eq!(scenario.site("Dump").unwrap().container().level(), 2000.0);
        assert_eq!(scenario.material_at_sites(), 3000.0);
    }

    #[test]
    fn unknown_names_are_reported() {
        let mut config = ScenarioConfig::from_json(SCENARIO).unwrap();
        config.activities[0].vessel = "Ghost".into();
        let err = Scenario::build(&config).unwrap_err();
        assert!(matches!(err, ModelError::UnknownEntity { kind: "vessel", .. }));
    }

    #[test]
    fn duplicate_names_are_reported() {
        let mut config = ScenarioConfig::from_json(SCENARIO).unwrap();
        config.sites[1].name = "Pit".into();
        let err = Scenario::build(&config).unwrap_err();
        assert!(matches!(err, ModelError::DuplicateName(name) if name == "Pit"));
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        let err = ScenarioConfig::from_json("{\"sites\": 3}").unwrap_err();
        assert!(matches!(err, ModelError::Json(_)));
    }

    #[test]
    fn condition_configs_parse() {
        let parsed: ConditionConfig = serde_json::from_str(
            r#"{"and": [
                {"time": {"start": "2019-01-15T00:00:00Z"}},
                {"level": {"target": "Pit", "min": 0, "max": 9000}}
            ]}"#,
        )
        .unwrap();
        let ConditionConfig::And(members) = parsed else {
            panic!("expected and");
        };
        assert_eq!(members.len(), 2);
        assert!(matches!(members[0], ConditionConfig::Time { stop: None, .. }));
    }
}
