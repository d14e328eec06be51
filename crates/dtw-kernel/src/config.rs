use chrono::{DateTime, TimeZone, Utc};

/// Configuration for a simulation run.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// The date that virtual time 0 corresponds to.
    pub epoch: DateTime<Utc>,
    /// Maximum event log size (oldest events dropped when exceeded). 0 = unlimited.
    pub max_events: usize,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            epoch: Utc.with_ymd_and_hms(2019, 1, 1, 0, 0, 0).single().unwrap_or_default(),
            max_events: 0,
        }
    }
}

impl SimConfig {
    /// Set the date that virtual time 0 corresponds to.
    pub fn with_epoch(mut self, epoch: DateTime<Utc>) -> Self {
        self.epoch = epoch;
        self
    }

    /// Set the maximum event log size (0 = unlimited).
    pub fn with_max_events(mut self, max: usize) -> Self {
        self.max_events = max;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_default_values() {
        let config = SimConfig::default();
        assert_eq!(config.max_events, 0);
        assert_eq!(
            config.epoch,
            Utc.with_ymd_and_hms(2019, 1, 1, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn config_builder_chain() {
        let epoch = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let config = SimConfig::default()
            .with_epoch(epoch)
            .with_max_events(500);
        assert_eq!(config.epoch, epoch);
        assert_eq!(config.max_events, 500);
    }
}
