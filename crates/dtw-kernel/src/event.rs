use serde::Serialize;

use crate::entity::EntityId;

/// What kind of state transition a telemetry record describes.
///
/// Each variant carries a snapshot of the state relevant to the transition.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SimEventKind {
    // Kernel
    /// A container's level changed.
    LevelChanged {
        /// Level after the change.
        level: f64,
        /// The container's capacity.
        capacity: f64,
    },
    /// A resource slot was granted.
    ResourceGranted {
        /// Slots in use after the grant.
        in_use: usize,
        /// Total slots.
        capacity: usize,
    },
    /// A resource slot was released.
    ResourceReleased {
        /// Slots in use after the release.
        in_use: usize,
        /// Total slots.
        capacity: usize,
    },

    // Movement
    /// A movable left its position.
    Departed {
        /// Longitude of the departure point.
        lon: f64,
        /// Latitude of the departure point.
        lat: f64,
        /// Speed resolved for the trip.
        speed: f64,
    },
    /// A movable reached its destination.
    Arrived {
        /// Longitude of the arrival point.
        lon: f64,
        /// Latitude of the arrival point.
        lat: f64,
    },

    // Processing
    /// A processor started moving one increment of material.
    TransferStarted {
        /// Quantity moved in this increment.
        amount: f64,
        /// The entity material is taken from.
        from: EntityId,
        /// The entity material is put into.
        to: EntityId,
    },
    /// A processor finished one increment.
    TransferStopped {
        /// Quantity moved in this increment.
        amount: f64,
        /// The entity material was taken from.
        from: EntityId,
        /// The entity material was put into.
        to: EntityId,
    },

    // Activity
    /// An activity passed its start gate.
    ActivityStarted,
    /// An activity began a load-move-unload-move cycle.
    CycleStarted {
        /// 1-based cycle number.
        cycle: u64,
        /// Quantity the cycle will carry.
        amount: f64,
    },
    /// An activity completed a cycle.
    CycleCompleted {
        /// 1-based cycle number.
        cycle: u64,
    },
    /// An activity's stop condition was satisfied.
    ActivityTerminated {
        /// Number of completed cycles.
        cycles: u64,
    },

    // Custom
    /// A user-defined record.
    Custom {
        /// A label identifying the custom record type.
        label: String,
    },
}

impl SimEventKind {
    /// Short machine-friendly name of the event type.
    pub fn name(&self) -> &'static str {
        match self {
            Self::LevelChanged { .. } => "level_changed",
            Self::ResourceGranted { .. } => "resource_granted",
            Self::ResourceReleased { .. } => "resource_released",
            Self::Departed { .. } => "departed",
            Self::Arrived { .. } => "arrived",
            Self::TransferStarted { .. } => "transfer_started",
            Self::TransferStopped { .. } => "transfer_stopped",
            Self::ActivityStarted => "activity_started",
            Self::CycleStarted { .. } => "cycle_started",
            Self::CycleCompleted { .. } => "cycle_completed",
            Self::ActivityTerminated { .. } => "activity_terminated",
            Self::Custom { .. } => "custom",
        }
    }
}

/// A telemetry record: something that happened at a virtual instant.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimEvent {
    /// Virtual time (seconds since epoch) when the transition happened.
    pub time: f64,
    /// The entity whose state changed.
    pub entity: EntityId,
    /// The specific kind of transition, with its state snapshot.
    pub kind: SimEventKind,
    /// A human-readable description of the event.
    pub description: String,
}

impl SimEvent {
    /// Create a new record.
    pub fn new(
        time: f64,
        entity: EntityId,
        kind: SimEventKind,
        description: impl Into<String>,
    ) -> Self {
        Self {
            time,
            entity,
            kind,
            description: description.into(),
        }
    }

    /// Check whether a given entity is involved in this event.
    pub fn involves(&self, id: EntityId) -> bool {
        if self.entity == id {
            return true;
        }
        match &self.kind {
            SimEventKind::TransferStarted { from, to, .. }
            | SimEventKind::TransferStopped { from, to, .. } => *from == id || *to == id,
            _ => false,
        }
    }
}

/// A consumer of telemetry records.
///
/// Sinks are purely observational: they are called synchronously while the
/// kernel holds no borrows and must not try to drive the simulation.
pub trait EventSink {
    /// Receive one record.
    fn record(&mut self, event: &SimEvent);
}

/// Accumulates events during a simulation run.
#[derive(Debug, Default)]
pub struct EventLog {
    events: Vec<SimEvent>,
    max_events: usize,
}

impl EventLog {
    /// Create a new event log with the given maximum capacity (0 = unlimited).
    pub fn new(max_events: usize) -> Self {
        Self {
            events: Vec::new(),
            max_events,
        }
    }

    /// Append an event, dropping the oldest events if the log exceeds its capacity.
    pub fn push(&mut self, event: SimEvent) {
        self.events.push(event);
        if self.max_events > 0 && self.events.len() > self.max_events {
            let drain_count = self.events.len() - self.max_events;
            self.events.drain(..drain_count);
        }
    }

    /// Return a slice of all recorded events.
    pub fn events(&self) -> &[SimEvent] {
        &self.events
    }

    /// Return all events recorded at exactly the given virtual time.
    pub fn events_at(&self, time: f64) -> Vec<&SimEvent> {
        self.events.iter().filter(|e| e.time == time).collect()
    }

    /// Return all events involving the given entity.
    pub fn events_for_entity(&self, id: EntityId) -> Vec<&SimEvent> {
        self.events.iter().filter(|e| e.involves(id)).collect()
    }

    /// Return all events of the given type name (see [`SimEventKind::name`]).
    pub fn events_named(&self, name: &str) -> Vec<&SimEvent> {
        self.events
            .iter()
            .filter(|e| e.kind.name() == name)
            .collect()
    }

    /// Return the number of recorded events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Return `true` if no events have been recorded.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Remove all recorded events.
    pub fn clear(&mut self) {
        self.events.clear();
    }
}

impl EventSink for EventLog {
    fn record(&mut self, event: &SimEvent) {
        self.push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn level_event(time: f64, entity: EntityId) -> SimEvent {
        SimEvent::new(
            time,
            entity,
            SimEventKind::LevelChanged {
                level: 1.0,
                capacity: 2.0,
            },
            "test",
        )
    }

    #[test]
    fn event_log_push_and_query() {
        let mut log = EventLog::new(0);
        let id = EntityId::new();
        log.push(level_event(1.0, id));
        assert_eq!(log.len(), 1);
        assert_eq!(log.events_at(1.0).len(), 1);
        assert_eq!(log.events_for_entity(id).len(), 1);
        assert_eq!(log.events_named("level_changed").len(), 1);
    }

    #[test]
    fn event_log_max_events_trims() {
        let mut log = EventLog::new(2);
        let id = EntityId::new();
        for i in 0..5 {
            log.push(level_event(i as f64, id));
        }
        assert_eq!(log.len(), 2);
        // Oldest events were dropped, newest remain
        assert_eq!(log.events()[0].time, 3.0);
        assert_eq!(log.events()[1].time, 4.0);
    }

    #[test]
    fn transfer_events_involve_both_ends() {
        let processor = EntityId::new();
        let from = EntityId::new();
        let to = EntityId::new();
        let other = EntityId::new();
        let event = SimEvent::new(
            0.0,
            processor,
            SimEventKind::TransferStarted {
                amount: 5.0,
                from,
                to,
            },
            "transfer",
        );
        assert!(event.involves(processor));
        assert!(event.involves(from));
        assert!(event.involves(to));
        assert!(!event.involves(other));
    }

    #[test]
    fn event_log_clear() {
        let mut log = EventLog::new(0);
        log.push(level_event(1.0, EntityId::new()));
        assert!(!log.is_empty());
        log.clear();
        assert!(log.is_empty());
    }

    #[test]
    fn event_log_is_a_sink() {
        let mut log = EventLog::new(0);
        let event = level_event(2.0, EntityId::new());
        EventSink::record(&mut log, &event);
        assert_eq!(log.events(), &[event]);
    }
}
