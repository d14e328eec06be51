use chrono::{DateTime, TimeDelta, Utc};

/// Tracks virtual time: seconds elapsed since a fixed epoch.
///
/// `now` only ever moves forward. The epoch anchors virtual seconds to
/// calendar dates so conditions can be expressed as absolute instants.
#[derive(Debug, Clone)]
pub struct SimClock {
    epoch: DateTime<Utc>,
    now: f64,
}

impl SimClock {
    /// Create a new clock at offset 0 from the given epoch.
    pub fn new(epoch: DateTime<Utc>) -> Self {
        Self { epoch, now: 0.0 }
    }

    /// Move the clock forward to `time`. Earlier instants are ignored.
    ///
    /// Returns the elapsed seconds.
    pub fn advance_to(&mut self, time: f64) -> f64 {
        if time > self.now {
            let elapsed = time - self.now;
            self.now = time;
            elapsed
        } else {
            0.0
        }
    }

    /// Current virtual time in seconds since the epoch.
    pub fn now(&self) -> f64 {
        self.now
    }

    /// The reference start of the run.
    pub fn epoch(&self) -> DateTime<Utc> {
        self.epoch
    }

    /// Current virtual time as an absolute date.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.date_of(self.now)
    }

    /// Absolute date of a virtual offset.
    pub fn date_of(&self, offset: f64) -> DateTime<Utc> {
        let micros = (offset * 1_000_000.0).round() as i64;
        self.epoch + TimeDelta::microseconds(micros)
    }

    /// Virtual offset (seconds since epoch) of an absolute date.
    pub fn offset_of(&self, date: DateTime<Utc>) -> f64 {
        let delta = date - self.epoch;
        match delta.num_microseconds() {
            Some(us) => us as f64 / 1_000_000.0,
            None => delta.num_milliseconds() as f64 / 1_000.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn epoch() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2019, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn clock_initial_state() {
        let clock = SimClock::new(epoch());
        assert_eq!(clock.now(), 0.0);
        assert_eq!(clock.timestamp(), epoch());
    }

    #[test]
    fn clock_never_moves_backwards() {
        let mut clock = SimClock::new(epoch());
        assert_eq!(clock.advance_to(10.0), 10.0);
        assert_eq!(clock.advance_to(5.0), 0.0);
        assert_eq!(clock.now(), 10.0);
    }

    #[test]
    fn clock_date_round_trips_offsets() {
        let clock = SimClock::new(epoch());
        let date = Utc.with_ymd_and_hms(2019, 1, 15, 0, 0, 0).unwrap();
        let offset = clock.offset_of(date);
        assert!((offset - 14.0 * 24.0 * 3600.0).abs() < 1e-6);
        assert_eq!(clock.date_of(offset), date);
    }

    #[test]
    fn clock_timestamp_follows_now() {
        let mut clock = SimClock::new(epoch());
        clock.advance_to(3600.0);
        assert_eq!(
            clock.timestamp(),
            Utc.with_ymd_and_hms(2019, 1, 1, 1, 0, 0).unwrap()
        );
    }
}
