//! A controllable clock shared by the in-memory fakes, so tests can express
//! lease expiry and backoff scheduling without real sleeps.

use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};

pub struct VirtualClock {
    now: Mutex<DateTime<Utc>>,
}

impl VirtualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(start) }
    }

    pub fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }

    pub fn advance(&self, delta: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += delta;
    }

    pub fn set(&self, when: DateTime<Utc>) {
        *self.now.lock().unwrap() = when;
    }
}

impl Default for VirtualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advances_by_delta() {
        let clock = VirtualClock::new(DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z").unwrap().with_timezone(&Utc));
        clock.advance(Duration::seconds(90));
        assert_eq!(clock.now(), DateTime::parse_from_rfc3339("2026-01-01T00:01:30Z").unwrap().with_timezone(&Utc));
    }
}
