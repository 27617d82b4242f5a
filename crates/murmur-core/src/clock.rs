//! Time source abstraction.
//!
//! Everything that compares against "now" (due-set sweeps, proactive
//! follow-up times, relative ages) reads it through a [`Clock`] so tests can
//! pin or advance time without sleeping.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};

use crate::types::Timestamp;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    fn timestamp(&self) -> Timestamp {
        Timestamp::from_datetime(self.now())
    }
}

pub type SharedClock = Arc<dyn Clock>;

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn at_timestamp(secs: i64) -> Self {
        Self::new(Timestamp(secs).to_datetime())
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::at_timestamp(1_700_000_000);
        assert_eq!(clock.timestamp(), Timestamp(1_700_000_000));

        clock.advance(Duration::seconds(30));
        assert_eq!(clock.timestamp(), Timestamp(1_700_000_030));

        clock.set(Timestamp(5).to_datetime());
        assert_eq!(clock.timestamp(), Timestamp(5));
    }

    #[test]
    fn test_system_clock_is_close_to_now() {
        let before = Utc::now();
        let observed = SystemClock.now();
        assert!(observed >= before);
    }

    #[test]
    fn test_shared_clock_object_safety() {
        let clock: SharedClock = Arc::new(ManualClock::at_timestamp(100));
        assert_eq!(clock.timestamp().0, 100);
    }
}
