//! Time source for lifecycle stamps

use bson::DateTime;
use std::sync::atomic::{AtomicI64, Ordering};

/// Source of `createdAt` / `updatedAt` values
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime;
}

/// Wall clock that never goes backwards
///
/// If the system clock steps back, the last returned instant is repeated
/// until wall time catches up.
#[derive(Debug, Default)]
pub struct SystemClock {
    last_millis: AtomicI64,
}

impl SystemClock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime {
        let wall = DateTime::now().timestamp_millis();
        let previous = self.last_millis.fetch_max(wall, Ordering::AcqRel);
        DateTime::from_millis(previous.max(wall))
    }
}

/// Clock frozen at a settable instant, for tests
#[derive(Debug)]
pub struct FixedClock {
    millis: AtomicI64,
}

impl FixedClock {
    pub fn new(at: DateTime) -> Self {
        Self {
            millis: AtomicI64::new(at.timestamp_millis()),
        }
    }

    pub fn set(&self, at: DateTime) {
        self.millis.store(at.timestamp_millis(), Ordering::Release);
    }

    pub fn advance_millis(&self, millis: i64) {
        self.millis.fetch_add(millis, Ordering::AcqRel);
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime {
        DateTime::from_millis(self.millis.load(Ordering::Acquire))
    }
}
