//! Injectable clock (spec.md §9: "Global clock is injectable so tests can
//! pin time; no hidden singleton"), generalized from the teacher's
//! `Timestamp`/`Duration` newtypes into a small trait so the controller and
//! planner never call `Utc::now()`/`Local::now()` directly.

use chrono::FixedOffset;

use crate::domain::types::Timestamp;

pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Production clock: wall-clock time converted into the configured market
/// timezone offset.
pub struct SystemClock {
    offset: FixedOffset,
}

impl SystemClock {
    pub fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp(chrono::Utc::now().with_timezone(&self.offset))
    }
}

/// Test clock pinned to a fixed instant; `advance` lets a test step forward
/// quarter by quarter without sleeping.
pub struct FixedClock {
    now: std::sync::Mutex<Timestamp>,
}

impl FixedClock {
    pub fn new(now: Timestamp) -> Self {
        Self {
            now: std::sync::Mutex::new(now),
        }
    }

    pub fn advance(&self, duration: crate::domain::types::Duration) {
        let mut guard = self.now.lock().unwrap();
        *guard = guard.add(duration);
    }

    pub fn set(&self, now: Timestamp) {
        *self.now.lock().unwrap() = now;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> Timestamp {
        *self.now.lock().unwrap()
    }
}
