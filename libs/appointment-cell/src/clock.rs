// libs/appointment-cell/src/clock.rs
use std::sync::Mutex;

use chrono::{DateTime, Duration, FixedOffset, NaiveDateTime, Offset, Utc};

/// Source of "now". Appointment dates and times are clinic-local wall clock values.
pub trait Clock: Send + Sync {
    fn now_utc(&self) -> DateTime<Utc>;

    fn offset(&self) -> FixedOffset;

    fn now_local(&self) -> NaiveDateTime {
        self.now_utc().with_timezone(&self.offset()).naive_local()
    }
}

pub struct SystemClock {
    offset: FixedOffset,
}

impl SystemClock {
    pub fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }

    /// Falls back to UTC when the offset is out of range.
    pub fn with_offset_minutes(minutes: i32) -> Self {
        let offset = minutes.checked_mul(60).and_then(FixedOffset::east_opt).unwrap_or_else(|| {
            tracing::warn!("Clinic UTC offset of {} minutes is out of range, using UTC", minutes);
            Utc.fix()
        });
        Self::new(offset)
    }
}

impl Clock for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn offset(&self) -> FixedOffset {
        self.offset
    }
}

/// Manually driven clock for tests and replays.
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    /// Clinic time is taken to be UTC.
    pub fn at(local: NaiveDateTime) -> Self {
        Self {
            now: Mutex::new(local.and_utc()),
        }
    }

    pub fn set(&self, local: NaiveDateTime) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = local.and_utc();
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Clock for FixedClock {
    fn now_utc(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn offset(&self) -> FixedOffset {
        Utc.fix()
    }
}
