//! Check-in day
//!
//! "Today" is a calendar date in one configured reference timezone. The day is
//! computed once per request and handed to both the activity feed (window
//! start) and the record store (idempotency date), so the two never disagree.

use chrono::{DateTime, FixedOffset, NaiveDate, TimeZone, Utc};

/// Source of the current instant
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock frozen at one instant
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// A calendar day in the reference timezone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckInDay {
    /// Date used in the idempotency key
    pub date: NaiveDate,
    /// Local midnight of `date`, as a UTC instant. Events at or after this
    /// instant count as today's activity.
    pub start_utc: DateTime<Utc>,
}

impl CheckInDay {
    /// The day containing `now` in `tz`
    pub fn for_instant(now: DateTime<Utc>, tz: FixedOffset) -> Self {
        let date = now.with_timezone(&tz).date_naive();
        Self::for_date(date, tz)
    }

    /// A specific date in `tz`
    pub fn for_date(date: NaiveDate, tz: FixedOffset) -> Self {
        let midnight = date.and_hms_opt(0, 0, 0).unwrap_or_default();
        // Fixed offsets have no gaps, so local midnight always maps to exactly one instant
        let start_utc = tz
            .from_local_datetime(&midnight)
            .single()
            .map(|local| local.with_timezone(&Utc))
            .unwrap_or_else(|| Utc.from_utc_datetime(&midnight));
        Self { date, start_utc }
    }

    /// Whether `at` falls on or after the start of this day
    pub fn includes(&self, at: DateTime<Utc>) -> bool {
        at >= self.start_utc
    }
}
