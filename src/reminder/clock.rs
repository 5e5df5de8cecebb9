use chrono::{DateTime, FixedOffset, LocalResult, NaiveDateTime, TimeZone, Utc};

/// Source of "now" for trigger comparisons.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock stuck at one instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Time zone a task's wall-clock due time is read in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReminderZone {
    Local,
    Fixed(FixedOffset),
}

impl ReminderZone {
    /// `None` or an out-of-range offset means the system zone.
    pub fn from_offset_minutes(minutes: Option<i32>) -> Self {
        match minutes.and_then(|m| FixedOffset::east_opt(m.checked_mul(60)?)) {
            Some(offset) => Self::Fixed(offset),
            None => Self::Local,
        }
    }

    /// Resolve a wall-clock time to an absolute instant.
    ///
    /// Times repeated by a backward shift resolve to the earlier instant.
    /// Times skipped by a forward shift are moved one hour later.
    pub fn resolve(&self, naive: NaiveDateTime) -> Option<DateTime<Utc>> {
        match self {
            Self::Local => resolve_in(&chrono::Local, naive),
            Self::Fixed(offset) => resolve_in(offset, naive),
        }
    }
}

fn resolve_in<Tz: TimeZone>(tz: &Tz, naive: NaiveDateTime) -> Option<DateTime<Utc>> {
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => Some(dt.with_timezone(&Utc)),
        LocalResult::Ambiguous(earliest, _) => Some(earliest.with_timezone(&Utc)),
        LocalResult::None => tz
            .from_local_datetime(&(naive + chrono::Duration::hours(1)))
            .earliest()
            .map(|dt| dt.with_timezone(&Utc)),
    }
}
