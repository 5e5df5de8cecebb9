use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Store-assigned task identity. Valid ids are strictly positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TaskId(pub i64);

impl TaskId {
    pub fn get(self) -> i64 {
        self.0
    }

    pub fn is_valid(self) -> bool {
        self.0 > 0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for TaskId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// The three fields a reminder needs, present together.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReminderSpec {
    pub due_date: NaiveDate,
    pub task_time: NaiveTime,
    pub minutes_before: u32,
}

impl ReminderSpec {
    /// Wall-clock due moment, before any time zone is applied.
    pub fn due_at(&self) -> NaiveDateTime {
        self.due_date.and_time(self.task_time)
    }

    pub fn lead(&self) -> chrono::Duration {
        chrono::Duration::minutes(i64::from(self.minutes_before))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    pub description: String,
    pub important: bool,
    pub due_date: Option<NaiveDate>,
    pub reminder_minutes_before: Option<u32>,
    pub task_time: Option<NaiveTime>,
    pub created: NaiveDateTime,
}

impl Task {
    /// Reminder fields, only when all three are set.
    pub fn reminder(&self) -> Option<ReminderSpec> {
        Some(ReminderSpec {
            due_date: self.due_date?,
            task_time: self.task_time?,
            minutes_before: self.reminder_minutes_before?,
        })
    }

    pub fn has_reminder(&self) -> bool {
        self.reminder().is_some()
    }

    pub fn is_due_on(&self, date: NaiveDate) -> bool {
        self.due_date == Some(date)
    }

    pub fn clear_reminder(&mut self) {
        self.reminder_minutes_before = None;
    }

    /// Editable fields, for writing back through the store.
    pub fn draft(&self) -> NewTask {
        NewTask {
            title: self.title.clone(),
            description: self.description.clone(),
            important: self.important,
            due_date: self.due_date,
            reminder_minutes_before: self.reminder_minutes_before,
            task_time: self.task_time,
        }
    }
}

/// A task that has not been stored yet; the store assigns `id` and `created`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTask {
    pub title: String,
    pub description: String,
    pub important: bool,
    pub due_date: Option<NaiveDate>,
    pub reminder_minutes_before: Option<u32>,
    pub task_time: Option<NaiveTime>,
}

impl NewTask {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    pub fn due(mut self, date: NaiveDate) -> Self {
        self.due_date = Some(date);
        self
    }

    pub fn at(mut self, time: NaiveTime) -> Self {
        self.task_time = Some(time);
        self
    }

    pub fn remind_before(mut self, minutes: u32) -> Self {
        self.reminder_minutes_before = Some(minutes);
        self
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn important(mut self, important: bool) -> Self {
        self.important = important;
        self
    }

    pub fn has_title(&self) -> bool {
        !self.title.trim().is_empty()
    }

    pub fn into_task(self, id: TaskId, created: NaiveDateTime) -> Task {
        Task {
            id,
            title: self.title,
            description: self.description,
            important: self.important,
            due_date: self.due_date,
            reminder_minutes_before: self.reminder_minutes_before,
            task_time: self.task_time,
            created,
        }
    }
}
