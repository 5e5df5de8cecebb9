//! The task reminder lifecycle: derive a trigger, arm a timer, post a
//! notification when it fires, and re-arm everything after a restart.

pub mod alarm;
pub mod boot;
pub mod clock;
pub mod delivery;
pub mod identity;
pub mod scheduler;

pub use alarm::{AlarmError, AlarmPayload, AlarmService, MemoryAlarmService};
pub use boot::{BootRecovery, BootReport, CompletionSignal, completion_channel};
pub use clock::{Clock, FixedClock, ReminderZone, SystemClock};
pub use delivery::{
    DeliveryOutcome, MemoryNotifier, Notification, NotificationChannel, NotificationPermission,
    Notifier, NotifyError, ReminderDelivery,
};
pub use identity::{AlarmIdentity, IdentityNamespace, NotificationIdentity};
pub use scheduler::{ReminderScheduler, ScheduleOutcome, SchedulePlan, SkipReason};

/// A reminder that cannot be tied to a task.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReminderError {
    #[error("invalid task id {0}")]
    InvalidTaskId(i64),

    #[error("reminder payload has no task id")]
    MissingTaskId,
}
