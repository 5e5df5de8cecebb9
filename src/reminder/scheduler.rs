//! Turns a task snapshot into a timer registration, or the lack of one.
//!
//! [`ReminderScheduler::plan`] is the pure decision; [`ReminderScheduler::schedule`]
//! applies it to the [`AlarmService`]. The scheduler keeps no state of its own.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::ReminderError;
use super::alarm::{AlarmError, AlarmPayload, AlarmService};
use super::clock::{Clock, ReminderZone};
use super::identity::{AlarmIdentity, IdentityNamespace};
use crate::core::task::{Task, TaskId};

/// Why a task ends up with no timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Due date, time of day or lead time is missing.
    MissingFields,
    /// The trigger is not strictly after now.
    Stale { trigger_at: DateTime<Utc> },
    /// The wall-clock due time cannot be placed in the zone, or the lead
    /// reaches past the earliest representable instant.
    UnresolvableTime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulePlan {
    Register {
        identity: AlarmIdentity,
        trigger_at: DateTime<Utc>,
        payload: AlarmPayload,
    },
    Cancel {
        identity: AlarmIdentity,
        reason: SkipReason,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleOutcome {
    Scheduled { trigger_at: DateTime<Utc> },
    Skipped(SkipReason),
    /// Exact timers are not permitted; nothing was registered.
    Denied,
    Invalid(TaskId),
    Failed(String),
}

impl ScheduleOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Invalid(_) | Self::Failed(_))
    }
}

pub struct ReminderScheduler {
    alarms: Arc<dyn AlarmService>,
    clock: Arc<dyn Clock>,
    zone: ReminderZone,
    namespace: IdentityNamespace,
}

impl ReminderScheduler {
    pub fn new(alarms: Arc<dyn AlarmService>, clock: Arc<dyn Clock>, zone: ReminderZone) -> Self {
        Self {
            alarms,
            clock,
            zone,
            namespace: IdentityNamespace::DEFAULT,
        }
    }

    pub fn with_namespace(mut self, namespace: IdentityNamespace) -> Self {
        self.namespace = namespace;
        self
    }

    pub fn namespace(&self) -> IdentityNamespace {
        self.namespace
    }

    pub fn zone(&self) -> ReminderZone {
        self.zone
    }

    /// The instant a task's reminder goes off: due date and time of day read
    /// in the scheduler's zone, minus the lead time.
    pub fn trigger_instant(&self, task: &Task) -> Option<DateTime<Utc>> {
        let spec = task.reminder()?;
        self.zone.resolve(spec.due_at())?.checked_sub_signed(spec.lead())
    }

    pub fn plan(&self, task: &Task, now: DateTime<Utc>) -> Result<SchedulePlan, ReminderError> {
        if !task.id.is_valid() {
            return Err(ReminderError::InvalidTaskId(task.id.get()));
        }
        let identity = self.namespace.alarm(task.id);

        let Some(spec) = task.reminder() else {
            return Ok(SchedulePlan::Cancel {
                identity,
                reason: SkipReason::MissingFields,
            });
        };
        let Some(trigger_at) = self
            .zone
            .resolve(spec.due_at())
            .and_then(|due| due.checked_sub_signed(spec.lead()))
        else {
            return Ok(SchedulePlan::Cancel {
                identity,
                reason: SkipReason::UnresolvableTime,
            });
        };

        if trigger_at <= now {
            return Ok(SchedulePlan::Cancel {
                identity,
                reason: SkipReason::Stale { trigger_at },
            });
        }

        Ok(SchedulePlan::Register {
            identity,
            trigger_at,
            payload: AlarmPayload::for_task(task),
        })
    }

    /// Register (or replace) the timer for `task`, or cancel it when the task
    /// has no future reminder. A timer still armed for exactly the stale
    /// trigger is overdue rather than obsolete and is left to fire late.
    /// Errors are logged and reported in the outcome.
    pub fn schedule(&self, task: &Task) -> ScheduleOutcome {
        let plan = match self.plan(task, self.clock.now()) {
            Ok(plan) => plan,
            Err(e) => {
                log::error!("Not scheduling reminder: {}", e);
                return ScheduleOutcome::Invalid(task.id);
            }
        };

        match plan {
            SchedulePlan::Cancel {
                identity,
                reason: SkipReason::Stale { trigger_at },
            } if self.alarms.pending_trigger(identity) == Some(trigger_at) => {
                log::debug!(
                    "Reminder for task {} is overdue, leaving {} armed",
                    task.id,
                    identity
                );
                ScheduleOutcome::Scheduled { trigger_at }
            }
            SchedulePlan::Cancel { identity, reason } => {
                match reason {
                    SkipReason::MissingFields => {
                        log::debug!("Task {} has no reminder, clearing {}", task.id, identity)
                    }
                    SkipReason::Stale { trigger_at } => log::debug!(
                        "Reminder for task {} at {} is in the past, skipping",
                        task.id,
                        trigger_at
                    ),
                    SkipReason::UnresolvableTime => log::warn!(
                        "Reminder for task {} falls on a time that does not exist locally",
                        task.id
                    ),
                }
                if let Err(e) = self.alarms.cancel(identity) {
                    log::error!("Failed to cancel {}: {}", identity, e);
                    return ScheduleOutcome::Failed(e.to_string());
                }
                ScheduleOutcome::Skipped(reason)
            }
            SchedulePlan::Register {
                identity,
                trigger_at,
                payload,
            } => match self.alarms.register(identity, trigger_at, payload) {
                Ok(()) => {
                    log::info!("Scheduled reminder for task {} at {}", task.id, trigger_at);
                    ScheduleOutcome::Scheduled { trigger_at }
                }
                Err(AlarmError::ExactAlarmDenied) => {
                    log::warn!(
                        "Exact alarms not permitted, reminder for task {} will not fire",
                        task.id
                    );
                    ScheduleOutcome::Denied
                }
                Err(e) => {
                    log::error!("Failed to register {}: {}", identity, e);
                    ScheduleOutcome::Failed(e.to_string())
                }
            },
        }
    }

    /// Remove any timer for `task_id`. Idempotent.
    pub fn cancel(&self, task_id: TaskId) {
        if !task_id.is_valid() {
            log::warn!("Ignoring cancel for invalid task id {}", task_id);
            return;
        }
        let identity = self.namespace.alarm(task_id);
        match self.alarms.cancel(identity) {
            Ok(()) => log::debug!("Cancelled {}", identity),
            Err(e) => log::error!("Failed to cancel {}: {}", identity, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::task::NewTask;
    use crate::reminder::alarm::{AlarmCall, MemoryAlarmService};
    use crate::reminder::clock::FixedClock;
    use chrono::{FixedOffset, NaiveDate, NaiveTime, TimeZone};

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    fn setup(now: DateTime<Utc>) -> (Arc<MemoryAlarmService>, ReminderScheduler) {
        let alarms = Arc::new(MemoryAlarmService::new());
        let scheduler = ReminderScheduler::new(
            alarms.clone(),
            Arc::new(FixedClock(now)),
            ReminderZone::Fixed(FixedOffset::east_opt(0).unwrap()),
        );
        (alarms, scheduler)
    }

    fn task(id: i64, draft: NewTask) -> Task {
        let created = NaiveDate::from_ymd_opt(2025, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        draft.into_task(TaskId(id), created)
    }

    fn pay_rent() -> Task {
        task(
            7,
            NewTask::new("Pay rent")
                .due(NaiveDate::from_ymd_opt(2025, 5, 1).unwrap())
                .at(NaiveTime::from_hms_opt(9, 0, 0).unwrap())
                .remind_before(30),
        )
    }

    #[test]
    fn future_reminder_registers_one_timer() {
        let (alarms, scheduler) = setup(utc(2025, 4, 30, 12, 0));
        let outcome = scheduler.schedule(&pay_rent());
        assert_eq!(
            outcome,
            ScheduleOutcome::Scheduled {
                trigger_at: utc(2025, 5, 1, 8, 30)
            }
        );
        assert_eq!(alarms.active(), 1);
        let reg = alarms.get(AlarmIdentity(7)).unwrap();
        assert_eq!(reg.payload.task_id, Some(7));
        assert_eq!(reg.payload.title.as_deref(), Some("Pay rent"));
    }

    #[test]
    fn scheduling_twice_keeps_one_registration() {
        let (alarms, scheduler) = setup(utc(2025, 4, 30, 12, 0));
        let mut t = pay_rent();
        scheduler.schedule(&t);
        t.reminder_minutes_before = Some(60);
        scheduler.schedule(&t);
        assert_eq!(alarms.active(), 1);
        assert_eq!(
            alarms.get(AlarmIdentity(7)).unwrap().trigger_at,
            utc(2025, 5, 1, 8, 0)
        );
    }

    #[test]
    fn missing_fields_behaves_like_cancel() {
        let (alarms, scheduler) = setup(utc(2025, 4, 30, 12, 0));
        scheduler.schedule(&pay_rent());

        let mut t = pay_rent();
        t.task_time = None;
        assert_eq!(
            scheduler.schedule(&t),
            ScheduleOutcome::Skipped(SkipReason::MissingFields)
        );
        assert_eq!(alarms.active(), 0);
        assert_eq!(
            alarms.calls(),
            vec![AlarmCall::Register(AlarmIdentity(7)), AlarmCall::Cancel(AlarmIdentity(7))]
        );
    }

    #[test]
    fn trigger_at_or_before_now_registers_nothing() {
        let (alarms, scheduler) = setup(utc(2025, 5, 1, 8, 30));
        let outcome = scheduler.schedule(&pay_rent());
        assert_eq!(
            outcome,
            ScheduleOutcome::Skipped(SkipReason::Stale {
                trigger_at: utc(2025, 5, 1, 8, 30)
            })
        );
        assert_eq!(alarms.active(), 0);
        assert!(!alarms.calls().contains(&AlarmCall::Register(AlarmIdentity(7))));
    }

    #[test]
    fn edit_into_the_past_cancels_earlier_registration() {
        let alarms = Arc::new(MemoryAlarmService::new());
        let zone = ReminderZone::Fixed(FixedOffset::east_opt(0).unwrap());
        let now = utc(2025, 5, 1, 8, 0);
        let scheduler = ReminderScheduler::new(alarms.clone(), Arc::new(FixedClock(now)), zone);
        scheduler.schedule(&pay_rent());
        assert_eq!(alarms.active(), 1);

        let mut t = pay_rent();
        t.task_time = NaiveTime::from_hms_opt(8, 10, 0);
        assert_eq!(
            scheduler.schedule(&t),
            ScheduleOutcome::Skipped(SkipReason::Stale {
                trigger_at: utc(2025, 5, 1, 7, 40)
            })
        );
        assert_eq!(alarms.active(), 0);
        assert_eq!(alarms.calls().last(), Some(&AlarmCall::Cancel(AlarmIdentity(7))));
    }

    #[test]
    fn overdue_registration_stays_armed() {
        let alarms = Arc::new(MemoryAlarmService::new());
        let zone = ReminderZone::Fixed(FixedOffset::east_opt(0).unwrap());
        let before = utc(2025, 4, 30, 12, 0);
        let after = utc(2025, 5, 1, 8, 45);
        ReminderScheduler::new(alarms.clone(), Arc::new(FixedClock(before)), zone)
            .schedule(&pay_rent());

        let later = ReminderScheduler::new(alarms.clone(), Arc::new(FixedClock(after)), zone);
        assert_eq!(
            later.schedule(&pay_rent()),
            ScheduleOutcome::Scheduled {
                trigger_at: utc(2025, 5, 1, 8, 30)
            }
        );
        assert_eq!(alarms.active(), 1);
        assert!(!alarms.calls().contains(&AlarmCall::Cancel(AlarmIdentity(7))));
        assert_eq!(alarms.fire_due(after).len(), 1);
    }

    #[test]
    fn lead_past_earliest_instant_is_unresolvable() {
        let (alarms, scheduler) = setup(utc(2025, 4, 30, 12, 0));
        let t = task(
            3,
            NewTask::new("ancient")
                .due(NaiveDate::from_ymd_opt(-262000, 1, 1).unwrap())
                .at(NaiveTime::from_hms_opt(9, 0, 0).unwrap())
                .remind_before(u32::MAX),
        );
        assert_eq!(scheduler.trigger_instant(&t), None);
        assert_eq!(
            scheduler.schedule(&t),
            ScheduleOutcome::Skipped(SkipReason::UnresolvableTime)
        );
        assert_eq!(alarms.active(), 0);
    }

    #[test]
    fn invalid_id_is_rejected() {
        let (alarms, scheduler) = setup(utc(2025, 4, 30, 12, 0));
        let mut t = pay_rent();
        t.id = TaskId(0);
        assert_eq!(scheduler.schedule(&t), ScheduleOutcome::Invalid(TaskId(0)));
        assert!(alarms.calls().is_empty());
    }

    #[test]
    fn denied_exact_alarm_is_silent_skip() {
        let (alarms, scheduler) = setup(utc(2025, 4, 30, 12, 0));
        alarms.deny_exact_alarms(true);
        assert_eq!(scheduler.schedule(&pay_rent()), ScheduleOutcome::Denied);
        assert_eq!(alarms.active(), 0);
    }

    #[test]
    fn cancel_is_idempotent_and_ignores_invalid_ids() {
        let (alarms, scheduler) = setup(utc(2025, 4, 30, 12, 0));
        scheduler.cancel(TaskId(7));
        scheduler.cancel(TaskId(7));
        scheduler.cancel(TaskId(-1));
        assert_eq!(alarms.active(), 0);
        assert_eq!(
            alarms.calls(),
            vec![AlarmCall::Cancel(AlarmIdentity(7)), AlarmCall::Cancel(AlarmIdentity(7))]
        );
    }

    #[test]
    fn trigger_uses_configured_zone() {
        let alarms = Arc::new(MemoryAlarmService::new());
        let scheduler = ReminderScheduler::new(
            alarms,
            Arc::new(FixedClock(utc(2025, 4, 30, 12, 0))),
            ReminderZone::Fixed(FixedOffset::east_opt(2 * 3600).unwrap()),
        );
        assert_eq!(scheduler.trigger_instant(&pay_rent()), Some(utc(2025, 5, 1, 6, 30)));
    }

    #[test]
    fn namespace_shifts_identity() {
        let (alarms, scheduler) = setup(utc(2025, 4, 30, 12, 0));
        let scheduler = scheduler.with_namespace(IdentityNamespace::new(1000));
        scheduler.schedule(&pay_rent());
        assert!(alarms.get(AlarmIdentity(1007)).is_some());
    }
}
