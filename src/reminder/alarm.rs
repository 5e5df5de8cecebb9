//! The wake-up timer registry seam.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::identity::AlarmIdentity;
use crate::core::task::Task;

/// What a timer carries back to the delivery handler when it fires.
///
/// Both fields are optional because a fired payload is untrusted input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlarmPayload {
    pub task_id: Option<i64>,
    pub title: Option<String>,
}

impl AlarmPayload {
    pub fn for_task(task: &Task) -> Self {
        Self {
            task_id: Some(task.id.get()),
            title: Some(task.title.clone()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AlarmError {
    /// The user has not allowed exact timers.
    #[error("exact alarm scheduling is not permitted")]
    ExactAlarmDenied,

    #[error("alarm service unavailable: {0}")]
    Unavailable(String),
}

/// Single-shot, exact, idle-tolerant timers keyed by identity.
///
/// `register` replaces any timer under the same identity. `cancel` is a
/// no-op when nothing is registered.
pub trait AlarmService: Send + Sync {
    fn register(
        &self,
        identity: AlarmIdentity,
        trigger_at: DateTime<Utc>,
        payload: AlarmPayload,
    ) -> Result<(), AlarmError>;

    fn cancel(&self, identity: AlarmIdentity) -> Result<(), AlarmError>;

    /// Trigger of the timer still waiting under `identity`, if any.
    fn pending_trigger(&self, identity: AlarmIdentity) -> Option<DateTime<Utc>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub trigger_at: DateTime<Utc>,
    pub payload: AlarmPayload,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlarmCall {
    Register(AlarmIdentity),
    Cancel(AlarmIdentity),
}

/// Registry that only records. Used for dry runs from the CLI and in tests;
/// [`MemoryAlarmService::fire_due`] plays the part of the timer going off.
#[derive(Debug, Default)]
pub struct MemoryAlarmService {
    registrations: Mutex<HashMap<AlarmIdentity, Registration>>,
    calls: Mutex<Vec<AlarmCall>>,
    deny_exact: AtomicBool,
}

impl MemoryAlarmService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following `register` fail with [`AlarmError::ExactAlarmDenied`].
    pub fn deny_exact_alarms(&self, deny: bool) {
        self.deny_exact.store(deny, Ordering::Relaxed);
    }

    pub fn get(&self, identity: AlarmIdentity) -> Option<Registration> {
        self.registrations
            .lock()
            .ok()
            .and_then(|r| r.get(&identity).cloned())
    }

    pub fn active(&self) -> usize {
        self.registrations.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn calls(&self) -> Vec<AlarmCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Remove and return every registration due at `now`, earliest first.
    pub fn fire_due(&self, now: DateTime<Utc>) -> Vec<AlarmPayload> {
        let Ok(mut registrations) = self.registrations.lock() else {
            return Vec::new();
        };
        let mut due: Vec<(AlarmIdentity, Registration)> = Vec::new();
        registrations.retain(|identity, reg| {
            if reg.trigger_at <= now {
                due.push((*identity, reg.clone()));
                false
            } else {
                true
            }
        });
        due.sort_by_key(|(identity, reg)| (reg.trigger_at, *identity));
        due.into_iter().map(|(_, reg)| reg.payload).collect()
    }

    fn record(&self, call: AlarmCall) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }
}

impl AlarmService for MemoryAlarmService {
    fn register(
        &self,
        identity: AlarmIdentity,
        trigger_at: DateTime<Utc>,
        payload: AlarmPayload,
    ) -> Result<(), AlarmError> {
        if self.deny_exact.load(Ordering::Relaxed) {
            return Err(AlarmError::ExactAlarmDenied);
        }
        self.record(AlarmCall::Register(identity));
        self.registrations
            .lock()
            .map_err(|e| AlarmError::Unavailable(e.to_string()))?
            .insert(identity, Registration { trigger_at, payload });
        Ok(())
    }

    fn cancel(&self, identity: AlarmIdentity) -> Result<(), AlarmError> {
        self.record(AlarmCall::Cancel(identity));
        self.registrations
            .lock()
            .map_err(|e| AlarmError::Unavailable(e.to_string()))?
            .remove(&identity);
        Ok(())
    }

    fn pending_trigger(&self, identity: AlarmIdentity) -> Option<DateTime<Utc>> {
        self.get(identity).map(|r| r.trigger_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 5, 1, h, m, 0).unwrap()
    }

    fn payload(id: i64) -> AlarmPayload {
        AlarmPayload {
            task_id: Some(id),
            title: Some(format!("task {id}")),
        }
    }

    #[test]
    fn register_replaces_same_identity() {
        let alarms = MemoryAlarmService::new();
        alarms.register(AlarmIdentity(1), at(8, 0), payload(1)).unwrap();
        alarms.register(AlarmIdentity(1), at(9, 0), payload(1)).unwrap();
        assert_eq!(alarms.active(), 1);
        assert_eq!(alarms.get(AlarmIdentity(1)).unwrap().trigger_at, at(9, 0));
    }

    #[test]
    fn cancel_without_registration_is_noop() {
        let alarms = MemoryAlarmService::new();
        alarms.cancel(AlarmIdentity(3)).unwrap();
        alarms.cancel(AlarmIdentity(3)).unwrap();
        assert_eq!(alarms.active(), 0);
    }

    #[test]
    fn fire_due_is_single_shot() {
        let alarms = MemoryAlarmService::new();
        alarms.register(AlarmIdentity(2), at(9, 0), payload(2)).unwrap();
        alarms.register(AlarmIdentity(1), at(8, 0), payload(1)).unwrap();
        alarms.register(AlarmIdentity(3), at(12, 0), payload(3)).unwrap();

        let fired = alarms.fire_due(at(10, 0));
        assert_eq!(fired, vec![payload(1), payload(2)]);
        assert!(alarms.fire_due(at(10, 0)).is_empty());
        assert_eq!(alarms.active(), 1);
    }

    #[test]
    fn denied_registration_leaves_registry_untouched() {
        let alarms = MemoryAlarmService::new();
        alarms.deny_exact_alarms(true);
        let err = alarms.register(AlarmIdentity(1), at(8, 0), payload(1)).unwrap_err();
        assert!(matches!(err, AlarmError::ExactAlarmDenied));
        assert_eq!(alarms.active(), 0);
        assert!(alarms.calls().is_empty());
    }
}
