//! Mapping from store-assigned task ids to the keys used by the timer
//! registry and the notification tray.
//!
//! The mapping is the only thing tying a registration to a task: registering
//! again under the same identity replaces the old timer, and a posted
//! notification with the same identity replaces the visible one. With the
//! default namespace the identity is the task id itself.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core::task::TaskId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AlarmIdentity(pub i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NotificationIdentity(pub i64);

impl fmt::Display for AlarmIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "alarm:{}", self.0)
    }
}

impl fmt::Display for NotificationIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "notification:{}", self.0)
    }
}

/// Offset applied to task ids so several id spaces can share one registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IdentityNamespace {
    pub offset: i64,
}

impl IdentityNamespace {
    pub const DEFAULT: Self = Self { offset: 0 };

    pub fn new(offset: i64) -> Self {
        Self { offset }
    }

    pub fn alarm(&self, id: TaskId) -> AlarmIdentity {
        AlarmIdentity(id.get().saturating_add(self.offset))
    }

    pub fn notification(&self, id: TaskId) -> NotificationIdentity {
        NotificationIdentity(id.get().saturating_add(self.offset))
    }

    /// Inverse of [`IdentityNamespace::alarm`].
    pub fn task_for_alarm(&self, identity: AlarmIdentity) -> TaskId {
        TaskId(identity.0.saturating_sub(self.offset))
    }
}
