//! Handling a fired reminder timer: validate the payload and post a
//! notification keyed by the task.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use super::ReminderError;
use super::alarm::AlarmPayload;
use super::identity::{IdentityNamespace, NotificationIdentity};
use crate::core::task::TaskId;

pub const DEFAULT_TITLE: &str = "Reminder";
const REMINDER_BODY: &str = "This task is coming up soon.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationChannel {
    pub id: String,
    pub name: String,
    pub description: String,
}

impl Default for NotificationChannel {
    fn default() -> Self {
        Self {
            id: "task_reminders".into(),
            name: "Task reminders".into(),
            description: "Notifications for upcoming tasks".into(),
        }
    }
}

/// What tapping the notification does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TapAction {
    OpenMainScreen,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub identity: NotificationIdentity,
    pub channel_id: String,
    pub title: String,
    pub body: String,
    pub tap_action: TapAction,
    /// Dismiss on tap.
    pub auto_cancel: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationPermission {
    Granted,
    Denied,
    /// The platform does not ask for consent.
    NotRequired,
}

impl NotificationPermission {
    pub fn allows_posting(self) -> bool {
        !matches!(self, Self::Denied)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("notification service unavailable: {0}")]
    Unavailable(String),
}

/// The notification tray seam. Posting with an identity that is already
/// visible replaces it.
pub trait Notifier: Send + Sync {
    fn permission(&self) -> NotificationPermission;

    /// Declare the channel. Safe to repeat.
    fn ensure_channel(&self, channel: &NotificationChannel) -> Result<(), NotifyError>;

    fn post(&self, notification: Notification) -> Result<(), NotifyError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyCommand {
    EnsureChannel(NotificationChannel),
    Post(Notification),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Posted(NotificationIdentity),
    InvalidPayload,
    /// Consent missing; nothing posted and nothing can be asked from here.
    PermissionDenied,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryPlan {
    pub commands: Vec<NotifyCommand>,
    pub outcome: DeliveryOutcome,
}

pub struct ReminderDelivery {
    channel: NotificationChannel,
    default_title: String,
    namespace: IdentityNamespace,
}

impl ReminderDelivery {
    pub fn new(channel: NotificationChannel, default_title: impl Into<String>) -> Self {
        Self {
            channel,
            default_title: default_title.into(),
            namespace: IdentityNamespace::DEFAULT,
        }
    }

    pub fn with_namespace(mut self, namespace: IdentityNamespace) -> Self {
        self.namespace = namespace;
        self
    }

    pub fn plan(
        &self,
        payload: &AlarmPayload,
        permission: NotificationPermission,
    ) -> Result<DeliveryPlan, ReminderError> {
        let task_id = match payload.task_id {
            Some(id) if TaskId(id).is_valid() => TaskId(id),
            Some(id) => return Err(ReminderError::InvalidTaskId(id)),
            None => return Err(ReminderError::MissingTaskId),
        };

        let mut commands = vec![NotifyCommand::EnsureChannel(self.channel.clone())];
        if !permission.allows_posting() {
            return Ok(DeliveryPlan {
                commands,
                outcome: DeliveryOutcome::PermissionDenied,
            });
        }

        let title = payload
            .title
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(self.default_title.as_str())
            .to_string();
        let identity = self.namespace.notification(task_id);
        commands.push(NotifyCommand::Post(Notification {
            identity,
            channel_id: self.channel.id.clone(),
            title,
            body: REMINDER_BODY.to_string(),
            tap_action: TapAction::OpenMainScreen,
            auto_cancel: true,
        }));

        Ok(DeliveryPlan {
            commands,
            outcome: DeliveryOutcome::Posted(identity),
        })
    }

    /// Handle one fired timer. Never panics on bad input; the outcome says
    /// what happened.
    pub fn deliver(&self, payload: &AlarmPayload, notifier: &dyn Notifier) -> DeliveryOutcome {
        let plan = match self.plan(payload, notifier.permission()) {
            Ok(plan) => plan,
            Err(e) => {
                log::error!("Dropping fired reminder: {}", e);
                return DeliveryOutcome::InvalidPayload;
            }
        };

        for command in plan.commands {
            let result = match command {
                NotifyCommand::EnsureChannel(channel) => notifier.ensure_channel(&channel),
                NotifyCommand::Post(notification) => notifier.post(notification),
            };
            if let Err(e) = result {
                log::error!("Failed to deliver reminder: {}", e);
                return DeliveryOutcome::Failed(e.to_string());
            }
        }

        if plan.outcome == DeliveryOutcome::PermissionDenied {
            log::warn!("Notification permission not granted, reminder not shown");
        }
        plan.outcome
    }
}

/// Tray that keeps posted notifications in memory, one per identity.
#[derive(Debug)]
pub struct MemoryNotifier {
    permission: NotificationPermission,
    channels: Mutex<HashSet<String>>,
    visible: Mutex<HashMap<NotificationIdentity, Notification>>,
    posts: Mutex<usize>,
}

impl MemoryNotifier {
    pub fn new(permission: NotificationPermission) -> Self {
        Self {
            permission,
            channels: Mutex::new(HashSet::new()),
            visible: Mutex::new(HashMap::new()),
            posts: Mutex::new(0),
        }
    }

    pub fn visible(&self, identity: NotificationIdentity) -> Option<Notification> {
        self.visible
            .lock()
            .ok()
            .and_then(|v| v.get(&identity).cloned())
    }

    pub fn visible_count(&self) -> usize {
        self.visible.lock().map(|v| v.len()).unwrap_or(0)
    }

    pub fn post_count(&self) -> usize {
        self.posts.lock().map(|p| *p).unwrap_or(0)
    }

    pub fn has_channel(&self, id: &str) -> bool {
        self.channels.lock().map(|c| c.contains(id)).unwrap_or(false)
    }
}

impl Notifier for MemoryNotifier {
    fn permission(&self) -> NotificationPermission {
        self.permission
    }

    fn ensure_channel(&self, channel: &NotificationChannel) -> Result<(), NotifyError> {
        self.channels
            .lock()
            .map_err(|e| NotifyError::Unavailable(e.to_string()))?
            .insert(channel.id.clone());
        Ok(())
    }

    fn post(&self, notification: Notification) -> Result<(), NotifyError> {
        let mut visible = self
            .visible
            .lock()
            .map_err(|e| NotifyError::Unavailable(e.to_string()))?;
        visible.insert(notification.identity, notification);
        if let Ok(mut posts) = self.posts.lock() {
            *posts += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delivery() -> ReminderDelivery {
        ReminderDelivery::new(NotificationChannel::default(), DEFAULT_TITLE)
    }

    fn payload(id: Option<i64>, title: Option<&str>) -> AlarmPayload {
        AlarmPayload {
            task_id: id,
            title: title.map(String::from),
        }
    }

    #[test]
    fn posts_notification_keyed_by_task() {
        let notifier = MemoryNotifier::new(NotificationPermission::Granted);
        let outcome = delivery().deliver(&payload(Some(7), Some("Pay rent")), &notifier);
        assert_eq!(outcome, DeliveryOutcome::Posted(NotificationIdentity(7)));

        let shown = notifier.visible(NotificationIdentity(7)).unwrap();
        assert_eq!(shown.title, "Pay rent");
        assert_eq!(shown.tap_action, TapAction::OpenMainScreen);
        assert!(notifier.has_channel("task_reminders"));
    }

    #[test]
    fn second_delivery_replaces_visible_notification() {
        let notifier = MemoryNotifier::new(NotificationPermission::NotRequired);
        let d = delivery();
        d.deliver(&payload(Some(7), Some("Pay rent")), &notifier);
        d.deliver(&payload(Some(7), Some("Pay rent (again)")), &notifier);
        assert_eq!(notifier.visible_count(), 1);
        assert_eq!(notifier.post_count(), 2);
        assert_eq!(
            notifier.visible(NotificationIdentity(7)).unwrap().title,
            "Pay rent (again)"
        );
    }

    #[test]
    fn missing_title_uses_default() {
        let plan = delivery()
            .plan(&payload(Some(3), Some("  ")), NotificationPermission::Granted)
            .unwrap();
        let Some(NotifyCommand::Post(n)) = plan.commands.last() else {
            panic!("expected a post command");
        };
        assert_eq!(n.title, DEFAULT_TITLE);
    }

    #[test]
    fn invalid_or_missing_id_aborts() {
        let notifier = MemoryNotifier::new(NotificationPermission::Granted);
        let d = delivery();
        assert_eq!(
            d.deliver(&payload(Some(0), Some("x")), &notifier),
            DeliveryOutcome::InvalidPayload
        );
        assert_eq!(
            d.deliver(&payload(None, Some("x")), &notifier),
            DeliveryOutcome::InvalidPayload
        );
        assert_eq!(notifier.post_count(), 0);
        assert!(!notifier.has_channel("task_reminders"));
    }

    #[test]
    fn denied_permission_declares_channel_but_posts_nothing() {
        let notifier = MemoryNotifier::new(NotificationPermission::Denied);
        let outcome = delivery().deliver(&payload(Some(7), Some("Pay rent")), &notifier);
        assert_eq!(outcome, DeliveryOutcome::PermissionDenied);
        assert!(notifier.has_channel("task_reminders"));
        assert_eq!(notifier.post_count(), 0);
    }
}
