//! In-process timer registry and notification tray for the `nudge run`
//! daemon.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::NudgeConfig;
use crate::reminder::{
    AlarmError, AlarmIdentity, AlarmPayload, AlarmService, BootRecovery, BootReport,
    Notification, NotificationChannel, NotificationIdentity, NotificationPermission, Notifier,
    NotifyError, ReminderDelivery, ReminderScheduler, SystemClock, completion_channel,
};
use crate::store::TaskStore;

/// Longest single sleep. Tokio sleeps on the monotonic clock, which stops
/// while the machine is suspended, so a sleeper wakes at least this often to
/// compare against wall time.
const MAX_NAP: std::time::Duration = std::time::Duration::from_secs(30);

struct Timer {
    generation: u64,
    trigger_at: DateTime<Utc>,
    handle: JoinHandle<()>,
}

type Timers = Arc<Mutex<HashMap<AlarmIdentity, Timer>>>;

/// Timers backed by Tokio sleeps. A fired timer removes itself and sends its
/// payload on the channel handed to [`TokioAlarmService::new`]. A trigger
/// already in the past fires right away.
pub struct TokioAlarmService {
    handle: tokio::runtime::Handle,
    exact_allowed: bool,
    timers: Timers,
    generation: AtomicU64,
    fired: mpsc::UnboundedSender<AlarmPayload>,
}

impl TokioAlarmService {
    /// Must be called from inside a Tokio runtime.
    pub fn new(exact_allowed: bool, fired: mpsc::UnboundedSender<AlarmPayload>) -> Self {
        Self {
            handle: tokio::runtime::Handle::current(),
            exact_allowed,
            timers: Arc::new(Mutex::new(HashMap::new())),
            generation: AtomicU64::new(0),
            fired,
        }
    }

    pub fn pending(&self) -> usize {
        self.timers.lock().map(|t| t.len()).unwrap_or(0)
    }

    /// Cancel every timer whose identity is not in `keep`.
    pub fn retain(&self, keep: &HashSet<AlarmIdentity>) {
        if let Ok(mut timers) = self.timers.lock() {
            timers.retain(|identity, timer| {
                let keep = keep.contains(identity);
                if !keep {
                    log::debug!("Dropping orphaned timer {}", identity);
                    timer.handle.abort();
                }
                keep
            });
        }
    }
}

impl AlarmService for TokioAlarmService {
    fn register(
        &self,
        identity: AlarmIdentity,
        trigger_at: DateTime<Utc>,
        payload: AlarmPayload,
    ) -> Result<(), AlarmError> {
        if !self.exact_allowed {
            return Err(AlarmError::ExactAlarmDenied);
        }
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let timers = self.timers.clone();
        let fired = self.fired.clone();

        let mut registry = self
            .timers
            .lock()
            .map_err(|e| AlarmError::Unavailable(e.to_string()))?;

        let handle = self.handle.spawn(async move {
            while let Ok(remaining) = (trigger_at - Utc::now()).to_std() {
                if remaining.is_zero() {
                    break;
                }
                tokio::time::sleep(remaining.min(MAX_NAP)).await;
            }
            // A replacement may have raced this timer; only the current generation fires.
            let current = match timers.lock() {
                Ok(mut timers) => match timers.get(&identity) {
                    Some(timer) if timer.generation == generation => {
                        timers.remove(&identity).is_some()
                    }
                    _ => false,
                },
                Err(_) => false,
            };
            if current && fired.send(payload).is_err() {
                log::warn!("Timer {} fired after delivery stopped", identity);
            }
        });

        let timer = Timer {
            generation,
            trigger_at,
            handle,
        };
        if let Some(previous) = registry.insert(identity, timer) {
            previous.handle.abort();
        }
        Ok(())
    }

    fn cancel(&self, identity: AlarmIdentity) -> Result<(), AlarmError> {
        let mut timers = self
            .timers
            .lock()
            .map_err(|e| AlarmError::Unavailable(e.to_string()))?;
        if let Some(timer) = timers.remove(&identity) {
            timer.handle.abort();
        }
        Ok(())
    }

    fn pending_trigger(&self, identity: AlarmIdentity) -> Option<DateTime<Utc>> {
        let timers = self.timers.lock().ok()?;
        timers.get(&identity).map(|timer| timer.trigger_at)
    }
}

/// Shows notifications on stdout and in the log. Only identities are kept,
/// to tell a replacement from a first post.
pub struct LogNotifier {
    permission: NotificationPermission,
    channels: Mutex<HashSet<String>>,
    shown: Mutex<HashSet<NotificationIdentity>>,
}

impl LogNotifier {
    pub fn new(enabled: bool) -> Self {
        Self {
            permission: if enabled {
                NotificationPermission::Granted
            } else {
                NotificationPermission::Denied
            },
            channels: Mutex::new(HashSet::new()),
            shown: Mutex::new(HashSet::new()),
        }
    }
}

impl Notifier for LogNotifier {
    fn permission(&self) -> NotificationPermission {
        self.permission
    }

    fn ensure_channel(&self, channel: &NotificationChannel) -> Result<(), NotifyError> {
        let mut channels = self
            .channels
            .lock()
            .map_err(|e| NotifyError::Unavailable(e.to_string()))?;
        if channels.insert(channel.id.clone()) {
            log::info!("Declared notification channel '{}'", channel.name);
        }
        Ok(())
    }

    fn post(&self, notification: Notification) -> Result<(), NotifyError> {
        let mut shown = self
            .shown
            .lock()
            .map_err(|e| NotifyError::Unavailable(e.to_string()))?;
        let replaced = !shown.insert(notification.identity);
        println!("[reminder] {}: {}", notification.title, notification.body);
        log::info!(
            "Posted {}{}",
            notification.identity,
            if replaced { " (replaced)" } else { "" }
        );
        Ok(())
    }
}

/// Re-arm stored reminders, then deliver fired ones until Ctrl-C. The store
/// is re-read every `rescan_secs` so tasks edited by other processes are
/// picked up; timers for tasks that disappeared are dropped.
pub async fn run_daemon(config: &NudgeConfig, store: Arc<dyn TaskStore>) -> std::io::Result<()> {
    let (fired_tx, mut fired_rx) = mpsc::unbounded_channel();
    let alarms = Arc::new(TokioAlarmService::new(config.exact_alarms, fired_tx));
    let scheduler = Arc::new(ReminderScheduler::new(
        alarms.clone(),
        Arc::new(SystemClock),
        config.zone(),
    ));
    let delivery = ReminderDelivery::new(
        config.notification_channel.clone(),
        config.default_reminder_title.clone(),
    );
    let notifier = LogNotifier::new(config.notifications_enabled);

    let (signal, done) = completion_channel();
    BootRecovery::new(store.clone(), scheduler.clone()).on_boot(signal);
    let report = done.await.unwrap_or_default();
    log_report(&report);
    println!(
        "Watching {} reminder(s). Press Ctrl-C to stop.",
        report.scheduled.len()
    );

    let rescan_every = std::time::Duration::from_secs(config.rescan_secs.max(1));
    let first_rescan = tokio::time::Instant::now() + rescan_every;
    let mut rescan = tokio::time::interval_at(first_rescan, rescan_every);

    loop {
        tokio::select! {
            Some(payload) = fired_rx.recv() => {
                let outcome = delivery.deliver(&payload, &notifier);
                log::debug!("Delivery outcome for {:?}: {:?}", payload.task_id, outcome);
            }
            _ = rescan.tick() => {
                let report = BootRecovery::new(store.clone(), scheduler.clone()).run().await;
                if report.query_error.is_none() {
                    let keep: HashSet<AlarmIdentity> = report.scheduled.iter().copied().collect();
                    alarms.retain(&keep);
                }
                log::debug!("Rescan: {} timer(s) pending", alarms.pending());
            }
            result = tokio::signal::ctrl_c() => {
                result?;
                log::info!("Stopping, {} timer(s) dropped", alarms.pending());
                break;
            }
        }
    }
    Ok(())
}

fn log_report(report: &BootReport) {
    if let Some(e) = &report.query_error {
        log::error!("Could not restore reminders: {}", e);
    } else if report.failed > 0 {
        log::warn!("{} reminder(s) could not be restored", report.failed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::task::NewTask;
    use crate::reminder::{FixedClock, ReminderZone};
    use crate::store::SqliteTaskStore;
    use chrono::FixedOffset;

    fn payload(id: i64) -> AlarmPayload {
        AlarmPayload {
            task_id: Some(id),
            title: Some(format!("task {id}")),
        }
    }

    #[tokio::test]
    async fn timer_fires_once_and_removes_itself() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let alarms = TokioAlarmService::new(true, tx);
        alarms
            .register(AlarmIdentity(1), Utc::now() + chrono::Duration::milliseconds(20), payload(1))
            .unwrap();
        assert_eq!(alarms.pending(), 1);

        let fired = rx.recv().await.unwrap();
        assert_eq!(fired, payload(1));
        assert_eq!(alarms.pending(), 0);
    }

    #[tokio::test]
    async fn replacement_fires_only_the_new_timer() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let alarms = TokioAlarmService::new(true, tx);
        let soon = Utc::now() + chrono::Duration::milliseconds(20);
        alarms.register(AlarmIdentity(1), soon, payload(1)).unwrap();
        let mut replacement = payload(1);
        replacement.title = Some("renamed".into());
        alarms.register(AlarmIdentity(1), soon, replacement.clone()).unwrap();
        assert_eq!(alarms.pending(), 1);

        assert_eq!(rx.recv().await.unwrap(), replacement);
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn cancelled_timer_never_fires() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let alarms = TokioAlarmService::new(true, tx);
        alarms
            .register(AlarmIdentity(2), Utc::now() + chrono::Duration::milliseconds(20), payload(2))
            .unwrap();
        alarms.cancel(AlarmIdentity(2)).unwrap();
        alarms.cancel(AlarmIdentity(2)).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(60)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn exact_alarms_disabled_denies() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let alarms = TokioAlarmService::new(false, tx);
        let err = alarms
            .register(AlarmIdentity(1), Utc::now(), payload(1))
            .unwrap_err();
        assert!(matches!(err, AlarmError::ExactAlarmDenied));
        assert_eq!(alarms.pending(), 0);
    }

    #[tokio::test]
    async fn retain_drops_orphans() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let alarms = TokioAlarmService::new(true, tx);
        let later = Utc::now() + chrono::Duration::hours(1);
        alarms.register(AlarmIdentity(1), later, payload(1)).unwrap();
        alarms.register(AlarmIdentity(2), later, payload(2)).unwrap();
        alarms.retain(&HashSet::from([AlarmIdentity(2)]));
        assert_eq!(alarms.pending(), 1);
    }

    #[tokio::test]
    async fn boot_recovery_arms_tokio_timers() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let alarms = Arc::new(TokioAlarmService::new(true, tx));
        let scheduler = Arc::new(ReminderScheduler::new(
            alarms.clone(),
            Arc::new(FixedClock(Utc::now())),
            ReminderZone::Fixed(FixedOffset::east_opt(0).unwrap()),
        ));
        let store = Arc::new(SqliteTaskStore::open_in_memory().unwrap());
        let tomorrow = Utc::now().date_naive().succ_opt().unwrap();
        store
            .create(
                NewTask::new("call mum")
                    .due(tomorrow)
                    .at(chrono::NaiveTime::from_hms_opt(12, 0, 0).unwrap())
                    .remind_before(5),
            )
            .unwrap();

        let report = BootRecovery::new(store, scheduler).run().await;
        assert_eq!(report.scheduled, vec![AlarmIdentity(1)]);
        assert_eq!(alarms.pending(), 1);
    }

    #[tokio::test]
    async fn rescan_after_trigger_keeps_overdue_timer() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let alarms = Arc::new(TokioAlarmService::new(true, tx));
        let store: Arc<dyn TaskStore> = Arc::new(SqliteTaskStore::open_in_memory().unwrap());
        let zone = ReminderZone::Fixed(FixedOffset::east_opt(0).unwrap());

        // Trigger ten minutes out, as the daemon would see it when armed.
        let due = Utc::now() + chrono::Duration::minutes(10);
        store
            .create(
                NewTask::new("water plants")
                    .due(due.date_naive())
                    .at(due.time())
                    .remind_before(0),
            )
            .unwrap();
        let armed_at = Arc::new(FixedClock(Utc::now()));
        let armed = Arc::new(ReminderScheduler::new(alarms.clone(), armed_at, zone));
        let report = BootRecovery::new(store.clone(), armed).run().await;
        assert_eq!(report.scheduled, vec![AlarmIdentity(1)]);

        // The rescan runs with wall time past the trigger while the sleeper
        // has not woken yet.
        let later = Arc::new(FixedClock(Utc::now() + chrono::Duration::minutes(20)));
        let rescan = Arc::new(ReminderScheduler::new(alarms.clone(), later, zone));
        let report = BootRecovery::new(store, rescan).run().await;
        let keep: HashSet<AlarmIdentity> = report.scheduled.iter().copied().collect();
        alarms.retain(&keep);

        assert_eq!(report.scheduled, vec![AlarmIdentity(1)]);
        assert_eq!(alarms.pending(), 1);
        assert!(alarms.pending_trigger(AlarmIdentity(1)).is_some());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn past_trigger_fires_immediately() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let alarms = TokioAlarmService::new(true, tx);
        alarms
            .register(AlarmIdentity(5), Utc::now() - chrono::Duration::minutes(3), payload(5))
            .unwrap();
        assert_eq!(rx.recv().await.unwrap(), payload(5));
        assert_eq!(alarms.pending(), 0);
    }

    #[test]
    fn log_notifier_replaces_by_identity() {
        let notifier = LogNotifier::new(true);
        let delivery = ReminderDelivery::new(NotificationChannel::default(), "Reminder");
        delivery.deliver(&payload(4), &notifier);
        delivery.deliver(&payload(4), &notifier);
        assert_eq!(notifier.shown.lock().unwrap().len(), 1);
        assert_eq!(LogNotifier::new(false).permission(), NotificationPermission::Denied);
    }
}
