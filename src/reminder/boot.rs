//! Re-arming reminders after a restart.
//!
//! Timers do not survive a restart, so every stored task that still has
//! reminder fields is handed to the scheduler again. Each task is handled on
//! its own: a bad row or a failed registration is logged and counted, and the
//! rest still run. Completion is always signalled, even when the query fails.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use super::identity::AlarmIdentity;
use super::scheduler::{ReminderScheduler, ScheduleOutcome};
use crate::store::TaskStore;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootReport {
    /// Timers registered, in processing order.
    pub scheduled: Vec<AlarmIdentity>,
    /// Tasks handed to the scheduler that ended up without a timer
    /// (stale, denied, or missing fields).
    pub skipped: usize,
    /// Tasks lost to storage or registration errors.
    pub failed: usize,
    /// Set when the reminder query itself could not run.
    pub query_error: Option<String>,
}

impl BootReport {
    /// How many tasks reached the scheduler.
    pub fn attempted(&self) -> usize {
        self.scheduled.len() + self.skipped + self.failed
    }
}

/// Held by the handler until its work is done; dropping it without calling
/// [`CompletionSignal::finish`] still wakes the waiter.
pub struct CompletionSignal {
    tx: oneshot::Sender<BootReport>,
}

impl CompletionSignal {
    pub fn finish(self, report: BootReport) {
        if self.tx.send(report).is_err() {
            log::debug!("Boot recovery finished but nobody was waiting");
        }
    }
}

pub fn completion_channel() -> (CompletionSignal, oneshot::Receiver<BootReport>) {
    let (tx, rx) = oneshot::channel();
    (CompletionSignal { tx }, rx)
}

pub struct BootRecovery {
    store: Arc<dyn TaskStore>,
    scheduler: Arc<ReminderScheduler>,
}

impl BootRecovery {
    pub fn new(store: Arc<dyn TaskStore>, scheduler: Arc<ReminderScheduler>) -> Self {
        Self { store, scheduler }
    }

    /// Reschedule every stored reminder. Blocks on storage; call it from a
    /// blocking-capable context.
    pub fn recover(store: &dyn TaskStore, scheduler: &ReminderScheduler) -> BootReport {
        let mut report = BootReport::default();

        let rows = match store.tasks_with_reminders() {
            Ok(rows) => rows,
            Err(e) => {
                log::error!("Boot recovery could not read tasks: {}", e);
                report.query_error = Some(e.to_string());
                return report;
            }
        };

        for row in rows {
            let task = match row {
                Ok(task) => task,
                Err(e) => {
                    log::error!("Skipping unreadable task during boot recovery: {}", e);
                    report.failed += 1;
                    continue;
                }
            };
            if !task.has_reminder() {
                log::info!("Task {} lost its reminder fields, not rescheduling", task.id);
                report.skipped += 1;
                continue;
            }

            match catch_unwind(AssertUnwindSafe(|| scheduler.schedule(&task))) {
                Ok(ScheduleOutcome::Scheduled { .. }) => {
                    report.scheduled.push(scheduler.namespace().alarm(task.id))
                }
                Ok(outcome) if outcome.is_failure() => report.failed += 1,
                Ok(_) => report.skipped += 1,
                Err(_) => {
                    log::error!("Rescheduling task {} panicked", task.id);
                    report.failed += 1;
                }
            }
        }

        log::info!(
            "Boot recovery: {} scheduled, {} skipped, {} failed",
            report.scheduled.len(),
            report.skipped,
            report.failed
        );
        report
    }

    /// Run [`BootRecovery::recover`] off the calling thread.
    pub async fn run(&self) -> BootReport {
        let store = self.store.clone();
        let scheduler = self.scheduler.clone();
        match tokio::task::spawn_blocking(move || Self::recover(store.as_ref(), &scheduler)).await {
            Ok(report) => report,
            Err(e) => {
                log::error!("Boot recovery worker failed: {}", e);
                BootReport {
                    query_error: Some(e.to_string()),
                    ..BootReport::default()
                }
            }
        }
    }

    /// Entry point for the restart event: returns immediately and reports
    /// through `signal` once every task has been handled.
    pub fn on_boot(self, signal: CompletionSignal) -> JoinHandle<()> {
        tokio::spawn(async move {
            let report = self.run().await;
            signal.finish(report);
        })
    }
}
