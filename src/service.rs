//! Task writes that keep the timer registry in step with the store.

use std::sync::Arc;

use chrono::NaiveDate;

use crate::core::task::{NewTask, Task, TaskId};
use crate::reminder::{ReminderScheduler, ScheduleOutcome};
use crate::store::{self, StoreError, TaskStore};

pub struct TaskService {
    store: Arc<dyn TaskStore>,
    scheduler: Arc<ReminderScheduler>,
}

impl TaskService {
    pub fn new(store: Arc<dyn TaskStore>, scheduler: Arc<ReminderScheduler>) -> Self {
        Self { store, scheduler }
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    pub fn scheduler(&self) -> &Arc<ReminderScheduler> {
        &self.scheduler
    }

    pub fn create(&self, task: NewTask) -> store::Result<(Task, ScheduleOutcome)> {
        let task = self.store.create(task)?;
        let outcome = self.scheduler.schedule(&task);
        Ok((task, outcome))
    }

    /// Write the task back and re-arm (or clear) its reminder.
    pub fn update(&self, task: &Task) -> store::Result<ScheduleOutcome> {
        self.store.update(task)?;
        Ok(self.scheduler.schedule(task))
    }

    /// Apply `edit` to the stored task and save it.
    pub fn edit(
        &self,
        id: TaskId,
        edit: impl FnOnce(&mut Task),
    ) -> store::Result<(Task, ScheduleOutcome)> {
        let mut task = self.store.get(id)?.ok_or(StoreError::NotFound(id))?;
        edit(&mut task);
        let outcome = self.update(&task)?;
        Ok((task, outcome))
    }

    pub fn toggle_important(&self, id: TaskId) -> store::Result<Task> {
        let (task, _) = self.edit(id, |t| t.important = !t.important)?;
        Ok(task)
    }

    /// Delete the row, then drop its timer. Returns `false` if nothing was stored.
    pub fn delete(&self, id: TaskId) -> store::Result<bool> {
        let removed = self.store.delete(id)?;
        self.scheduler.cancel(id);
        Ok(removed)
    }

    pub fn get(&self, id: TaskId) -> store::Result<Option<Task>> {
        self.store.get(id)
    }

    pub fn tasks_on(&self, date: NaiveDate) -> store::Result<Vec<Task>> {
        self.store.tasks_on(date)
    }

    pub fn tasks_between(&self, start: NaiveDate, end: NaiveDate) -> store::Result<Vec<Task>> {
        self.store.tasks_between(start, end)
    }

    pub fn all(&self) -> store::Result<Vec<Task>> {
        self.store.all()
    }
}
