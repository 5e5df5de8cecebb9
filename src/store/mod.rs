pub mod schema;
pub mod sqlite;

use chrono::NaiveDate;

use crate::core::task::{NewTask, Task, TaskId};

pub use sqlite::SqliteTaskStore;

pub type Result<T, E = StoreError> = std::result::Result<T, E>;

/// Errors from the task store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("task not found: {0}")]
    NotFound(TaskId),

    #[error("invalid task: {0}")]
    InvalidTask(String),

    #[error("corrupt task row {id}: {reason}")]
    Corrupt { id: i64, reason: String },

    #[error("lock poisoned: {0}")]
    Lock(String),
}

/// Persistent table of tasks, queried and mutated by date.
///
/// Implementations block on I/O; async callers go through `spawn_blocking`.
pub trait TaskStore: Send + Sync {
    /// Insert a task; the store assigns a fresh id and the creation timestamp.
    fn create(&self, task: NewTask) -> Result<Task>;

    fn get(&self, id: TaskId) -> Result<Option<Task>>;

    /// Overwrite the editable fields. `id` and `created` are left alone.
    fn update(&self, task: &Task) -> Result<()>;

    /// Returns `false` when no row had this id.
    fn delete(&self, id: TaskId) -> Result<bool>;

    fn tasks_on(&self, date: NaiveDate) -> Result<Vec<Task>>;

    /// Tasks due within `start..=end`.
    fn tasks_between(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<Task>>;

    fn all(&self) -> Result<Vec<Task>>;

    /// Every task with due date, time of day and lead time all set.
    ///
    /// Rows are decoded one by one so a single bad row only loses itself;
    /// the outer error means the query could not run at all.
    fn tasks_with_reminders(&self) -> Result<Vec<Result<Task>>>;
}

pub(crate) fn validate(task: &NewTask) -> Result<()> {
    if !task.has_title() {
        return Err(StoreError::InvalidTask("title must not be empty".into()));
    }
    Ok(())
}
