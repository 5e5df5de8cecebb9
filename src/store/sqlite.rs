//! SQLite-backed task store.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rusqlite::{Connection, OptionalExtension, params};

use super::schema::{apply_schema, read_schema_version};
use super::{Result, StoreError, TaskStore, validate};
use crate::core::task::{NewTask, Task, TaskId};

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M";
const CREATED_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const SELECT_TASKS: &str = "SELECT id, title, description, important, due_date, \
     reminder_minutes_before, task_time, created FROM tasks";

/// Thread-safe via an internal `Mutex<Connection>`; share it as
/// `Arc<dyn TaskStore>`.
pub struct SqliteTaskStore {
    conn: Mutex<Connection>,
}

impl SqliteTaskStore {
    /// Open (or create) the database file, creating parent directories.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Io(e.to_string()))?;
        }
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        apply_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn schema_version(&self) -> Result<Option<u32>> {
        let conn = self.lock()?;
        Ok(read_schema_version(&conn)?)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| StoreError::Lock(e.to_string()))
    }

    fn query_rows(&self, sql: &str, args: &[&dyn rusqlite::ToSql]) -> Result<Vec<Result<Task>>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(args, TaskRow::from_row)?;

        let mut tasks = Vec::new();
        for row in rows {
            tasks.push(row.map_err(StoreError::from).and_then(TaskRow::into_task));
        }
        Ok(tasks)
    }

    /// Strict variant: the first bad row fails the whole query.
    fn query_tasks(&self, sql: &str, args: &[&dyn rusqlite::ToSql]) -> Result<Vec<Task>> {
        self.query_rows(sql, args)?.into_iter().collect()
    }
}

impl TaskStore for SqliteTaskStore {
    fn create(&self, task: NewTask) -> Result<Task> {
        validate(&task)?;
        let created = chrono::Local::now().naive_local();
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO tasks (title, description, important, due_date, \
             reminder_minutes_before, task_time, created) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                task.title,
                task.description,
                task.important,
                task.due_date.map(format_date),
                task.reminder_minutes_before,
                task.task_time.map(format_time),
                created.format(CREATED_FORMAT).to_string(),
            ],
        )?;
        let id = TaskId(conn.last_insert_rowid());
        log::debug!("Created task {}", id);
        // Round-trip through the stored precision so `get` returns an equal value.
        let created = parse_created(id.get(), &created.format(CREATED_FORMAT).to_string())?;
        Ok(task.into_task(id, created))
    }

    fn get(&self, id: TaskId) -> Result<Option<Task>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                &format!("{} WHERE id = ?1", SELECT_TASKS),
                params![id.get()],
                TaskRow::from_row,
            )
            .optional()?;
        row.map(TaskRow::into_task).transpose()
    }

    fn update(&self, task: &Task) -> Result<()> {
        validate(&task.draft())?;
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE tasks SET title = ?1, description = ?2, important = ?3, due_date = ?4, \
             reminder_minutes_before = ?5, task_time = ?6 WHERE id = ?7",
            params![
                task.title,
                task.description,
                task.important,
                task.due_date.map(format_date),
                task.reminder_minutes_before,
                task.task_time.map(format_time),
                task.id.get(),
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(task.id));
        }
        Ok(())
    }

    fn delete(&self, id: TaskId) -> Result<bool> {
        let conn = self.lock()?;
        let changed = conn.execute("DELETE FROM tasks WHERE id = ?1", params![id.get()])?;
        Ok(changed > 0)
    }

    fn tasks_on(&self, date: NaiveDate) -> Result<Vec<Task>> {
        self.query_tasks(
            &format!(
                "{} WHERE due_date = ?1 ORDER BY important DESC, task_time, id",
                SELECT_TASKS
            ),
            &[&format_date(date)],
        )
    }

    fn tasks_between(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<Task>> {
        self.query_tasks(
            &format!(
                "{} WHERE due_date BETWEEN ?1 AND ?2 ORDER BY due_date, task_time, id",
                SELECT_TASKS
            ),
            &[&format_date(start), &format_date(end)],
        )
    }

    fn all(&self) -> Result<Vec<Task>> {
        self.query_tasks(&format!("{} ORDER BY id", SELECT_TASKS), &[])
    }

    fn tasks_with_reminders(&self) -> Result<Vec<Result<Task>>> {
        self.query_rows(
            &format!(
                "{} WHERE reminder_minutes_before IS NOT NULL \
                 AND task_time IS NOT NULL AND due_date IS NOT NULL ORDER BY id",
                SELECT_TASKS
            ),
            &[],
        )
    }
}

// ---------------------------------------------------------------------------
// Row conversion helpers
// ---------------------------------------------------------------------------

/// Raw column values; parsed into a `Task` outside the rusqlite callback so a
/// malformed value becomes a per-row `StoreError::Corrupt`.
struct TaskRow {
    id: i64,
    title: String,
    description: String,
    important: bool,
    due_date: Option<String>,
    reminder_minutes_before: Option<i64>,
    task_time: Option<String>,
    created: String,
}

impl TaskRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            title: row.get(1)?,
            description: row.get(2)?,
            important: row.get(3)?,
            due_date: row.get(4)?,
            reminder_minutes_before: row.get(5)?,
            task_time: row.get(6)?,
            created: row.get(7)?,
        })
    }

    fn into_task(self) -> Result<Task> {
        let id = self.id;
        let corrupt = |reason: String| StoreError::Corrupt { id, reason };

        let due_date = self
            .due_date
            .map(|s| {
                NaiveDate::parse_from_str(&s, DATE_FORMAT)
                    .map_err(|e| corrupt(format!("due_date {:?}: {}", s, e)))
            })
            .transpose()?;
        let task_time = self
            .task_time
            .map(|s| {
                NaiveTime::parse_from_str(&s, TIME_FORMAT)
                    .map_err(|e| corrupt(format!("task_time {:?}: {}", s, e)))
            })
            .transpose()?;
        let reminder_minutes_before = self
            .reminder_minutes_before
            .map(|m| {
                u32::try_from(m).map_err(|_| corrupt(format!("reminder_minutes_before {}", m)))
            })
            .transpose()?;
        let created = parse_created(id, &self.created)?;

        Ok(Task {
            id: TaskId(id),
            title: self.title,
            description: self.description,
            important: self.important,
            due_date,
            reminder_minutes_before,
            task_time,
            created,
        })
    }
}

fn parse_created(id: i64, s: &str) -> Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, CREATED_FORMAT).map_err(|e| StoreError::Corrupt {
        id,
        reason: format!("created {:?}: {}", s, e),
    })
}

fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

fn format_time(time: NaiveTime) -> String {
    time.format(TIME_FORMAT).to_string()
}
