//! Task store contract and SQLite implementation.
//!
//! # Responsibility
//! - Persist task records keyed by stable id.
//! - Provide the compare-and-swap write that serializes commits per task.
//! - Enforce title uniqueness through the `tasks.title` UNIQUE index.
//!
//! # Invariants
//! - `compare_and_swap` writes only when the stored version still equals the
//!   caller's base version, so two commits on one base never both land.
//! - Lock writes never touch `version`.
//! - A delete and whatever its `before_delete` hook writes on the same
//!   connection land together or not at all.

use super::{parse_uuid, RepoError, RepoResult};
use crate::db::ensure_schema_ready;
use crate::model::task::{EditLock, Task, TaskId, TaskPriority, TaskStatus};
use rusqlite::{params, Connection, ErrorCode, Row, Transaction, TransactionBehavior};

const TASK_SELECT_SQL: &str = "SELECT
    task_id,
    title,
    description,
    status,
    priority,
    assigned_actor,
    created_by,
    lock_holder,
    lock_holder_name,
    lock_started_at,
    version,
    created_at,
    last_modified_at
FROM tasks";

/// Outcome of a conditional task write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapOutcome {
    Written,
    /// Stored version moved past the base version, or the row is gone.
    Stale,
}

/// Repository interface for the task store.
pub trait TaskRepository {
    /// Inserts a new task. Fails with `DuplicateTitle` when the title is taken.
    fn insert_task(&self, task: &Task) -> RepoResult<()>;
    fn get_task(&self, id: TaskId) -> RepoResult<Option<Task>>;
    /// Lists live tasks, newest first.
    fn list_tasks(&self) -> RepoResult<Vec<Task>>;
    fn find_by_title(&self, title: &str) -> RepoResult<Option<Task>>;
    /// Writes `task` only if the stored version equals `base_version`.
    fn compare_and_swap(&self, base_version: i64, task: &Task) -> RepoResult<SwapOutcome>;
    /// Replaces the edit lock without bumping the version.
    ///
    /// Returns `false` when the task does not exist.
    fn set_edit_lock(&self, id: TaskId, lock: Option<&EditLock>) -> RepoResult<bool>;
    /// Hard-deletes one task inside a single write transaction.
    ///
    /// `before_delete` sees the row as stored once the write lock is held.
    /// Writes it issues on the same connection commit or roll back together
    /// with the delete. Fails with `NotFound` without calling it when the row
    /// is already gone.
    fn delete_task_with<F, R>(&self, id: TaskId, before_delete: F) -> RepoResult<(Task, R)>
    where
        F: FnOnce(&Task) -> R;

    fn delete_task(&self, id: TaskId) -> RepoResult<()> {
        self.delete_task_with(id, |_| ()).map(|_| ())
    }
}

/// SQLite-backed task store.
pub struct SqliteTaskRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteTaskRepository<'conn> {
    /// Creates repository from a migrated connection.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_schema_ready(conn, "tasks")?;
        Ok(Self { conn })
    }
}

impl TaskRepository for SqliteTaskRepository<'_> {
    fn insert_task(&self, task: &Task) -> RepoResult<()> {
        task.validate()?;

        let (lock_holder, lock_holder_name, lock_started_at) =
            lock_columns(task.edit_lock.as_ref());
        self.conn
            .execute(
                "INSERT INTO tasks (
                    task_id,
                    title,
                    description,
                    status,
                    priority,
                    assigned_actor,
                    created_by,
                    lock_holder,
                    lock_holder_name,
                    lock_started_at,
                    version,
                    created_at,
                    last_modified_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13);",
                params![
                    task.id.to_string(),
                    task.title.as_str(),
                    task.description.as_deref(),
                    status_to_db(task.status),
                    priority_to_db(task.priority),
                    task.assigned_actor.to_string(),
                    task.created_by.to_string(),
                    lock_holder,
                    lock_holder_name,
                    lock_started_at,
                    task.version,
                    task.created_at,
                    task.last_modified_at,
                ],
            )
            .map_err(|err| map_title_conflict(err, &task.title))?;
        Ok(())
    }

    fn get_task(&self, id: TaskId) -> RepoResult<Option<Task>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{TASK_SELECT_SQL} WHERE task_id = ?1;"))?;
        let mut rows = stmt.query([id.to_string()])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_task_row(row)?));
        }
        Ok(None)
    }

    fn list_tasks(&self) -> RepoResult<Vec<Task>> {
        let mut stmt = self.conn.prepare(&format!(
            "{TASK_SELECT_SQL} ORDER BY created_at DESC, task_id ASC;"
        ))?;
        let mut rows = stmt.query([])?;
        let mut tasks = Vec::new();
        while let Some(row) = rows.next()? {
            tasks.push(parse_task_row(row)?);
        }
        Ok(tasks)
    }

    fn find_by_title(&self, title: &str) -> RepoResult<Option<Task>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{TASK_SELECT_SQL} WHERE title = ?1;"))?;
        let mut rows = stmt.query([title])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_task_row(row)?));
        }
        Ok(None)
    }

    fn compare_and_swap(&self, base_version: i64, task: &Task) -> RepoResult<SwapOutcome> {
        task.validate()?;

        let (lock_holder, lock_holder_name, lock_started_at) =
            lock_columns(task.edit_lock.as_ref());
        let changed = self
            .conn
            .execute(
                "UPDATE tasks
                 SET
                    title = ?1,
                    description = ?2,
                    status = ?3,
                    priority = ?4,
                    assigned_actor = ?5,
                    lock_holder = ?6,
                    lock_holder_name = ?7,
                    lock_started_at = ?8,
                    version = ?9,
                    last_modified_at = ?10
                 WHERE task_id = ?11
                   AND version = ?12;",
                params![
                    task.title.as_str(),
                    task.description.as_deref(),
                    status_to_db(task.status),
                    priority_to_db(task.priority),
                    task.assigned_actor.to_string(),
                    lock_holder,
                    lock_holder_name,
                    lock_started_at,
                    task.version,
                    task.last_modified_at,
                    task.id.to_string(),
                    base_version,
                ],
            )
            .map_err(|err| map_title_conflict(err, &task.title))?;

        if changed == 0 {
            return Ok(SwapOutcome::Stale);
        }
        Ok(SwapOutcome::Written)
    }

    fn set_edit_lock(&self, id: TaskId, lock: Option<&EditLock>) -> RepoResult<bool> {
        let (lock_holder, lock_holder_name, lock_started_at) = lock_columns(lock);
        let changed = self.conn.execute(
            "UPDATE tasks
             SET
                lock_holder = ?1,
                lock_holder_name = ?2,
                lock_started_at = ?3
             WHERE task_id = ?4;",
            params![lock_holder, lock_holder_name, lock_started_at, id.to_string()],
        )?;
        Ok(changed > 0)
    }

    fn delete_task_with<F, R>(&self, id: TaskId, before_delete: F) -> RepoResult<(Task, R)>
    where
        F: FnOnce(&Task) -> R,
    {
        // Dropping `tx` on any early return rolls back `before_delete` writes.
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let task = self.get_task(id)?.ok_or(RepoError::NotFound(id))?;
        let extra = before_delete(&task);

        let changed = tx.execute("DELETE FROM tasks WHERE task_id = ?1;", [id.to_string()])?;
        if changed == 0 {
            return Err(RepoError::NotFound(id));
        }
        tx.commit()?;
        Ok((task, extra))
    }
}

fn lock_columns(lock: Option<&EditLock>) -> (Option<String>, Option<&str>, Option<i64>) {
    match lock {
        Some(lock) => (
            Some(lock.holder.to_string()),
            Some(lock.holder_name.as_str()),
            Some(lock.started_at),
        ),
        None => (None, None, None),
    }
}

fn map_title_conflict(err: rusqlite::Error, title: &str) -> RepoError {
    let is_title_conflict = matches!(
        &err,
        rusqlite::Error::SqliteFailure(failure, Some(message))
            if failure.code == ErrorCode::ConstraintViolation && message.contains("tasks.title")
    );
    if is_title_conflict {
        return RepoError::DuplicateTitle(title.to_string());
    }
    err.into()
}

fn parse_task_row(row: &Row<'_>) -> RepoResult<Task> {
    let id_text: String = row.get("task_id")?;
    let status_text: String = row.get("status")?;
    let status = parse_status(&status_text).ok_or_else(|| {
        RepoError::InvalidData(format!("invalid task status `{status_text}` in tasks.status"))
    })?;
    let priority_text: String = row.get("priority")?;
    let priority = parse_priority(&priority_text).ok_or_else(|| {
        RepoError::InvalidData(format!(
            "invalid task priority `{priority_text}` in tasks.priority"
        ))
    })?;
    let assigned_text: String = row.get("assigned_actor")?;
    let created_by_text: String = row.get("created_by")?;

    let edit_lock = match (
        row.get::<_, Option<String>>("lock_holder")?,
        row.get::<_, Option<String>>("lock_holder_name")?,
        row.get::<_, Option<i64>>("lock_started_at")?,
    ) {
        (Some(holder), Some(holder_name), Some(started_at)) => Some(EditLock {
            holder: parse_uuid(&holder, "tasks.lock_holder")?,
            holder_name,
            started_at,
        }),
        (None, None, None) => None,
        _ => {
            return Err(RepoError::InvalidData(format!(
                "partial edit lock columns for task `{id_text}`"
            )));
        }
    };

    let task = Task {
        id: parse_uuid(&id_text, "tasks.task_id")?,
        title: row.get("title")?,
        description: row.get("description")?,
        status,
        priority,
        assigned_actor: parse_uuid(&assigned_text, "tasks.assigned_actor")?,
        created_by: parse_uuid(&created_by_text, "tasks.created_by")?,
        edit_lock,
        version: row.get("version")?,
        created_at: row.get("created_at")?,
        last_modified_at: row.get("last_modified_at")?,
    };
    task.validate()?;
    Ok(task)
}

pub(crate) fn status_to_db(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Todo => "todo",
        TaskStatus::InProgress => "in_progress",
        TaskStatus::Done => "done",
    }
}

fn parse_status(value: &str) -> Option<TaskStatus> {
    match value {
        "todo" => Some(TaskStatus::Todo),
        "in_progress" => Some(TaskStatus::InProgress),
        "done" => Some(TaskStatus::Done),
        _ => None,
    }
}

fn priority_to_db(priority: TaskPriority) -> &'static str {
    match priority {
        TaskPriority::Low => "low",
        TaskPriority::Medium => "medium",
        TaskPriority::High => "high",
    }
}

fn parse_priority(value: &str) -> Option<TaskPriority> {
    match value {
        "low" => Some(TaskPriority::Low),
        "medium" => Some(TaskPriority::Medium),
        "high" => Some(TaskPriority::High),
        _ => None,
    }
}
