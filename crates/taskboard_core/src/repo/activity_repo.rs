//! Ledger store contract and SQLite implementation.
//!
//! # Invariants
//! - Append is the only write; update/delete are rejected by triggers.
//! - Reads are newest first, ties on `created_at` broken by append order.

use super::{parse_uuid, RepoError, RepoResult};
use crate::db::ensure_schema_ready;
use crate::model::activity::{ActivityAction, ActivityRecord};
use crate::model::task::TaskId;
use rusqlite::{params, Connection, Row};
use serde_json::Value;

const ACTIVITY_SELECT_SQL: &str = "SELECT
    activity_id,
    action,
    task_id,
    task_title,
    actor_id,
    actor_name,
    details,
    previous_value,
    new_value,
    created_at
FROM activities";

/// Repository interface for the append-only activity ledger.
pub trait ActivityRepository {
    fn append(&self, record: &ActivityRecord) -> RepoResult<()>;
    /// Most recent entries across all tasks.
    fn list_recent(&self, limit: u32) -> RepoResult<Vec<ActivityRecord>>;
    /// Every entry for one task id, including entries for deleted tasks.
    fn list_for_task(&self, task_id: TaskId) -> RepoResult<Vec<ActivityRecord>>;
}

/// SQLite-backed ledger store.
pub struct SqliteActivityRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteActivityRepository<'conn> {
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_schema_ready(conn, "activities")?;
        Ok(Self { conn })
    }
}

impl ActivityRepository for SqliteActivityRepository<'_> {
    fn append(&self, record: &ActivityRecord) -> RepoResult<()> {
        if record.details.trim().is_empty() {
            return Err(RepoError::InvalidData(
                "activity details must not be empty".to_string(),
            ));
        }

        self.conn.execute(
            "INSERT INTO activities (
                activity_id,
                action,
                task_id,
                task_title,
                actor_id,
                actor_name,
                details,
                previous_value,
                new_value,
                created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10);",
            params![
                record.id.to_string(),
                record.action.as_str(),
                record.task_id.to_string(),
                record.task_title.as_str(),
                record.actor_id.to_string(),
                record.actor_name.as_str(),
                record.details.as_str(),
                json_column(record.previous_value.as_ref()),
                json_column(record.new_value.as_ref()),
                record.created_at,
            ],
        )?;
        Ok(())
    }

    fn list_recent(&self, limit: u32) -> RepoResult<Vec<ActivityRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "{ACTIVITY_SELECT_SQL}
             ORDER BY created_at DESC, seq DESC
             LIMIT ?1;"
        ))?;
        let mut rows = stmt.query([i64::from(limit)])?;
        collect_rows(&mut rows)
    }

    fn list_for_task(&self, task_id: TaskId) -> RepoResult<Vec<ActivityRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "{ACTIVITY_SELECT_SQL}
             WHERE task_id = ?1
             ORDER BY created_at DESC, seq DESC;"
        ))?;
        let mut rows = stmt.query([task_id.to_string()])?;
        collect_rows(&mut rows)
    }
}

fn collect_rows(rows: &mut rusqlite::Rows<'_>) -> RepoResult<Vec<ActivityRecord>> {
    let mut records = Vec::new();
    while let Some(row) = rows.next()? {
        records.push(parse_activity_row(row)?);
    }
    Ok(records)
}

fn json_column(value: Option<&Value>) -> Option<String> {
    value.map(Value::to_string)
}

fn parse_json_column(row: &Row<'_>, column: &'static str) -> RepoResult<Option<Value>> {
    match row.get::<_, Option<String>>(column)? {
        Some(text) => serde_json::from_str(&text).map(Some).map_err(|err| {
            RepoError::InvalidData(format!("invalid json in activities.{column}: {err}"))
        }),
        None => Ok(None),
    }
}

fn parse_activity_row(row: &Row<'_>) -> RepoResult<ActivityRecord> {
    let id_text: String = row.get("activity_id")?;
    let action_text: String = row.get("action")?;
    let action = ActivityAction::parse(&action_text).ok_or_else(|| {
        RepoError::InvalidData(format!(
            "invalid activity action `{action_text}` in activities.action"
        ))
    })?;
    let task_text: String = row.get("task_id")?;
    let actor_text: String = row.get("actor_id")?;

    Ok(ActivityRecord {
        id: parse_uuid(&id_text, "activities.activity_id")?,
        action,
        task_id: parse_uuid(&task_text, "activities.task_id")?,
        task_title: row.get("task_title")?,
        actor_id: parse_uuid(&actor_text, "activities.actor_id")?,
        actor_name: row.get("actor_name")?,
        details: row.get("details")?,
        previous_value: parse_json_column(row, "previous_value")?,
        new_value: parse_json_column(row, "new_value")?,
        created_at: row.get("created_at")?,
    })
}
