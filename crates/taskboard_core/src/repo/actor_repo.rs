//! Actor directory contract and SQLite implementation.
//!
//! # Responsibility
//! - Remember authenticated actors so the balancer has a population.
//! - Answer active-load queries by counting task rows on demand.
//!
//! # Invariants
//! - Loads are recomputed from `tasks` on every call; nothing is cached.
//! - Listings are ordered by actor id so callers can break ties stably.

use super::{parse_uuid, RepoResult};
use crate::db::ensure_schema_ready;
use crate::model::actor::{Actor, ActorId, ActorLoad};
use crate::model::task::TaskStatus;
use crate::repo::task_repo::status_to_db;
use rusqlite::{params, Connection, OptionalExtension, Row};

const LOAD_SELECT_SQL: &str = "SELECT
    a.actor_id AS actor_id,
    a.display_name AS display_name,
    COUNT(t.task_id) AS active_tasks
FROM actors a
LEFT JOIN tasks t
    ON t.assigned_actor = a.actor_id
   AND t.status IN (?1, ?2)";

/// Repository interface for the actor directory.
pub trait ActorRepository {
    /// Inserts the actor or refreshes its display name.
    fn upsert_actor(&self, actor: &Actor) -> RepoResult<()>;
    fn get_actor(&self, id: ActorId) -> RepoResult<Option<Actor>>;
    /// Active-task count for every known actor, ordered by actor id.
    fn list_loads(&self) -> RepoResult<Vec<ActorLoad>>;
    fn load_of(&self, id: ActorId) -> RepoResult<Option<ActorLoad>>;
}

/// SQLite-backed actor directory.
pub struct SqliteActorRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteActorRepository<'conn> {
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_schema_ready(conn, "actors")?;
        Ok(Self { conn })
    }
}

impl ActorRepository for SqliteActorRepository<'_> {
    fn upsert_actor(&self, actor: &Actor) -> RepoResult<()> {
        self.conn.execute(
            "INSERT INTO actors (actor_id, display_name)
             VALUES (?1, ?2)
             ON CONFLICT(actor_id) DO UPDATE SET display_name = excluded.display_name;",
            params![actor.id.to_string(), actor.display_name.as_str()],
        )?;
        Ok(())
    }

    fn get_actor(&self, id: ActorId) -> RepoResult<Option<Actor>> {
        let name: Option<String> = self
            .conn
            .query_row(
                "SELECT display_name FROM actors WHERE actor_id = ?1;",
                [id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(name.map(|display_name| Actor::new(id, display_name)))
    }

    fn list_loads(&self) -> RepoResult<Vec<ActorLoad>> {
        let mut stmt = self.conn.prepare(&format!(
            "{LOAD_SELECT_SQL}
             GROUP BY a.actor_id, a.display_name
             ORDER BY a.actor_id ASC;"
        ))?;
        let mut rows = stmt.query(active_status_params())?;
        let mut loads = Vec::new();
        while let Some(row) = rows.next()? {
            loads.push(parse_load_row(row)?);
        }
        Ok(loads)
    }

    fn load_of(&self, id: ActorId) -> RepoResult<Option<ActorLoad>> {
        let mut stmt = self.conn.prepare(&format!(
            "{LOAD_SELECT_SQL}
             WHERE a.actor_id = ?3
             GROUP BY a.actor_id, a.display_name;"
        ))?;
        let [todo, in_progress] = active_status_params();
        let mut rows = stmt.query(params![todo, in_progress, id.to_string()])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_load_row(row)?));
        }
        Ok(None)
    }
}

const ACTIVE_STATUSES: [TaskStatus; 2] = [TaskStatus::Todo, TaskStatus::InProgress];

fn active_status_params() -> [&'static str; 2] {
    debug_assert!(ACTIVE_STATUSES.iter().all(|status| status.is_active()));
    ACTIVE_STATUSES.map(status_to_db)
}

fn parse_load_row(row: &Row<'_>) -> RepoResult<ActorLoad> {
    let id_text: String = row.get("actor_id")?;
    let display_name: String = row.get("display_name")?;
    let active_tasks: i64 = row.get("active_tasks")?;
    Ok(ActorLoad {
        actor: Actor::new(parse_uuid(&id_text, "actors.actor_id")?, display_name),
        active_tasks: u32::try_from(active_tasks).unwrap_or(u32::MAX),
    })
}
