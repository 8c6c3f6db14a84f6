//! Activity ledger entry model.
//!
//! # Responsibility
//! - Define the append-only audit record written after committed mutations.
//!
//! # Invariants
//! - `task_title` is a snapshot and survives task deletion.
//! - Records are never mutated once appended.

use crate::model::actor::{Actor, ActorId};
use crate::model::task::{Task, TaskId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Stable identifier for one ledger entry.
pub type ActivityId = Uuid;

/// Kind of mutation recorded in the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityAction {
    Created,
    Updated,
    Deleted,
    /// Only the assignee changed.
    Assigned,
    /// Only the status column changed.
    Moved,
    SmartAssigned,
}

impl ActivityAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Deleted => "deleted",
            Self::Assigned => "assigned",
            Self::Moved => "moved",
            Self::SmartAssigned => "smart_assigned",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "created" => Some(Self::Created),
            "updated" => Some(Self::Updated),
            "deleted" => Some(Self::Deleted),
            "assigned" => Some(Self::Assigned),
            "moved" => Some(Self::Moved),
            "smart_assigned" => Some(Self::SmartAssigned),
            _ => None,
        }
    }
}

/// One immutable audit entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityRecord {
    pub id: ActivityId,
    pub action: ActivityAction,
    pub task_id: TaskId,
    pub task_title: String,
    pub actor_id: ActorId,
    pub actor_name: String,
    /// Human-readable summary, never empty.
    pub details: String,
    pub previous_value: Option<Value>,
    pub new_value: Option<Value>,
    /// Unix epoch milliseconds.
    pub created_at: i64,
}

impl ActivityRecord {
    /// Builds a fresh record for `task` performed by `actor`.
    pub fn new(
        action: ActivityAction,
        task: &Task,
        actor: &Actor,
        details: impl Into<String>,
        created_at: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            action,
            task_id: task.id,
            task_title: task.title.clone(),
            actor_id: actor.id,
            actor_name: actor.display_name.clone(),
            details: details.into(),
            previous_value: None,
            new_value: None,
            created_at,
        }
    }

    pub fn with_values(mut self, previous: Option<Value>, new: Option<Value>) -> Self {
        self.previous_value = previous;
        self.new_value = new;
        self
    }
}
