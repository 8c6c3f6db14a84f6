//! Board events fanned out to connected sessions.

use crate::model::activity::ActivityRecord;
use crate::model::actor::ActorId;
use crate::model::task::{Task, TaskId};
use serde::{Deserialize, Serialize};

/// Presence signal for "someone is editing this task".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditingNotice {
    pub task_id: TaskId,
    pub actor_id: ActorId,
    pub actor_name: String,
    /// True when the edit collides with another actor's lock.
    pub conflict: bool,
    /// Actor whose lock caused the collision, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub holder_name: Option<String>,
}

/// One message on the board channel.
///
/// Serialized as `{"event": "<kebab-name>", "payload": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "kebab-case")]
pub enum BoardEvent {
    TaskCreated(Task),
    TaskUpdated(Task),
    TaskDeleted {
        #[serde(rename = "taskId")]
        task_id: TaskId,
    },
    ActivityLogged(ActivityRecord),
    TaskEditing(EditingNotice),
}

impl BoardEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::TaskCreated(_) => "task-created",
            Self::TaskUpdated(_) => "task-updated",
            Self::TaskDeleted { .. } => "task-deleted",
            Self::ActivityLogged(_) => "activity-logged",
            Self::TaskEditing(_) => "task-editing",
        }
    }
}
