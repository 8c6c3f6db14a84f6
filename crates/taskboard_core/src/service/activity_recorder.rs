//! Activity recorder: turns committed mutations into ledger entries.
//!
//! # Responsibility
//! - Diff previous and new task state into one human-readable sentence.
//! - Append entries to the ledger without ever failing the mutation.
//! - Serve recent/per-task ledger queries.
//!
//! # Invariants
//! - Every entry has non-empty `details`.
//! - A ledger append failure is logged and reported as `None`; it never
//!   rolls back the committed task change.

use crate::clock::Clock;
use crate::model::activity::{ActivityAction, ActivityRecord};
use crate::model::actor::{Actor, ActorId};
use crate::model::task::{Task, TaskId};
use crate::repo::activity_repo::ActivityRepository;
use crate::service::error::BoardResult;
use log::{debug, warn};
use serde_json::{Map, Value};
use std::sync::Arc;

pub const DEFAULT_ACTIVITY_LIMIT: u32 = 20;
pub const ACTIVITY_LIMIT_MAX: u32 = 100;

/// Diff of one commit, ready to become a ledger entry.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeSummary {
    pub action: ActivityAction,
    pub details: String,
    pub previous: Option<Value>,
    pub new: Option<Value>,
}

/// Ledger writer and reader.
pub struct ActivityRecorder<A: ActivityRepository> {
    ledger: A,
    clock: Arc<dyn Clock>,
    default_limit: u32,
}

impl<A: ActivityRepository> ActivityRecorder<A> {
    pub fn new(ledger: A, clock: Arc<dyn Clock>, default_limit: u32) -> Self {
        Self {
            ledger,
            clock,
            default_limit: normalize_activity_limit(Some(default_limit), DEFAULT_ACTIVITY_LIMIT),
        }
    }

    pub fn record_created(
        &self,
        task: &Task,
        actor: &Actor,
        assignee_name: &str,
    ) -> Option<ActivityRecord> {
        let details = format!(
            "Created task \"{}\" and assigned to {}",
            task.title, assignee_name
        );
        let entry = ActivityRecord::new(
            ActivityAction::Created,
            task,
            actor,
            details,
            self.clock.now_ms(),
        )
        .with_values(None, Some(task_snapshot(task)));
        self.append(entry)
    }

    pub fn record_update(
        &self,
        previous: &Task,
        task: &Task,
        actor: &Actor,
        actor_name: impl Fn(ActorId) -> String,
    ) -> Option<ActivityRecord> {
        let summary = describe_update(previous, task, actor_name);
        let entry = ActivityRecord::new(
            summary.action,
            task,
            actor,
            summary.details,
            self.clock.now_ms(),
        )
        .with_values(summary.previous, summary.new);
        self.append(entry)
    }

    pub fn record_smart_assigned(
        &self,
        previous: &Task,
        task: &Task,
        actor: &Actor,
        from_name: &str,
        to_name: &str,
        active_tasks_at_selection: u32,
    ) -> Option<ActivityRecord> {
        let details = format!(
            "Smart assigned task \"{}\" from \"{}\" to \"{}\" ({} active tasks)",
            task.title, from_name, to_name, active_tasks_at_selection
        );
        let entry = ActivityRecord::new(
            ActivityAction::SmartAssigned,
            task,
            actor,
            details,
            self.clock.now_ms(),
        )
        .with_values(
            Some(assignee_value(previous.assigned_actor)),
            Some(assignee_value(task.assigned_actor)),
        );
        self.append(entry)
    }

    pub fn record_deleted(&self, task: &Task, actor: &Actor) -> Option<ActivityRecord> {
        let details = format!("Deleted task \"{}\"", task.title);
        let entry = ActivityRecord::new(
            ActivityAction::Deleted,
            task,
            actor,
            details,
            self.clock.now_ms(),
        )
        .with_values(Some(task_snapshot(task)), None);
        self.append(entry)
    }

    /// Most recent entries, newest first. `None` uses the configured default.
    pub fn recent(&self, limit: Option<u32>) -> BoardResult<Vec<ActivityRecord>> {
        let applied = normalize_activity_limit(limit, self.default_limit);
        Ok(self.ledger.list_recent(applied)?)
    }

    pub fn for_task(&self, task_id: TaskId) -> BoardResult<Vec<ActivityRecord>> {
        Ok(self.ledger.list_for_task(task_id)?)
    }

    fn append(&self, entry: ActivityRecord) -> Option<ActivityRecord> {
        match self.ledger.append(&entry) {
            Ok(()) => {
                debug!(
                    "event=activity_append module=activity status=ok action={} task_id={}",
                    entry.action.as_str(),
                    entry.task_id
                );
                Some(entry)
            }
            Err(err) => {
                warn!(
                    "event=activity_append module=activity status=degraded action={} task_id={} error={}",
                    entry.action.as_str(),
                    entry.task_id,
                    err
                );
                None
            }
        }
    }
}

/// Clamps a caller-provided limit into `1..=ACTIVITY_LIMIT_MAX`.
pub fn normalize_activity_limit(limit: Option<u32>, default_limit: u32) -> u32 {
    limit
        .unwrap_or(default_limit)
        .clamp(1, ACTIVITY_LIMIT_MAX)
}

/// Builds the ledger summary for a regular update commit.
///
/// Only actor-facing fields are compared. A commit that touches only the
/// status column is `moved`, only the assignee is `assigned`; everything else
/// is `updated`.
pub fn describe_update(
    previous: &Task,
    task: &Task,
    actor_name: impl Fn(ActorId) -> String,
) -> ChangeSummary {
    let mut parts = Vec::new();
    let mut before = Map::new();
    let mut after = Map::new();
    let mut status_changed = false;
    let mut assignee_changed = false;

    if previous.title != task.title {
        parts.push(format!(
            "title from \"{}\" to \"{}\"",
            previous.title, task.title
        ));
        before.insert("title".into(), Value::from(previous.title.as_str()));
        after.insert("title".into(), Value::from(task.title.as_str()));
    }
    if previous.description != task.description {
        parts.push("description".to_string());
        before.insert("description".into(), optional_text(&previous.description));
        after.insert("description".into(), optional_text(&task.description));
    }
    if previous.status != task.status {
        status_changed = true;
        parts.push(format!(
            "status from \"{}\" to \"{}\"",
            previous.status.label(),
            task.status.label()
        ));
        before.insert("status".into(), serde_json::json!(previous.status));
        after.insert("status".into(), serde_json::json!(task.status));
    }
    if previous.priority != task.priority {
        parts.push(format!(
            "priority from \"{}\" to \"{}\"",
            previous.priority.label(),
            task.priority.label()
        ));
        before.insert("priority".into(), serde_json::json!(previous.priority));
        after.insert("priority".into(), serde_json::json!(task.priority));
    }
    if previous.assigned_actor != task.assigned_actor {
        assignee_changed = true;
        parts.push(format!(
            "assignment from \"{}\" to \"{}\"",
            actor_name(previous.assigned_actor),
            actor_name(task.assigned_actor)
        ));
        before.insert(
            "assigned_actor".into(),
            Value::from(previous.assigned_actor.to_string()),
        );
        after.insert(
            "assigned_actor".into(),
            Value::from(task.assigned_actor.to_string()),
        );
    }

    if parts.is_empty() {
        return ChangeSummary {
            action: ActivityAction::Updated,
            details: format!("Saved task \"{}\" without field changes", task.title),
            previous: None,
            new: None,
        };
    }

    let action = match (parts.len(), status_changed, assignee_changed) {
        (1, true, false) => ActivityAction::Moved,
        (1, false, true) => ActivityAction::Assigned,
        _ => ActivityAction::Updated,
    };
    let details = match action {
        ActivityAction::Moved => format!(
            "Moved task \"{}\" from \"{}\" to \"{}\"",
            task.title,
            previous.status.label(),
            task.status.label()
        ),
        ActivityAction::Assigned => format!(
            "Assigned task \"{}\" from \"{}\" to \"{}\"",
            task.title,
            actor_name(previous.assigned_actor),
            actor_name(task.assigned_actor)
        ),
        _ => format!("Updated {}", parts.join(", ")),
    };

    ChangeSummary {
        action,
        details,
        previous: Some(Value::Object(before)),
        new: Some(Value::Object(after)),
    }
}

fn optional_text(value: &Option<String>) -> Value {
    value.as_deref().map_or(Value::Null, Value::from)
}

fn assignee_value(actor: ActorId) -> Value {
    serde_json::json!({ "assigned_actor": actor.to_string() })
}

fn task_snapshot(task: &Task) -> Value {
    serde_json::json!({
        "title": task.title,
        "description": task.description,
        "status": task.status,
        "priority": task.priority,
        "assigned_actor": task.assigned_actor.to_string(),
        "version": task.version,
    })
}

#[cfg(test)]
mod tests {
    use super::{describe_update, normalize_activity_limit};
    use crate::model::activity::ActivityAction;
    use crate::model::task::{Task, TaskPriority, TaskStatus};
    use uuid::Uuid;

    fn sample_task() -> Task {
        let actor = Uuid::new_v4();
        Task::new("Ship release", actor, actor, 1_000)
    }

    #[test]
    fn multiple_changes_produce_one_sentence() {
        let previous = sample_task();
        let mut task = previous.clone();
        task.status = TaskStatus::Done;
        task.priority = TaskPriority::High;

        let summary = describe_update(&previous, &task, |_| "nobody".to_string());
        assert_eq!(summary.action, ActivityAction::Updated);
        assert_eq!(
            summary.details,
            "Updated status from \"Todo\" to \"Done\", priority from \"Medium\" to \"High\""
        );
        let before = summary.previous.expect("previous snapshot");
        assert_eq!(before["status"], "todo");
        assert_eq!(summary.new.expect("new snapshot")["priority"], "high");
    }

    #[test]
    fn status_only_change_is_a_move() {
        let previous = sample_task();
        let mut task = previous.clone();
        task.status = TaskStatus::InProgress;

        let summary = describe_update(&previous, &task, |_| "nobody".to_string());
        assert_eq!(summary.action, ActivityAction::Moved);
        assert_eq!(
            summary.details,
            "Moved task \"Ship release\" from \"Todo\" to \"In Progress\""
        );
    }

    #[test]
    fn assignee_only_change_is_an_assignment() {
        let previous = sample_task();
        let mut task = previous.clone();
        let bob = Uuid::new_v4();
        task.assigned_actor = bob;

        let summary = describe_update(&previous, &task, |id| {
            if id == bob {
                "bob".to_string()
            } else {
                "alice".to_string()
            }
        });
        assert_eq!(summary.action, ActivityAction::Assigned);
        assert!(summary.details.contains("from \"alice\" to \"bob\""));
    }

    #[test]
    fn unchanged_commit_still_has_details() {
        let task = sample_task();
        let summary = describe_update(&task, &task, |_| String::new());
        assert_eq!(summary.action, ActivityAction::Updated);
        assert!(!summary.details.is_empty());
        assert!(summary.previous.is_none());
    }

    #[test]
    fn limit_defaults_and_clamps() {
        assert_eq!(normalize_activity_limit(None, 20), 20);
        assert_eq!(normalize_activity_limit(Some(0), 20), 1);
        assert_eq!(normalize_activity_limit(Some(500), 20), 100);
    }
}
