//! Task domain model.
//!
//! # Responsibility
//! - Define the canonical task record shared by every board view.
//! - Own title/description validation rules and edit-lock expiry checks.
//!
//! # Invariants
//! - `id` is stable and never reused, even after deletion.
//! - `version` starts at 1 and grows by exactly 1 per committed mutation.
//! - A stored `edit_lock` older than the lock timeout is logically expired.

use crate::model::actor::{Actor, ActorId};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Stable identifier for one task record.
pub type TaskId = Uuid;

pub const TITLE_MAX_CHARS: usize = 100;
pub const DESCRIPTION_MAX_CHARS: usize = 500;

/// Board column names that may not be used as task titles.
const RESERVED_TITLES: &[&str] = &["todo", "in progress", "done"];

static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid ws regex"));

/// Board column a task lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Todo,
    InProgress,
    Done,
}

impl TaskStatus {
    /// User-facing column label.
    pub fn label(self) -> &'static str {
        match self {
            Self::Todo => "Todo",
            Self::InProgress => "In Progress",
            Self::Done => "Done",
        }
    }

    /// Whether a task in this status counts toward its assignee's load.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Todo | Self::InProgress)
    }
}

/// Task urgency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    #[default]
    Medium,
    High,
}

impl TaskPriority {
    pub fn label(self) -> &'static str {
        match self {
            Self::Low => "Low",
            Self::Medium => "Medium",
            Self::High => "High",
        }
    }
}

/// Soft mutual-exclusion marker stored on the task itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditLock {
    pub holder: ActorId,
    /// Display name snapshot used for conflict notices.
    pub holder_name: String,
    /// Unix epoch milliseconds when the lock was granted.
    pub started_at: i64,
}

impl EditLock {
    pub fn new(holder: &Actor, started_at: i64) -> Self {
        Self {
            holder: holder.id,
            holder_name: holder.display_name.clone(),
            started_at,
        }
    }

    /// Milliseconds since the lock was granted, never negative.
    pub fn age_ms(&self, now_ms: i64) -> i64 {
        now_ms.saturating_sub(self.started_at).max(0)
    }

    /// Returns whether the lock is still inside its timeout window.
    pub fn is_live(&self, now_ms: i64, timeout_ms: i64) -> bool {
        self.age_ms(now_ms) < timeout_ms
    }

    /// Returns whether this lock should stop `actor` from editing.
    pub fn blocks(&self, actor: ActorId, now_ms: i64, timeout_ms: i64) -> bool {
        self.holder != actor && self.is_live(now_ms, timeout_ms)
    }
}

/// Canonical task record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub assigned_actor: ActorId,
    pub created_by: ActorId,
    pub edit_lock: Option<EditLock>,
    pub version: i64,
    /// Unix epoch milliseconds.
    pub created_at: i64,
    /// Unix epoch milliseconds of the last committed mutation.
    pub last_modified_at: i64,
}

impl Task {
    /// Creates a version-1 task with a generated stable ID.
    ///
    /// The title is stored as given; callers validate it first through
    /// [`normalize_title`].
    pub fn new(
        title: impl Into<String>,
        created_by: ActorId,
        assigned_actor: ActorId,
        now_ms: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            description: None,
            status: TaskStatus::default(),
            priority: TaskPriority::default(),
            assigned_actor,
            created_by,
            edit_lock: None,
            version: 1,
            created_at: now_ms,
            last_modified_at: now_ms,
        }
    }

    /// Validates persisted field shapes.
    pub fn validate(&self) -> Result<(), TaskValidationError> {
        normalize_title(&self.title)?;
        if let Some(description) = &self.description {
            check_description(description)?;
        }
        if self.version < 1 {
            return Err(TaskValidationError::InvalidVersion(self.version));
        }
        Ok(())
    }
}

/// Input for creating a task.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateTaskRequest {
    pub title: String,
    pub description: Option<String>,
    /// Defaults to the creating actor.
    pub assigned_actor: Option<ActorId>,
    /// Defaults to `Medium`.
    pub priority: Option<TaskPriority>,
}

impl CreateTaskRequest {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }
}

/// Partial update proposed by a caller.
///
/// `None` leaves a field untouched. `description: Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    pub assigned_actor: Option<ActorId>,
}

impl TaskPatch {
    pub fn assign(actor: ActorId) -> Self {
        Self {
            assigned_actor: Some(actor),
            ..Self::default()
        }
    }

    pub fn move_to(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }
}

/// Validation failures for task input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskValidationError {
    EmptyTitle,
    TitleTooLong { chars: usize },
    ReservedTitle(String),
    DescriptionTooLong { chars: usize },
    InvalidVersion(i64),
}

impl Display for TaskValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyTitle => write!(f, "task title must not be blank"),
            Self::TitleTooLong { chars } => write!(
                f,
                "task title has {chars} chars; at most {TITLE_MAX_CHARS} are allowed"
            ),
            Self::ReservedTitle(title) => write!(
                f,
                "task title `{title}` matches a board column name (Todo, In Progress, Done)"
            ),
            Self::DescriptionTooLong { chars } => write!(
                f,
                "task description has {chars} chars; at most {DESCRIPTION_MAX_CHARS} are allowed"
            ),
            Self::InvalidVersion(version) => write!(f, "task version must be >= 1, got {version}"),
        }
    }
}

impl Error for TaskValidationError {}

/// Trims a title and checks length and reserved-name rules.
pub fn normalize_title(raw: &str) -> Result<String, TaskValidationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(TaskValidationError::EmptyTitle);
    }
    let chars = trimmed.chars().count();
    if chars > TITLE_MAX_CHARS {
        return Err(TaskValidationError::TitleTooLong { chars });
    }
    if is_reserved_title(trimmed) {
        return Err(TaskValidationError::ReservedTitle(trimmed.to_string()));
    }
    Ok(trimmed.to_string())
}

/// Case-insensitive match against board column names.
pub fn is_reserved_title(title: &str) -> bool {
    let collapsed = WHITESPACE_RE.replace_all(title.trim(), " ").to_lowercase();
    RESERVED_TITLES.contains(&collapsed.as_str())
}

/// Trims a description; blank input becomes `None`.
pub fn normalize_description(raw: Option<&str>) -> Result<Option<String>, TaskValidationError> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    check_description(trimmed)?;
    Ok(Some(trimmed.to_string()))
}

fn check_description(value: &str) -> Result<(), TaskValidationError> {
    let chars = value.chars().count();
    if chars > DESCRIPTION_MAX_CHARS {
        return Err(TaskValidationError::DescriptionTooLong { chars });
    }
    Ok(())
}
