//! Board-level error taxonomy.
//!
//! # Invariants
//! - `VersionConflict` always carries the authoritative task state so the
//!   caller can reconcile without a second read.
//! - Store failures collapse into `StoreUnavailable`; the mutation is not
//!   committed when it is returned.

use crate::model::actor::ActorId;
use crate::model::task::{EditLock, Task, TaskId, TaskValidationError};
use crate::repo::RepoError;
use serde::Serialize;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type BoardResult<T> = Result<T, BoardError>;

/// Details of a live edit lock held by someone else.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LockConflict {
    pub task_id: TaskId,
    pub holder_id: ActorId,
    pub holder_name: String,
    /// Age of the blocking lock when the conflict was detected.
    pub lock_age_ms: i64,
    /// Milliseconds until the lock expires on its own.
    pub retry_after_ms: i64,
}

impl LockConflict {
    pub fn new(task_id: TaskId, lock: &EditLock, now_ms: i64, timeout_ms: i64) -> Self {
        let lock_age_ms = lock.age_ms(now_ms);
        Self {
            task_id,
            holder_id: lock.holder,
            holder_name: lock.holder_name.clone(),
            lock_age_ms,
            retry_after_ms: timeout_ms.saturating_sub(lock_age_ms).max(0),
        }
    }
}

/// Errors surfaced by board operations.
#[derive(Debug)]
pub enum BoardError {
    /// Target task does not exist (or was deleted).
    NotFound(TaskId),
    /// Caller's view is stale; `current` is the stored state.
    VersionConflict { expected: i64, current: Box<Task> },
    /// Another actor holds a live edit lock.
    EditConflict(LockConflict),
    DuplicateTitle(String),
    ReservedTitle(String),
    InvalidInput(TaskValidationError),
    /// Referenced actor has never been registered.
    UnknownActor(ActorId),
    /// Smart assign found an empty actor directory.
    NoActorsAvailable,
    /// Unconditioned commit kept losing the compare-and-swap race.
    CommitContended { task_id: TaskId, attempts: usize },
    /// Persistence failure; nothing was committed.
    StoreUnavailable(RepoError),
}

impl BoardError {
    /// Whether resubmitting the same request later can succeed unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::EditConflict(_) | Self::CommitContended { .. } | Self::StoreUnavailable(_)
        )
    }

    /// Stable machine-readable kind, used in log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::VersionConflict { .. } => "version_conflict",
            Self::EditConflict(_) => "edit_conflict",
            Self::DuplicateTitle(_) => "duplicate_title",
            Self::ReservedTitle(_) => "reserved_title",
            Self::InvalidInput(_) => "invalid_input",
            Self::UnknownActor(_) => "unknown_actor",
            Self::NoActorsAvailable => "no_actors_available",
            Self::CommitContended { .. } => "commit_contended",
            Self::StoreUnavailable(_) => "store_unavailable",
        }
    }
}

impl Display for BoardError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound(id) => write!(f, "task not found: {id}"),
            Self::VersionConflict { expected, current } => write!(
                f,
                "task {} was modified by another user: expected version {expected}, current version {}",
                current.id, current.version
            ),
            Self::EditConflict(conflict) => write!(
                f,
                "task {} is currently being edited by {}",
                conflict.task_id, conflict.holder_name
            ),
            Self::DuplicateTitle(title) => write!(f, "task title must be unique: `{title}`"),
            Self::ReservedTitle(title) => write!(
                f,
                "task title `{title}` cannot match column names (Todo, In Progress, Done)"
            ),
            Self::InvalidInput(err) => write!(f, "{err}"),
            Self::UnknownActor(id) => write!(f, "actor not found: {id}"),
            Self::NoActorsAvailable => write!(f, "no actors available for assignment"),
            Self::CommitContended { task_id, attempts } => write!(
                f,
                "task {task_id} kept changing underneath the commit ({attempts} attempts)"
            ),
            Self::StoreUnavailable(err) => write!(f, "store unavailable: {err}"),
        }
    }
}

impl Error for BoardError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::InvalidInput(err) => Some(err),
            Self::StoreUnavailable(err) => Some(err),
            _ => None,
        }
    }
}

impl From<TaskValidationError> for BoardError {
    fn from(value: TaskValidationError) -> Self {
        match value {
            TaskValidationError::ReservedTitle(title) => Self::ReservedTitle(title),
            other => Self::InvalidInput(other),
        }
    }
}

impl From<RepoError> for BoardError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::NotFound(id) => Self::NotFound(id),
            RepoError::DuplicateTitle(title) => Self::DuplicateTitle(title),
            RepoError::Validation(err) => err.into(),
            other => Self::StoreUnavailable(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{BoardError, LockConflict};
    use crate::model::task::{EditLock, TaskValidationError};
    use crate::repo::RepoError;
    use uuid::Uuid;

    #[test]
    fn repo_errors_map_to_board_kinds() {
        let id = Uuid::new_v4();
        assert!(matches!(
            BoardError::from(RepoError::NotFound(id)),
            BoardError::NotFound(found) if found == id
        ));
        assert!(matches!(
            BoardError::from(RepoError::DuplicateTitle("a".into())),
            BoardError::DuplicateTitle(_)
        ));
        assert!(matches!(
            BoardError::from(RepoError::Validation(TaskValidationError::ReservedTitle(
                "Done".into()
            ))),
            BoardError::ReservedTitle(_)
        ));
        let store = BoardError::from(RepoError::InvalidData("bad row".into()));
        assert_eq!(store.kind(), "store_unavailable");
        assert!(store.is_retryable());
    }

    #[test]
    fn lock_conflict_reports_remaining_time() {
        let lock = EditLock {
            holder: Uuid::new_v4(),
            holder_name: "alice".to_string(),
            started_at: 10_000,
        };
        let conflict = LockConflict::new(Uuid::new_v4(), &lock, 22_000, 30_000);
        assert_eq!(conflict.lock_age_ms, 12_000);
        assert_eq!(conflict.retry_after_ms, 18_000);
        assert!(BoardError::EditConflict(conflict).is_retryable());
    }
}
