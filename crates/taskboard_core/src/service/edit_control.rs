//! Optimistic versioning and the soft edit-lock protocol.
//!
//! # Responsibility
//! - Grant, refuse, and release per-task edit locks.
//! - Validate and commit task mutations against the task store.
//!
//! # Invariants
//! - Version check runs before the lock check; a lock holder is not exempt
//!   from version conflicts.
//! - A successful commit bumps `version` by exactly 1 and always clears the
//!   edit lock.
//! - Locks expire lazily: age is compared against the timeout on read, no
//!   background sweep exists.
//! - The read-check-write sequence is made atomic by the store's
//!   compare-and-swap; no in-process lock is held across store calls.

use crate::clock::Clock;
use crate::model::actor::Actor;
use crate::model::task::{
    normalize_description, normalize_title, CreateTaskRequest, EditLock, Task, TaskId, TaskPatch,
};
use crate::repo::task_repo::{SwapOutcome, TaskRepository};
use crate::service::error::{BoardError, BoardResult, LockConflict};
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;

/// Default soft-lock lifetime.
pub const DEFAULT_EDIT_LOCK_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound on compare-and-swap retries for unconditioned commits.
const MAX_COMMIT_ATTEMPTS: usize = 8;

/// How a commit treats live edit locks held by other actors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockPolicy {
    /// Refuse the commit with `EditConflict`.
    Respect,
    /// Commit anyway. Used by administrative actions such as smart assign.
    Override,
}

/// Result of a successful commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    /// Stored state the commit was applied on top of.
    pub previous: Task,
    /// Newly stored state.
    pub task: Task,
}

/// Result of a granted edit lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditGrant {
    pub lock: EditLock,
    /// Expired lock of another actor that this grant replaced.
    pub displaced: Option<EditLock>,
}

/// Concurrency controller over one task store.
pub struct ConcurrencyController<R: TaskRepository> {
    repo: R,
    clock: Arc<dyn Clock>,
    lock_timeout_ms: i64,
}

impl<R: TaskRepository> ConcurrencyController<R> {
    pub fn new(repo: R, clock: Arc<dyn Clock>, lock_timeout: Duration) -> Self {
        Self {
            repo,
            clock,
            lock_timeout_ms: i64::try_from(lock_timeout.as_millis()).unwrap_or(i64::MAX),
        }
    }

    pub fn lock_timeout_ms(&self) -> i64 {
        self.lock_timeout_ms
    }

    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    /// Loads one task or fails with `NotFound`.
    pub fn get_task(&self, task_id: TaskId) -> BoardResult<Task> {
        self.repo
            .get_task(task_id)?
            .ok_or(BoardError::NotFound(task_id))
    }

    pub fn list_tasks(&self) -> BoardResult<Vec<Task>> {
        Ok(self.repo.list_tasks()?)
    }

    /// Grants the edit lock on `task_id` to `actor`.
    ///
    /// The lock is granted when it is free, already held by `actor`, or held
    /// by someone else for longer than the timeout. The write is
    /// unconditional: when two grants race, the last writer wins.
    pub fn begin_edit(&self, task_id: TaskId, actor: &Actor) -> BoardResult<EditGrant> {
        let now = self.now_ms();
        let task = self.get_task(task_id)?;

        let mut displaced = None;
        if let Some(lock) = &task.edit_lock {
            if lock.blocks(actor.id, now, self.lock_timeout_ms) {
                let conflict = LockConflict::new(task_id, lock, now, self.lock_timeout_ms);
                info!(
                    "event=edit_begin module=edit_control status=conflict task_id={} lock_age_ms={}",
                    task_id, conflict.lock_age_ms
                );
                return Err(BoardError::EditConflict(conflict));
            }
            if lock.holder != actor.id {
                displaced = Some(lock.clone());
            }
        }

        let lock = EditLock::new(actor, now);
        if !self.repo.set_edit_lock(task_id, Some(&lock))? {
            return Err(BoardError::NotFound(task_id));
        }

        info!(
            "event=edit_begin module=edit_control status=ok task_id={} displaced_stale_lock={}",
            task_id,
            displaced.is_some()
        );
        Ok(EditGrant { lock, displaced })
    }

    /// Releases any edit lock on `task_id`.
    ///
    /// Idempotent: a missing task, a clear lock, or a lock owned by another
    /// actor are all accepted. Returns the task after release when a lock was
    /// actually cleared.
    pub fn end_edit(&self, task_id: TaskId, actor: &Actor) -> BoardResult<Option<Task>> {
        let Some(mut task) = self.repo.get_task(task_id)? else {
            debug!(
                "event=edit_end module=edit_control status=noop reason=missing task_id={}",
                task_id
            );
            return Ok(None);
        };
        let Some(lock) = task.edit_lock.take() else {
            return Ok(None);
        };

        if !self.repo.set_edit_lock(task_id, None)? {
            return Ok(None);
        }
        info!(
            "event=edit_end module=edit_control status=ok task_id={} cleared_other_holder={}",
            task_id,
            lock.holder != actor.id
        );
        Ok(Some(task))
    }

    /// Validates and inserts a version-1 task.
    pub fn create_task(&self, actor: &Actor, request: &CreateTaskRequest) -> BoardResult<Task> {
        let title = normalize_title(&request.title)?;
        let description = normalize_description(request.description.as_deref())?;
        if self.repo.find_by_title(&title)?.is_some() {
            return Err(BoardError::DuplicateTitle(title));
        }

        let assignee = request.assigned_actor.unwrap_or(actor.id);
        let mut task = Task::new(title, actor.id, assignee, self.now_ms());
        task.description = description;
        if let Some(priority) = request.priority {
            task.priority = priority;
        }

        // The UNIQUE index settles races the pre-check above cannot see.
        self.repo.insert_task(&task)?;
        info!(
            "event=task_create module=edit_control status=ok task_id={} version={}",
            task.id, task.version
        );
        Ok(task)
    }

    /// Applies `patch` to `task_id` under optimistic concurrency control.
    ///
    /// # Errors
    /// - `NotFound` when the task does not exist.
    /// - `VersionConflict` when `expected_version` is stale, including when a
    ///   concurrent commit wins the compare-and-swap.
    /// - `EditConflict` when another actor holds a live lock and `policy` is
    ///   [`LockPolicy::Respect`].
    /// - `DuplicateTitle` / `ReservedTitle` / `InvalidInput` for bad fields.
    pub fn commit_mutation(
        &self,
        task_id: TaskId,
        actor: &Actor,
        patch: &TaskPatch,
        expected_version: Option<i64>,
        policy: LockPolicy,
    ) -> BoardResult<Commit> {
        for attempt in 1..=MAX_COMMIT_ATTEMPTS {
            let now = self.now_ms();
            let current = self.get_task(task_id)?;

            if let Some(expected) = expected_version {
                if expected != current.version {
                    return Err(version_conflict(expected, current));
                }
            }

            if policy == LockPolicy::Respect {
                if let Some(lock) = &current.edit_lock {
                    if lock.blocks(actor.id, now, self.lock_timeout_ms) {
                        return Err(BoardError::EditConflict(LockConflict::new(
                            task_id,
                            lock,
                            now,
                            self.lock_timeout_ms,
                        )));
                    }
                }
            }

            let next = self.apply_patch(&current, patch, now)?;
            match self.repo.compare_and_swap(current.version, &next)? {
                SwapOutcome::Written => {
                    info!(
                        "event=task_commit module=edit_control status=ok task_id={} version={} attempt={}",
                        task_id, next.version, attempt
                    );
                    return Ok(Commit {
                        previous: current,
                        task: next,
                    });
                }
                SwapOutcome::Stale => {
                    debug!(
                        "event=task_commit module=edit_control status=stale task_id={} base_version={} attempt={}",
                        task_id, current.version, attempt
                    );
                    if let Some(expected) = expected_version {
                        let fresh = self.get_task(task_id)?;
                        return Err(version_conflict(expected, fresh));
                    }
                }
            }
        }

        warn!(
            "event=task_commit module=edit_control status=error error_code=commit_contended task_id={}",
            task_id
        );
        Err(BoardError::CommitContended {
            task_id,
            attempts: MAX_COMMIT_ATTEMPTS,
        })
    }

    /// Hard-deletes one task, running `before_delete` in the same write
    /// transaction on the row being removed.
    ///
    /// # Errors
    /// - `NotFound` when the task is gone, including when a concurrent delete
    ///   won. `before_delete` is not called then.
    pub fn delete_task<F, T>(&self, task_id: TaskId, before_delete: F) -> BoardResult<(Task, T)>
    where
        F: FnOnce(&Task) -> T,
    {
        let deleted = self.repo.delete_task_with(task_id, before_delete)?;
        info!(
            "event=task_delete module=edit_control status=ok task_id={} version={}",
            task_id, deleted.0.version
        );
        Ok(deleted)
    }

    fn apply_patch(&self, current: &Task, patch: &TaskPatch, now: i64) -> BoardResult<Task> {
        let mut next = current.clone();

        if let Some(raw_title) = &patch.title {
            let title = normalize_title(raw_title)?;
            if title != current.title {
                if let Some(owner) = self.repo.find_by_title(&title)? {
                    if owner.id != current.id {
                        return Err(BoardError::DuplicateTitle(title));
                    }
                }
                next.title = title;
            }
        }
        if let Some(description) = &patch.description {
            next.description = normalize_description(description.as_deref())?;
        }
        if let Some(status) = patch.status {
            next.status = status;
        }
        if let Some(priority) = patch.priority {
            next.priority = priority;
        }
        if let Some(assignee) = patch.assigned_actor {
            next.assigned_actor = assignee;
        }

        next.version = current.version + 1;
        next.last_modified_at = now;
        next.edit_lock = None;
        Ok(next)
    }
}

fn version_conflict(expected: i64, current: Task) -> BoardError {
    BoardError::VersionConflict {
        expected,
        current: Box::new(current),
    }
}
