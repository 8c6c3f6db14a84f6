//! Board use-case facade.
//!
//! # Responsibility
//! - Expose the board operations actors call: create, update, edit-lock,
//!   smart assign, delete and the read queries.
//! - Sequence each mutation as commit, then ledger append, then broadcast.
//!
//! # Invariants
//! - A committed mutation is never reported as failed because the ledger or
//!   the relay failed afterwards; such results are flagged degraded.
//! - Broadcasts skip the caller's own session.
//! - The calling actor is registered before any write that references it.

use crate::clock::Clock;
use crate::model::activity::ActivityRecord;
use crate::model::actor::{Actor, ActorId, ActorLoad};
use crate::model::task::{CreateTaskRequest, Task, TaskId, TaskPatch};
use crate::relay::broadcast::{BroadcastRelay, SessionId};
use crate::relay::event::{BoardEvent, EditingNotice};
use crate::repo::activity_repo::{ActivityRepository, SqliteActivityRepository};
use crate::repo::actor_repo::{ActorRepository, SqliteActorRepository};
use crate::repo::task_repo::{SqliteTaskRepository, TaskRepository};
use crate::service::activity_recorder::{ActivityRecorder, DEFAULT_ACTIVITY_LIMIT};
use crate::service::assignment::{AssignmentBalancer, SmartAssignment};
use crate::service::edit_control::{
    ConcurrencyController, EditGrant, LockPolicy, DEFAULT_EDIT_LOCK_TIMEOUT,
};
use crate::service::error::{BoardError, BoardResult};
use log::{info, warn};
use rusqlite::Connection;
use std::sync::Arc;
use std::time::Duration;

/// Who is calling, and from which relay session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub actor: Actor,
    pub session: Option<SessionId>,
}

impl Caller {
    pub fn new(actor: Actor) -> Self {
        Self {
            actor,
            session: None,
        }
    }

    pub fn with_session(mut self, session: SessionId) -> Self {
        self.session = Some(session);
        self
    }
}

/// Result of a committed mutation plus its ledger entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Committed<V> {
    pub value: V,
    /// `None` when the ledger append failed after the commit.
    pub activity: Option<ActivityRecord>,
}

impl<V> Committed<V> {
    pub fn is_degraded(&self) -> bool {
        self.activity.is_none()
    }
}

/// Tunables applied when a service is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoardOptions {
    pub edit_lock_timeout: Duration,
    pub activity_default_limit: u32,
}

impl Default for BoardOptions {
    fn default() -> Self {
        Self {
            edit_lock_timeout: DEFAULT_EDIT_LOCK_TIMEOUT,
            activity_default_limit: DEFAULT_ACTIVITY_LIMIT,
        }
    }
}

/// Service wired to SQLite stores sharing one connection.
pub type SqliteBoardService<'conn> = BoardService<
    SqliteTaskRepository<'conn>,
    SqliteActivityRepository<'conn>,
    SqliteActorRepository<'conn>,
>;

/// Board service facade over the task store, ledger and actor directory.
pub struct BoardService<T: TaskRepository, A: ActivityRepository, D: ActorRepository> {
    controller: ConcurrencyController<T>,
    balancer: AssignmentBalancer<D>,
    recorder: ActivityRecorder<A>,
    relay: BroadcastRelay,
}

impl<'conn> SqliteBoardService<'conn> {
    /// Builds a service over a migrated connection.
    pub fn sqlite(
        conn: &'conn Connection,
        clock: Arc<dyn Clock>,
        options: BoardOptions,
        relay: BroadcastRelay,
    ) -> BoardResult<Self> {
        let controller = ConcurrencyController::new(
            SqliteTaskRepository::try_new(conn)?,
            Arc::clone(&clock),
            options.edit_lock_timeout,
        );
        let balancer = AssignmentBalancer::new(SqliteActorRepository::try_new(conn)?);
        let recorder = ActivityRecorder::new(
            SqliteActivityRepository::try_new(conn)?,
            clock,
            options.activity_default_limit,
        );
        Ok(Self::new(controller, balancer, recorder, relay))
    }
}

impl<T: TaskRepository, A: ActivityRepository, D: ActorRepository> BoardService<T, A, D> {
    pub fn new(
        controller: ConcurrencyController<T>,
        balancer: AssignmentBalancer<D>,
        recorder: ActivityRecorder<A>,
        relay: BroadcastRelay,
    ) -> Self {
        Self {
            controller,
            balancer,
            recorder,
            relay,
        }
    }

    pub fn relay(&self) -> &BroadcastRelay {
        &self.relay
    }

    /// Registers or renames an actor.
    pub fn register_actor(&self, actor: &Actor) -> BoardResult<()> {
        self.balancer.directory().upsert_actor(actor)?;
        info!(
            "event=actor_register module=board status=ok actor_id={}",
            actor.id
        );
        Ok(())
    }

    pub fn create_task(
        &self,
        caller: &Caller,
        request: &CreateTaskRequest,
    ) -> BoardResult<Committed<Task>> {
        self.register_actor(&caller.actor)?;
        let assignee_name = match request.assigned_actor {
            Some(id) if id != caller.actor.id => self.require_actor(id)?.display_name,
            _ => caller.actor.display_name.clone(),
        };

        let task = self.controller.create_task(&caller.actor, request)?;
        let activity = self
            .recorder
            .record_created(&task, &caller.actor, &assignee_name);

        self.publish(caller.session, BoardEvent::TaskCreated(task.clone()));
        self.publish_activity(caller.session, activity.as_ref());
        Ok(Committed {
            value: task,
            activity,
        })
    }

    /// Applies a partial update, optionally guarded by `expected_version`.
    pub fn update_task(
        &self,
        caller: &Caller,
        task_id: TaskId,
        patch: &TaskPatch,
        expected_version: Option<i64>,
    ) -> BoardResult<Committed<Task>> {
        self.register_actor(&caller.actor)?;
        if let Some(assignee) = patch.assigned_actor {
            self.require_actor(assignee)?;
        }

        let commit = self
            .controller
            .commit_mutation(
                task_id,
                &caller.actor,
                patch,
                expected_version,
                LockPolicy::Respect,
            )
            .map_err(|err| log_rejection("task_update", task_id, err))?;
        let activity = self.recorder.record_update(
            &commit.previous,
            &commit.task,
            &caller.actor,
            |id| self.actor_name(id),
        );

        self.publish(caller.session, BoardEvent::TaskUpdated(commit.task.clone()));
        self.publish_activity(caller.session, activity.as_ref());
        Ok(Committed {
            value: commit.task,
            activity,
        })
    }

    /// Takes the soft edit lock and tells other sessions about it.
    pub fn begin_edit(&self, caller: &Caller, task_id: TaskId) -> BoardResult<EditGrant> {
        self.register_actor(&caller.actor)?;
        match self.controller.begin_edit(task_id, &caller.actor) {
            Ok(grant) => {
                let notice = EditingNotice {
                    task_id,
                    actor_id: caller.actor.id,
                    actor_name: caller.actor.display_name.clone(),
                    conflict: grant.displaced.is_some(),
                    holder_name: grant.displaced.as_ref().map(|lock| lock.holder_name.clone()),
                };
                self.publish(caller.session, BoardEvent::TaskEditing(notice));
                Ok(grant)
            }
            Err(BoardError::EditConflict(conflict)) => {
                let notice = EditingNotice {
                    task_id,
                    actor_id: caller.actor.id,
                    actor_name: caller.actor.display_name.clone(),
                    conflict: true,
                    holder_name: Some(conflict.holder_name.clone()),
                };
                self.publish(caller.session, BoardEvent::TaskEditing(notice));
                Err(BoardError::EditConflict(conflict))
            }
            Err(err) => Err(err),
        }
    }

    /// Releases the edit lock. Never fails for missing tasks or locks.
    pub fn end_edit(&self, caller: &Caller, task_id: TaskId) -> BoardResult<()> {
        if let Some(task) = self.controller.end_edit(task_id, &caller.actor)? {
            self.publish(caller.session, BoardEvent::TaskUpdated(task));
        }
        Ok(())
    }

    /// Reassigns a task to the least-loaded registered actor.
    pub fn smart_assign(
        &self,
        caller: &Caller,
        task_id: TaskId,
    ) -> BoardResult<Committed<SmartAssignment>> {
        self.register_actor(&caller.actor)?;
        let outcome = self
            .balancer
            .smart_assign(&self.controller, &caller.actor, task_id)
            .map_err(|err| log_rejection("smart_assign", task_id, err))?;
        let from_name = match &outcome.previous_assignee {
            Some(load) => load.actor.display_name.clone(),
            None => self.actor_name(outcome.commit.previous.assigned_actor),
        };
        let activity = self.recorder.record_smart_assigned(
            &outcome.commit.previous,
            &outcome.commit.task,
            &caller.actor,
            &from_name,
            &outcome.chosen.actor.display_name,
            outcome.chosen.active_tasks,
        );

        self.publish(
            caller.session,
            BoardEvent::TaskUpdated(outcome.commit.task.clone()),
        );
        self.publish_activity(caller.session, activity.as_ref());
        Ok(Committed {
            value: outcome,
            activity,
        })
    }

    /// Hard-deletes a task. The ledger entry is written before the row goes,
    /// in the same transaction, so a losing concurrent delete leaves no entry.
    pub fn delete_task(&self, caller: &Caller, task_id: TaskId) -> BoardResult<Committed<Task>> {
        self.register_actor(&caller.actor)?;
        let (task, activity) = self
            .controller
            .delete_task(task_id, |task| {
                self.recorder.record_deleted(task, &caller.actor)
            })
            .map_err(|err| log_rejection("task_delete", task_id, err))?;

        self.publish(caller.session, BoardEvent::TaskDeleted { task_id });
        self.publish_activity(caller.session, activity.as_ref());
        Ok(Committed {
            value: task,
            activity,
        })
    }

    pub fn get_task(&self, task_id: TaskId) -> BoardResult<Task> {
        self.controller.get_task(task_id)
    }

    pub fn list_tasks(&self) -> BoardResult<Vec<Task>> {
        self.controller.list_tasks()
    }

    /// Newest-first ledger entries. `None` uses the configured default.
    pub fn recent_activity(&self, limit: Option<u32>) -> BoardResult<Vec<ActivityRecord>> {
        self.recorder.recent(limit)
    }

    pub fn task_activity(&self, task_id: TaskId) -> BoardResult<Vec<ActivityRecord>> {
        self.recorder.for_task(task_id)
    }

    /// Active-task counts of every registered actor, ordered by actor id.
    pub fn actor_loads(&self) -> BoardResult<Vec<ActorLoad>> {
        Ok(self.balancer.directory().list_loads()?)
    }

    /// Relays a client presence signal without touching the task store.
    ///
    /// Returns how many other sessions received it.
    pub fn announce_editing(&self, origin: SessionId, notice: EditingNotice) -> usize {
        match self.relay.announce_editing(origin, notice) {
            Ok(delivered) => delivered,
            Err(err) => {
                warn!(
                    "event=relay_publish module=board status=degraded event_name=task-editing error={}",
                    err
                );
                0
            }
        }
    }

    fn require_actor(&self, id: ActorId) -> BoardResult<Actor> {
        self.balancer
            .directory()
            .get_actor(id)?
            .ok_or(BoardError::UnknownActor(id))
    }

    fn actor_name(&self, id: ActorId) -> String {
        match self.balancer.directory().get_actor(id) {
            Ok(Some(actor)) => actor.display_name,
            _ => id.to_string(),
        }
    }

    fn publish(&self, origin: Option<SessionId>, event: BoardEvent) {
        if let Err(err) = self.relay.publish(origin, &event) {
            warn!(
                "event=relay_publish module=board status=degraded event_name={} error={}",
                event.name(),
                err
            );
        }
    }

    fn publish_activity(&self, origin: Option<SessionId>, activity: Option<&ActivityRecord>) {
        if let Some(record) = activity {
            self.publish(origin, BoardEvent::ActivityLogged(record.clone()));
        }
    }
}

fn log_rejection(event: &str, task_id: TaskId, err: BoardError) -> BoardError {
    info!(
        "event={} module=board status=rejected error_code={} task_id={}",
        event,
        err.kind(),
        task_id
    );
    err
}
