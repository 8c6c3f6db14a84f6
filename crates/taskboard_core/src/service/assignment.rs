//! Load-balanced task assignment.
//!
//! # Invariants
//! - The chosen actor has an active-task count no greater than any other
//!   registered actor at selection time; ties go to the lowest actor id.
//! - Loads are always re-queried, never cached. Two concurrent smart assigns
//!   may pick the same actor.
//! - Once the commit lands the call succeeds; a failed post-commit recount
//!   only leaves the refreshed loads empty.

use crate::model::actor::{Actor, ActorId, ActorLoad};
use crate::model::task::{TaskId, TaskPatch};
use crate::repo::actor_repo::ActorRepository;
use crate::repo::task_repo::TaskRepository;
use crate::service::edit_control::{Commit, ConcurrencyController, LockPolicy};
use crate::service::error::{BoardError, BoardResult};
use log::{info, warn};

/// Outcome of one smart assign.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmartAssignment {
    pub commit: Commit,
    /// The chosen actor with its active-task count at selection time.
    pub chosen: ActorLoad,
    /// Loads recomputed after the commit. `None` when the recount failed;
    /// the commit stands either way.
    pub previous_assignee: Option<ActorLoad>,
    pub new_assignee: Option<ActorLoad>,
}

impl SmartAssignment {
    pub fn loads_refreshed(&self) -> bool {
        self.previous_assignee.is_some() && self.new_assignee.is_some()
    }
}

/// Picks assignees from the actor directory.
pub struct AssignmentBalancer<D: ActorRepository> {
    directory: D,
}

impl<D: ActorRepository> AssignmentBalancer<D> {
    pub fn new(directory: D) -> Self {
        Self { directory }
    }

    pub fn directory(&self) -> &D {
        &self.directory
    }

    /// Returns the registered actor with the fewest active tasks.
    pub fn pick_least_loaded(&self) -> BoardResult<ActorLoad> {
        self.directory
            .list_loads()?
            .into_iter()
            .min_by_key(|load| (load.active_tasks, load.actor.id))
            .ok_or(BoardError::NoActorsAvailable)
    }

    /// Reassigns `task_id` to the least-loaded actor.
    ///
    /// Commits with no version precondition and overrides live edit locks.
    pub fn smart_assign<T: TaskRepository>(
        &self,
        controller: &ConcurrencyController<T>,
        actor: &Actor,
        task_id: TaskId,
    ) -> BoardResult<SmartAssignment> {
        // Missing tasks fail before the directory is consulted.
        controller.get_task(task_id)?;
        let chosen = self.pick_least_loaded()?;

        let commit = controller.commit_mutation(
            task_id,
            actor,
            &TaskPatch::assign(chosen.actor.id),
            None,
            LockPolicy::Override,
        )?;

        let previous_assignee = self.load_after_commit(task_id, commit.previous.assigned_actor);
        let new_assignee = self.load_after_commit(task_id, commit.task.assigned_actor);
        info!(
            "event=smart_assign module=assignment status=ok task_id={} chosen_actor={} chosen_load={} version={}",
            task_id, chosen.actor.id, chosen.active_tasks, commit.task.version
        );
        Ok(SmartAssignment {
            commit,
            chosen,
            previous_assignee,
            new_assignee,
        })
    }

    /// Recounts one actor's load once the commit has landed. Failures are
    /// logged and never turn the committed assignment into an error.
    fn load_after_commit(&self, task_id: TaskId, actor_id: ActorId) -> Option<ActorLoad> {
        match self.directory.load_of(actor_id) {
            Ok(Some(load)) => Some(load),
            Ok(None) => {
                warn!(
                    "event=smart_assign_load module=assignment status=degraded error_code=unknown_actor task_id={} actor_id={}",
                    task_id, actor_id
                );
                None
            }
            Err(err) => {
                warn!(
                    "event=smart_assign_load module=assignment status=degraded task_id={} actor_id={} error={}",
                    task_id, actor_id, err
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::AssignmentBalancer;
    use crate::db::open_db_in_memory;
    use crate::model::actor::Actor;
    use crate::repo::actor_repo::{ActorRepository, SqliteActorRepository};
    use crate::service::error::BoardError;
    use uuid::Uuid;

    #[test]
    fn empty_directory_has_no_candidates() {
        let conn = open_db_in_memory().unwrap();
        let balancer = AssignmentBalancer::new(SqliteActorRepository::try_new(&conn).unwrap());
        assert!(matches!(
            balancer.pick_least_loaded(),
            Err(BoardError::NoActorsAvailable)
        ));
    }

    #[test]
    fn ties_go_to_lowest_actor_id() {
        let conn = open_db_in_memory().unwrap();
        let repo = SqliteActorRepository::try_new(&conn).unwrap();
        let high = Actor::new(Uuid::from_u128(9), "zed");
        let low = Actor::new(Uuid::from_u128(2), "amy");
        repo.upsert_actor(&high).unwrap();
        repo.upsert_actor(&low).unwrap();

        let balancer = AssignmentBalancer::new(repo);
        let chosen = balancer.pick_least_loaded().unwrap();
        assert_eq!(chosen.actor, low);
        assert_eq!(chosen.active_tasks, 0);
    }
}
