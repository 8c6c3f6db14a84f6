use std::sync::Arc;
use taskboard_core::db::open_db_in_memory;
use taskboard_core::{
    ActivityAction, Actor, BoardError, BoardOptions, BroadcastRelay, Caller, CreateTaskRequest,
    ManualClock, SqliteBoardService, TaskPatch, TaskStatus,
};
use uuid::Uuid;

fn service(conn: &rusqlite::Connection) -> SqliteBoardService<'_> {
    SqliteBoardService::sqlite(
        conn,
        Arc::new(ManualClock::new(1_000)),
        BoardOptions::default(),
        BroadcastRelay::default(),
    )
    .unwrap()
}

fn caller(id: u128, name: &str) -> Caller {
    Caller::new(Actor::new(Uuid::from_u128(id), name))
}

#[test]
fn picks_actor_with_fewest_active_tasks() {
    let conn = open_db_in_memory().unwrap();
    let board = service(&conn);
    let alice = caller(1, "alice");
    let bob = caller(2, "bob");
    let carol = caller(3, "carol");
    for who in [&alice, &bob, &carol] {
        board.register_actor(&who.actor).unwrap();
    }

    // alice: 2 active, bob: 1 active + 1 done, carol: 1 active.
    for title in ["a1", "a2"] {
        board
            .create_task(&alice, &CreateTaskRequest::titled(title))
            .unwrap();
    }
    board
        .create_task(&bob, &CreateTaskRequest::titled("b1"))
        .unwrap();
    let finished = board
        .create_task(&bob, &CreateTaskRequest::titled("b2"))
        .unwrap()
        .value;
    board
        .update_task(&bob, finished.id, &TaskPatch::move_to(TaskStatus::Done), Some(1))
        .unwrap();
    board
        .create_task(&carol, &CreateTaskRequest::titled("c1"))
        .unwrap();

    let target = board
        .create_task(&alice, &CreateTaskRequest::titled("needs owner"))
        .unwrap()
        .value;
    let result = board.smart_assign(&alice, target.id).unwrap();
    let outcome = &result.value;

    // bob and carol tie at 1; bob has the lower id.
    assert_eq!(outcome.commit.task.assigned_actor, bob.actor.id);
    assert_eq!(outcome.chosen.active_tasks, 1);
    assert!(outcome.loads_refreshed());
    assert_eq!(outcome.commit.task.version, target.version + 1);
    let previous = outcome.previous_assignee.as_ref().unwrap();
    assert_eq!(previous.actor.id, alice.actor.id);
    assert_eq!(previous.active_tasks, 2);
    assert_eq!(outcome.new_assignee.as_ref().unwrap().active_tasks, 2);

    let entry = result.activity.unwrap();
    assert_eq!(entry.action, ActivityAction::SmartAssigned);
    assert!(entry.details.contains("\"alice\""));
    assert!(entry.details.contains("\"bob\""));
}

#[test]
fn chosen_load_is_not_above_any_other_actor() {
    let conn = open_db_in_memory().unwrap();
    let board = service(&conn);
    let callers: Vec<Caller> = (1..=4).map(|id| caller(id, &format!("user{id}"))).collect();
    for (idx, who) in callers.iter().enumerate() {
        board.register_actor(&who.actor).unwrap();
        for n in 0..(4 - idx) {
            board
                .create_task(who, &CreateTaskRequest::titled(format!("{idx}-{n}")))
                .unwrap();
        }
    }

    let target = board
        .create_task(&callers[0], &CreateTaskRequest::titled("rebalance"))
        .unwrap()
        .value;
    let loads_before = board.actor_loads().unwrap();
    let outcome = board.smart_assign(&callers[0], target.id).unwrap().value;

    assert!(loads_before
        .iter()
        .all(|load| outcome.chosen.active_tasks <= load.active_tasks));
    assert_eq!(outcome.commit.task.assigned_actor, callers[3].actor.id);
}

#[test]
fn smart_assign_overrides_edit_lock() {
    let conn = open_db_in_memory().unwrap();
    let board = service(&conn);
    let alice = caller(1, "alice");
    let bob = caller(2, "bob");
    board.register_actor(&bob.actor).unwrap();

    let task = board
        .create_task(&alice, &CreateTaskRequest::titled("locked work"))
        .unwrap()
        .value;
    board.begin_edit(&alice, task.id).unwrap();

    let outcome = board.smart_assign(&bob, task.id).unwrap().value;
    assert_eq!(outcome.commit.task.assigned_actor, bob.actor.id);
    assert!(outcome.commit.task.edit_lock.is_none());
}

#[test]
fn missing_task_is_not_found() {
    let conn = open_db_in_memory().unwrap();
    let board = service(&conn);
    let missing = Uuid::new_v4();
    assert!(matches!(
        board.smart_assign(&caller(1, "alice"), missing),
        Err(BoardError::NotFound(id)) if id == missing
    ));
}
