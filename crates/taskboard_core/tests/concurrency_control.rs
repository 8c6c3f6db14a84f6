use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;
use taskboard_core::db::{open_db, open_db_in_memory};
use taskboard_core::repo::actor_repo::{ActorRepository, SqliteActorRepository};
use taskboard_core::repo::task_repo::SqliteTaskRepository;
use taskboard_core::service::edit_control::ConcurrencyController;
use taskboard_core::{
    Actor, BoardError, Clock, CreateTaskRequest, LockPolicy, ManualClock, SystemClock, TaskPatch,
    TaskStatus, DEFAULT_EDIT_LOCK_TIMEOUT,
};
use uuid::Uuid;

fn controller<'conn>(
    conn: &'conn Connection,
    clock: Arc<dyn Clock>,
) -> ConcurrencyController<SqliteTaskRepository<'conn>> {
    ConcurrencyController::new(
        SqliteTaskRepository::try_new(conn).unwrap(),
        clock,
        DEFAULT_EDIT_LOCK_TIMEOUT,
    )
}

fn register(conn: &Connection, name: &str) -> Actor {
    let actor = Actor::new(Uuid::new_v4(), name);
    SqliteActorRepository::try_new(conn)
        .unwrap()
        .upsert_actor(&actor)
        .unwrap();
    actor
}

fn file_board(dir: &Path) -> (std::path::PathBuf, Connection) {
    let path = dir.join("board.sqlite3");
    let conn = open_db(&path).unwrap();
    (path, conn)
}

#[test]
fn versions_grow_by_one_per_commit() {
    let conn = open_db_in_memory().unwrap();
    let alice = register(&conn, "alice");
    let control = controller(&conn, Arc::new(ManualClock::new(1_000)));

    let task = control
        .create_task(&alice, &CreateTaskRequest::titled("Ship"))
        .unwrap();
    assert_eq!(task.version, 1);

    let mut seen = vec![task.version];
    for status in [
        TaskStatus::InProgress,
        TaskStatus::Done,
        TaskStatus::Todo,
        TaskStatus::Done,
    ] {
        let commit = control
            .commit_mutation(
                task.id,
                &alice,
                &TaskPatch::move_to(status),
                None,
                LockPolicy::Respect,
            )
            .unwrap();
        assert_eq!(commit.previous.version + 1, commit.task.version);
        seen.push(commit.task.version);
    }
    assert_eq!(seen, vec![1, 2, 3, 4, 5]);
}

#[test]
fn same_expected_version_commits_exactly_once() {
    let dir = tempfile::tempdir().unwrap();
    let (path, conn) = file_board(dir.path());
    let alice = register(&conn, "alice");
    let task = controller(&conn, Arc::new(SystemClock))
        .create_task(&alice, &CreateTaskRequest::titled("Contended"))
        .unwrap();

    let writers = 4;
    let barrier = Arc::new(Barrier::new(writers));
    let results: Vec<_> = thread::scope(|scope| {
        let handles: Vec<_> = (0..writers)
            .map(|idx| {
                let barrier = Arc::clone(&barrier);
                let path = path.clone();
                let actor = alice.clone();
                scope.spawn(move || {
                    let conn = open_db(&path).unwrap();
                    let control = controller(&conn, Arc::new(SystemClock));
                    let patch = TaskPatch {
                        description: Some(Some(format!("writer {idx}"))),
                        ..TaskPatch::default()
                    };
                    barrier.wait();
                    control.commit_mutation(task.id, &actor, &patch, Some(1), LockPolicy::Respect)
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let winners = results.iter().filter(|result| result.is_ok()).count();
    assert_eq!(winners, 1);
    for result in results.into_iter().filter_map(Result::err) {
        match result {
            BoardError::VersionConflict { expected, current } => {
                assert_eq!(expected, 1);
                assert_eq!(current.version, 2);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
    let stored = controller(&conn, Arc::new(SystemClock))
        .get_task(task.id)
        .unwrap();
    assert_eq!(stored.version, 2);
}

#[test]
fn unconditioned_concurrent_commits_all_land_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let (path, conn) = file_board(dir.path());
    let alice = register(&conn, "alice");
    let task = controller(&conn, Arc::new(SystemClock))
        .create_task(&alice, &CreateTaskRequest::titled("Counter"))
        .unwrap();

    let writers = 3;
    let commits_each = 3;
    let barrier = Arc::new(Barrier::new(writers));
    let versions: Vec<i64> = thread::scope(|scope| {
        let handles: Vec<_> = (0..writers)
            .map(|_| {
                let barrier = Arc::clone(&barrier);
                let path = path.clone();
                let actor = alice.clone();
                scope.spawn(move || {
                    let conn = open_db(&path).unwrap();
                    let control = controller(&conn, Arc::new(SystemClock));
                    barrier.wait();
                    (0..commits_each)
                        .map(|_| {
                            control
                                .commit_mutation(
                                    task.id,
                                    &actor,
                                    &TaskPatch::move_to(TaskStatus::InProgress),
                                    None,
                                    LockPolicy::Respect,
                                )
                                .unwrap()
                                .task
                                .version
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect()
    });

    let mut sorted = versions.clone();
    sorted.sort_unstable();
    let expected: Vec<i64> = (2..=(1 + (writers * commits_each) as i64)).collect();
    assert_eq!(sorted, expected, "versions must be gap-free and unique");
}

#[test]
fn live_lock_blocks_other_actor_until_timeout() {
    let conn = open_db_in_memory().unwrap();
    let alice = register(&conn, "alice");
    let bob = register(&conn, "bob");
    let clock = ManualClock::new(0);
    let control = controller(&conn, Arc::new(clock.clone()));
    let task = control
        .create_task(&alice, &CreateTaskRequest::titled("Locked"))
        .unwrap();

    control.begin_edit(task.id, &alice).unwrap();
    clock.set(29_999);
    match control.begin_edit(task.id, &bob).unwrap_err() {
        BoardError::EditConflict(conflict) => {
            assert_eq!(conflict.holder_id, alice.id);
            assert_eq!(conflict.holder_name, "alice");
            assert_eq!(conflict.lock_age_ms, 29_999);
            assert_eq!(conflict.retry_after_ms, 1);
        }
        other => panic!("unexpected error: {other}"),
    }

    clock.set(30_000);
    let grant = control.begin_edit(task.id, &bob).unwrap();
    assert_eq!(grant.lock.holder, bob.id);
    assert_eq!(grant.displaced.map(|lock| lock.holder), Some(alice.id));
    assert_eq!(control.get_task(task.id).unwrap().version, 1);
}

#[test]
fn holder_may_reacquire_and_commit_through_its_own_lock() {
    let conn = open_db_in_memory().unwrap();
    let alice = register(&conn, "alice");
    let clock = ManualClock::new(0);
    let control = controller(&conn, Arc::new(clock.clone()));
    let task = control
        .create_task(&alice, &CreateTaskRequest::titled("Mine"))
        .unwrap();

    control.begin_edit(task.id, &alice).unwrap();
    clock.advance(Duration::from_secs(5));
    let again = control.begin_edit(task.id, &alice).unwrap();
    assert_eq!(again.lock.started_at, 5_000);
    assert!(again.displaced.is_none());

    let commit = control
        .commit_mutation(
            task.id,
            &alice,
            &TaskPatch::move_to(TaskStatus::Done),
            Some(1),
            LockPolicy::Respect,
        )
        .unwrap();
    assert_eq!(commit.task.version, 2);
    assert!(commit.task.edit_lock.is_none());
}

#[test]
fn override_policy_ignores_live_lock() {
    let conn = open_db_in_memory().unwrap();
    let alice = register(&conn, "alice");
    let bob = register(&conn, "bob");
    let control = controller(&conn, Arc::new(ManualClock::new(0)));
    let task = control
        .create_task(&alice, &CreateTaskRequest::titled("Admin"))
        .unwrap();
    control.begin_edit(task.id, &alice).unwrap();

    let patch = TaskPatch::assign(bob.id);
    assert!(matches!(
        control.commit_mutation(task.id, &bob, &patch, None, LockPolicy::Respect),
        Err(BoardError::EditConflict(_))
    ));
    let commit = control
        .commit_mutation(task.id, &bob, &patch, None, LockPolicy::Override)
        .unwrap();
    assert_eq!(commit.task.assigned_actor, bob.id);
    assert!(commit.task.edit_lock.is_none());
}

#[test]
fn end_edit_is_idempotent() {
    let conn = open_db_in_memory().unwrap();
    let alice = register(&conn, "alice");
    let bob = register(&conn, "bob");
    let control = controller(&conn, Arc::new(ManualClock::new(0)));
    let task = control
        .create_task(&alice, &CreateTaskRequest::titled("Release"))
        .unwrap();

    control.begin_edit(task.id, &alice).unwrap();
    let cleared = control.end_edit(task.id, &bob).unwrap();
    assert!(cleared.is_some_and(|task| task.edit_lock.is_none()));
    assert!(control.end_edit(task.id, &alice).unwrap().is_none());
    assert!(control.end_edit(Uuid::new_v4(), &alice).unwrap().is_none());
    assert_eq!(control.get_task(task.id).unwrap().version, 1);
}

#[test]
fn begin_edit_on_missing_task_is_not_found() {
    let conn = open_db_in_memory().unwrap();
    let alice = register(&conn, "alice");
    let control = controller(&conn, Arc::new(ManualClock::new(0)));
    let missing = Uuid::new_v4();
    assert!(matches!(
        control.begin_edit(missing, &alice),
        Err(BoardError::NotFound(id)) if id == missing
    ));
    assert!(matches!(
        control.commit_mutation(
            missing,
            &alice,
            &TaskPatch::default(),
            None,
            LockPolicy::Respect
        ),
        Err(BoardError::NotFound(_))
    ));
}

#[test]
fn stale_takeover_lock_only_blocks_while_fresh() {
    let conn = open_db_in_memory().unwrap();
    let a = register(&conn, "A");
    let b = register(&conn, "B");
    let clock = ManualClock::new(0);
    let control = controller(&conn, Arc::new(clock.clone()));

    let t1 = control
        .create_task(&a, &CreateTaskRequest::titled("T1"))
        .unwrap();
    control.begin_edit(t1.id, &a).unwrap();

    clock.advance(Duration::from_secs(31));
    let grant = control.begin_edit(t1.id, &b).unwrap();
    assert_eq!(grant.displaced.map(|lock| lock.holder), Some(a.id));

    let patch = TaskPatch::move_to(TaskStatus::InProgress);
    match control
        .commit_mutation(t1.id, &a, &patch, Some(1), LockPolicy::Respect)
        .unwrap_err()
    {
        BoardError::EditConflict(conflict) => assert_eq!(conflict.holder_name, "B"),
        other => panic!("unexpected error: {other}"),
    }

    clock.advance(Duration::from_secs(30));
    let commit = control
        .commit_mutation(t1.id, &a, &patch, Some(1), LockPolicy::Respect)
        .unwrap();
    assert_eq!(commit.task.version, 2);
    assert!(commit.task.edit_lock.is_none());
    assert_eq!(commit.task.last_modified_at, 61_000);
}
