//! Core engine for a shared task board.
//!
//! Owns the task store, the optimistic-version/edit-lock protocol, the
//! activity ledger, load-balanced assignment and the broadcast relay. Every
//! board invariant is enforced here; outer layers only call [`BoardService`].

pub mod clock;
pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod relay;
pub mod repo;
pub mod service;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{load_config, BoardConfig, ConfigError};
pub use db::{open_db, open_db_in_memory, DbError};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use model::activity::{ActivityAction, ActivityRecord};
pub use model::actor::{Actor, ActorId, ActorLoad};
pub use model::task::{
    CreateTaskRequest, EditLock, Task, TaskId, TaskPatch, TaskPriority, TaskStatus,
    TaskValidationError,
};
pub use relay::broadcast::{BroadcastRelay, RelayLimits, Session, SessionId};
pub use relay::event::{BoardEvent, EditingNotice};
pub use relay::RelayError;
pub use repo::{RepoError, RepoResult};
pub use service::board_service::{
    BoardOptions, BoardService, Caller, Committed, SqliteBoardService,
};
pub use service::edit_control::{EditGrant, LockPolicy, DEFAULT_EDIT_LOCK_TIMEOUT};
pub use service::error::{BoardError, BoardResult, LockConflict};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
