//! Board domain model.
//!
//! # Responsibility
//! - Define canonical data structures used by core business logic.
//!
//! # Invariants
//! - Every task and ledger entry is identified by a stable UUID.
//! - Lock state lives on the task record, not in a process-wide registry.

pub mod activity;
pub mod actor;
pub mod task;
