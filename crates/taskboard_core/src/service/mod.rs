//! Board use-case services.
//!
//! # Responsibility
//! - Orchestrate store calls into board-level operations.
//! - Keep relay and CLI layers decoupled from storage details.
//!
//! # Layout
//! - `edit_control`: versioned commits and soft edit locks.
//! - `assignment`: least-loaded actor selection.
//! - `activity_recorder`: ledger diffing and queries.
//! - `board_service`: facade that sequences commit, ledger and broadcast.

pub mod activity_recorder;
pub mod assignment;
pub mod board_service;
pub mod edit_control;
pub mod error;
