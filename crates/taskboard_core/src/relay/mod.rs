//! Realtime broadcast relay for board changes.
//!
//! Delivery is best-effort and in-memory only. Nothing here is persisted.

pub mod broadcast;
pub mod event;

use std::error::Error;
use std::fmt::{Display, Formatter};

/// Relay bookkeeping failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayError {
    LockPoisoned,
    SessionLimitReached { max: usize },
    InvalidLimits(&'static str),
}

impl Display for RelayError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LockPoisoned => write!(f, "relay state lock poisoned"),
            Self::SessionLimitReached { max } => write!(f, "session limit reached ({max})"),
            Self::InvalidLimits(reason) => write!(f, "relay limits invalid: {reason}"),
        }
    }
}

impl Error for RelayError {}
