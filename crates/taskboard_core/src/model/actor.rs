//! Actor identity and derived load model.
//!
//! Actors are authenticated upstream; the board only keeps the id and a
//! display name so conflict notices and ledger entries can name people.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable identifier for an authenticated actor.
pub type ActorId = Uuid;

/// Authenticated identity attached to every request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Actor {
    pub id: ActorId,
    pub display_name: String,
}

impl Actor {
    pub fn new(id: ActorId, display_name: impl Into<String>) -> Self {
        Self {
            id,
            display_name: display_name.into(),
        }
    }
}

/// Derived count of non-terminal tasks currently assigned to one actor.
///
/// Always computed from task records, never cached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorLoad {
    pub actor: Actor,
    pub active_tasks: u32,
}
