//! In-process fan-out of board events to joined sessions.
//!
//! # Invariants
//! - An event is never delivered back to the session that originated it.
//! - Each session sees events in publish order.
//! - A session whose queue is full or whose receiver is gone is removed; it
//!   must re-join and re-fetch board state.
//! - The relay mutex guards subscriber bookkeeping only and is never held
//!   across store I/O.

use super::event::{BoardEvent, EditingNotice};
use super::RelayError;
use crossbeam::channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError};
use log::{debug, info};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

pub const DEFAULT_QUEUE_CAPACITY: usize = 256;
pub const DEFAULT_MAX_SESSIONS: usize = 1024;

/// Identifier handed out on join.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(u64);

impl SessionId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl Display for SessionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "s{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayLimits {
    pub max_sessions: usize,
    /// Undelivered events a session may buffer before it is dropped.
    pub queue_capacity: usize,
}

impl RelayLimits {
    pub fn new(max_sessions: usize, queue_capacity: usize) -> Result<Self, RelayError> {
        if max_sessions == 0 {
            return Err(RelayError::InvalidLimits("max_sessions must be > 0"));
        }
        if queue_capacity == 0 {
            return Err(RelayError::InvalidLimits("queue_capacity must be > 0"));
        }
        Ok(Self {
            max_sessions,
            queue_capacity,
        })
    }
}

impl Default for RelayLimits {
    fn default() -> Self {
        Self {
            max_sessions: DEFAULT_MAX_SESSIONS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

/// Receiving end of one joined session.
///
/// Dropping the session leaves the room.
pub struct Session {
    id: SessionId,
    receiver: Receiver<BoardEvent>,
    dropped: Arc<AtomicBool>,
    relay: Weak<Mutex<RelayState>>,
}

impl Session {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn try_recv(&self) -> Option<BoardEvent> {
        match self.receiver.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<BoardEvent> {
        match self.receiver.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Takes every queued event without blocking.
    pub fn drain(&self) -> Vec<BoardEvent> {
        self.receiver.try_iter().collect()
    }

    /// Whether the relay removed this session for falling behind.
    pub fn was_dropped(&self) -> bool {
        self.dropped.load(Ordering::Acquire)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(inner) = self.relay.upgrade() {
            if let Ok(mut state) = inner.lock() {
                state.sessions.remove(&self.id);
            }
        }
    }
}

/// Single-room broadcast relay. Cheap to clone; clones share the room.
#[derive(Clone)]
pub struct BroadcastRelay {
    inner: Arc<Mutex<RelayState>>,
}

impl BroadcastRelay {
    pub fn new(limits: RelayLimits) -> Self {
        Self {
            inner: Arc::new(Mutex::new(RelayState::new(limits))),
        }
    }

    pub fn join(&self) -> Result<Session, RelayError> {
        let mut state = self.lock_state()?;
        if state.sessions.len() >= state.limits.max_sessions {
            return Err(RelayError::SessionLimitReached {
                max: state.limits.max_sessions,
            });
        }

        let (sender, receiver) = crossbeam::channel::bounded(state.limits.queue_capacity);
        let dropped = Arc::new(AtomicBool::new(false));
        let id = SessionId(state.next_session_id);
        state.next_session_id = state.next_session_id.saturating_add(1);
        state.sessions.insert(
            id,
            Subscriber {
                sender,
                dropped: Arc::clone(&dropped),
            },
        );
        info!(
            "event=relay_join module=relay status=ok session={} sessions={}",
            id,
            state.sessions.len()
        );

        Ok(Session {
            id,
            receiver,
            dropped,
            relay: Arc::downgrade(&self.inner),
        })
    }

    /// Removes a session explicitly. Unknown ids are ignored.
    pub fn leave(&self, id: SessionId) -> Result<(), RelayError> {
        let mut state = self.lock_state()?;
        if state.sessions.remove(&id).is_some() {
            info!(
                "event=relay_leave module=relay status=ok session={} sessions={}",
                id,
                state.sessions.len()
            );
        }
        Ok(())
    }

    /// Sends `event` to every session except `origin`.
    ///
    /// Returns the number of sessions the event was queued for.
    pub fn publish(
        &self,
        origin: Option<SessionId>,
        event: &BoardEvent,
    ) -> Result<usize, RelayError> {
        let mut state = self.lock_state()?;

        let mut delivered = 0;
        let mut dropped = Vec::new();
        for (id, subscriber) in &state.sessions {
            if Some(*id) == origin {
                continue;
            }
            match subscriber.sender.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    subscriber.dropped.store(true, Ordering::Release);
                    dropped.push(*id);
                }
                Err(TrySendError::Disconnected(_)) => dropped.push(*id),
            }
        }

        for id in &dropped {
            state.sessions.remove(id);
            info!(
                "event=relay_drop module=relay status=lagged session={} event_name={}",
                id,
                event.name()
            );
        }
        debug!(
            "event=relay_publish module=relay status=ok event_name={} delivered={} dropped={}",
            event.name(),
            delivered,
            dropped.len()
        );
        Ok(delivered)
    }

    /// Relays a client presence signal without touching the task store.
    pub fn announce_editing(
        &self,
        origin: SessionId,
        notice: EditingNotice,
    ) -> Result<usize, RelayError> {
        self.publish(Some(origin), &BoardEvent::TaskEditing(notice))
    }

    pub fn session_count(&self) -> Result<usize, RelayError> {
        Ok(self.lock_state()?.sessions.len())
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, RelayState>, RelayError> {
        self.inner.lock().map_err(|_| RelayError::LockPoisoned)
    }
}

impl Default for BroadcastRelay {
    fn default() -> Self {
        Self::new(RelayLimits::default())
    }
}

struct RelayState {
    limits: RelayLimits,
    next_session_id: u64,
    sessions: BTreeMap<SessionId, Subscriber>,
}

impl RelayState {
    fn new(limits: RelayLimits) -> Self {
        Self {
            limits,
            next_session_id: 1,
            sessions: BTreeMap::new(),
        }
    }
}

struct Subscriber {
    sender: Sender<BoardEvent>,
    dropped: Arc<AtomicBool>,
}
