//! Shared session registry and broadcast router.
//!
//! All mutable hub state (the active sessions and the history ring) sits
//! behind one lock, so a login claim or a broadcast is a single serialized
//! step. Outbound queues are unbounded: fan-out never waits on a slow peer.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::error::LoginError;
use crate::history::HistoryRing;
use crate::message::Message;

/// Identifies one connection for its whole lifetime.
pub type SessionId = String;

/// What a [`Session`](crate::session::Session) needs from the hub.
pub trait Relay: Send + Sync {
    /// Logins of all logged-in sessions, in registration order.
    fn roster(&self) -> Vec<String>;

    /// Whether any active session is logged in as `login`.
    fn is_online(&self, login: &str) -> bool;

    /// Claim `login` for `session_id`.
    ///
    /// On success `on_claimed` is called with the history to replay, oldest
    /// first, before any later broadcast can reach the session. It must not
    /// call back into the relay. Fails with [`LoginError::Taken`] if another
    /// active session holds the name.
    fn claim_login(
        &self,
        session_id: &str,
        login: &str,
        on_claimed: &mut dyn FnMut(&[Arc<Message>]),
    ) -> Result<(), LoginError>;

    /// Record `message` in history and queue it for every session not logged
    /// in as its author. Returns the number of sessions it was queued for.
    fn broadcast(&self, message: Message) -> usize;
}

struct Peer {
    id: SessionId,
    login: Option<String>,
    outbound: mpsc::UnboundedSender<String>,
}

struct HubState {
    /// Registration order is delivery order.
    sessions: Vec<Peer>,
    history: HistoryRing,
}

pub struct Hub {
    state: Mutex<HubState>,
}

impl Hub {
    /// Create a hub that keeps up to `history_size` messages for replay.
    pub fn new(history_size: usize) -> Self {
        Self {
            state: Mutex::new(HubState {
                sessions: Vec::new(),
                history: HistoryRing::new(history_size),
            }),
        }
    }

    /// Add a session to the active set.
    ///
    /// Returns false, leaving the existing session untouched, if the id is
    /// already registered.
    pub fn register(&self, session_id: SessionId, outbound: mpsc::UnboundedSender<String>) -> bool {
        let mut state = self.state.lock();
        if state.sessions.iter().any(|p| p.id == session_id) {
            tracing::warn!(%session_id, "Session id already registered");
            return false;
        }
        state.sessions.push(Peer {
            id: session_id,
            login: None,
            outbound,
        });
        true
    }

    /// Remove a session from the active set, freeing its login.
    ///
    /// Returns the login it held. Unregistering an unknown id is a no-op.
    pub fn unregister(&self, session_id: &str) -> Option<String> {
        let mut state = self.state.lock();
        let pos = state.sessions.iter().position(|p| p.id == session_id)?;
        state.sessions.remove(pos).login
    }

    /// Queue a raw line for one session. Returns false if the session is
    /// unknown or its queue is closed.
    pub fn send_to(&self, session_id: &str, line: String) -> bool {
        let state = self.state.lock();
        state
            .sessions
            .iter()
            .find(|p| p.id == session_id)
            .is_some_and(|p| p.outbound.send(line).is_ok())
    }

    /// Up to `n` most recent broadcasts, oldest first.
    pub fn last_messages(&self, n: usize) -> Vec<Arc<Message>> {
        self.state.lock().history.last(n)
    }

    /// Number of active sessions, anonymous ones included.
    pub fn len(&self) -> usize {
        self.state.lock().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().sessions.is_empty()
    }
}

impl Relay for Hub {
    fn roster(&self) -> Vec<String> {
        self.state
            .lock()
            .sessions
            .iter()
            .filter_map(|p| p.login.clone())
            .collect()
    }

    fn is_online(&self, login: &str) -> bool {
        self.state
            .lock()
            .sessions
            .iter()
            .any(|p| p.login.as_deref() == Some(login))
    }

    fn claim_login(
        &self,
        session_id: &str,
        login: &str,
        on_claimed: &mut dyn FnMut(&[Arc<Message>]),
    ) -> Result<(), LoginError> {
        let mut state = self.state.lock();
        let taken = state
            .sessions
            .iter()
            .any(|p| p.id != session_id && p.login.as_deref() == Some(login));
        if taken {
            return Err(LoginError::Taken(login.to_string()));
        }

        match state.sessions.iter_mut().find(|p| p.id == session_id) {
            Some(Peer { login: Some(current), .. }) => {
                return Err(LoginError::AlreadyLoggedIn(current.clone()));
            }
            Some(peer) => peer.login = Some(login.to_string()),
            None => tracing::warn!(session_id, "Login claimed by unregistered session"),
        }

        // Still under the lock: replies queued here precede any broadcast.
        let replay = state.history.capacity();
        on_claimed(&state.history.last(replay));
        Ok(())
    }

    fn broadcast(&self, message: Message) -> usize {
        let mut state = self.state.lock();
        let message = Arc::new(message);
        state.history.append(Arc::clone(&message));

        let line = format!("{message}\r\n");
        let mut delivered = 0;
        for peer in &state.sessions {
            if peer.login.as_deref() == Some(message.author.as_str()) {
                continue;
            }
            if peer.outbound.send(line.clone()).is_ok() {
                delivered += 1;
            } else {
                tracing::debug!(session_id = %peer.id, "Dropped broadcast to closed session");
            }
        }
        delivered
    }
}
