//! Server-side session bookkeeping for the request channel, per spec.md
//! §6: a 300-second session validity window and a 30-second heartbeat
//! interval, terminated after 3 consecutive missed heartbeats.

use std::collections::HashMap;

use parking_lot::Mutex;

use kos_core::clock::Clock;
use kos_core::error::{KError, KResult};
use kos_core::id::IdGenerator;

/// Session validity window, per spec.md §6.
pub const SESSION_VALIDITY_NANOS: u64 = 300 * 1_000_000_000;
/// Expected interval between client heartbeats, per spec.md §6.
pub const HEARTBEAT_INTERVAL_NANOS: u64 = 30 * 1_000_000_000;
/// Consecutive missed heartbeats before a session is terminated.
pub const MAX_MISSED_HEARTBEATS: u32 = 3;

/// Opaque session handle returned to an authenticated client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sess-{}", self.0)
    }
}

struct SessionState {
    entity_type: String,
    entity_id: String,
    created_at_nanos: u64,
    last_heartbeat_nanos: u64,
}

/// Tracks every live session for one request-channel server endpoint.
pub struct SessionTable {
    ids: IdGenerator,
    sessions: Mutex<HashMap<u64, SessionState>>,
    clock: Clock,
}

impl SessionTable {
    #[must_use]
    pub fn new(clock: Clock) -> Self {
        Self {
            ids: IdGenerator::new(),
            sessions: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Mints a new session for an authenticated client.
    pub fn create(&self, entity_type: impl Into<String>, entity_id: impl Into<String>) -> SessionId {
        let id = self.ids.next();
        let now = self.clock.now_nanos();
        self.sessions.lock().insert(
            id,
            SessionState {
                entity_type: entity_type.into(),
                entity_id: entity_id.into(),
                created_at_nanos: now,
                last_heartbeat_nanos: now,
            },
        );
        SessionId(id)
    }

    /// Validates that `session` is known, within its validity window, and
    /// hasn't missed too many heartbeats. Expires and evicts it otherwise.
    ///
    /// # Errors
    /// Returns [`KError::NotFound`] for an unknown session id,
    /// [`KError::Timeout`] for one that expired or went stale.
    pub fn validate(&self, session: SessionId) -> KResult<()> {
        let now = self.clock.now_nanos();
        let mut sessions = self.sessions.lock();
        let state = sessions.get(&session.0).ok_or(KError::NotFound)?;
        if now.saturating_sub(state.created_at_nanos) > SESSION_VALIDITY_NANOS {
            sessions.remove(&session.0);
            return Err(KError::Timeout);
        }
        if self.missed_heartbeats_locked(state, now) >= MAX_MISSED_HEARTBEATS {
            sessions.remove(&session.0);
            return Err(KError::Timeout);
        }
        Ok(())
    }

    fn missed_heartbeats_locked(&self, state: &SessionState, now: u64) -> u32 {
        let elapsed = now.saturating_sub(state.last_heartbeat_nanos);
        (elapsed / HEARTBEAT_INTERVAL_NANOS) as u32
    }

    /// Records a heartbeat from the client, resetting its missed-heartbeat
    /// count.
    ///
    /// # Errors
    /// Returns [`KError::NotFound`] for an unknown session id.
    pub fn heartbeat(&self, session: SessionId) -> KResult<()> {
        let now = self.clock.now_nanos();
        let mut sessions = self.sessions.lock();
        let state = sessions.get_mut(&session.0).ok_or(KError::NotFound)?;
        state.last_heartbeat_nanos = now;
        Ok(())
    }

    /// Terminates a session explicitly, e.g. on client disconnect.
    pub fn terminate(&self, session: SessionId) {
        self.sessions.lock().remove(&session.0);
    }

    /// Looks up the identity bound to `session`, for callers that need to
    /// attribute a request to an entity.
    #[must_use]
    pub fn identity_of(&self, session: SessionId) -> Option<(String, String)> {
        self.sessions
            .lock()
            .get(&session.0)
            .map(|s| (s.entity_type.clone(), s.entity_id.clone()))
    }

    /// Drops every session that has exceeded its validity window or missed
    /// heartbeat budget, for a periodic sweep.
    pub fn sweep_expired(&self) {
        let now = self.clock.now_nanos();
        self.sessions.lock().retain(|_, state| {
            now.saturating_sub(state.created_at_nanos) <= SESSION_VALIDITY_NANOS
                && (now.saturating_sub(state.last_heartbeat_nanos) / HEARTBEAT_INTERVAL_NANOS)
                    < u64::from(MAX_MISSED_HEARTBEATS)
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn fresh_session_validates() {
        let table = SessionTable::new(Clock::new());
        let session = table.create("user", "alice");
        assert!(table.validate(session).is_ok());
    }

    #[test]
    fn unknown_session_is_not_found() {
        let table = SessionTable::new(Clock::new());
        let err = table.validate(SessionId(999)).unwrap_err();
        assert_eq!(err, KError::NotFound);
    }

    #[test]
    fn session_expires_after_validity_window() {
        let clock = Clock::new();
        let table = SessionTable::new(clock);
        let session = table.create("user", "alice");
        table.clock.advance_for_test(Duration::from_secs(301));
        let err = table.validate(session).unwrap_err();
        assert_eq!(err, KError::Timeout);
    }

    #[test]
    fn session_expires_after_three_missed_heartbeats() {
        let table = SessionTable::new(Clock::new());
        let session = table.create("user", "alice");
        table.clock.advance_for_test(Duration::from_secs(91));
        let err = table.validate(session).unwrap_err();
        assert_eq!(err, KError::Timeout);
    }

    #[test]
    fn heartbeat_resets_the_miss_counter() {
        let table = SessionTable::new(Clock::new());
        let session = table.create("user", "alice");
        table.clock.advance_for_test(Duration::from_secs(45));
        table.heartbeat(session).unwrap();
        assert!(table.validate(session).is_ok());
    }

    #[test]
    fn terminate_evicts_the_session() {
        let table = SessionTable::new(Clock::new());
        let session = table.create("user", "alice");
        table.terminate(session);
        assert_eq!(table.validate(session).unwrap_err(), KError::NotFound);
    }
}
