//! Session registry and bounded conversation memory
//!
//! A `Session` binds one authenticated identity to an ordered conversation
//! history, capped at a configurable number of turns with FIFO eviction.
//! The `SessionStore` is the only cross-request shared mutable state in the
//! gateway; every operation on it is atomic behind a single mutex, so the
//! orchestrator never needs external locking.
//!
//! Within a session, turns are strictly serialized through the
//! `try_acquire`/`release` pair: at most one orchestration may hold a
//! session in flight at any instant. `release` must run on every exit path
//! of an orchestration, success or failure.

use chrono::{DateTime, Utc};
use sdk::errors::GatewayError;
use sdk::types::Turn;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

/// Per-identity conversation state
#[derive(Debug, Clone)]
pub struct Session {
    /// Opaque unique identifier, never reused
    pub id: String,

    /// Stable identity the session is keyed by
    pub subject: String,

    /// SHA-256 of the validated credential; immutable for session lifetime
    pub credential_hash: String,

    /// Ordered conversation history, oldest first
    history: Vec<Turn>,

    /// Whether an orchestration currently owns this session
    in_flight: bool,

    /// Creation time
    pub created_at: DateTime<Utc>,

    /// Last successful authentication or appended turn
    pub last_active_at: DateTime<Utc>,
}

impl Session {
    fn new(subject: &str, credential_hash: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            subject: subject.to_string(),
            credential_hash: credential_hash.to_string(),
            history: Vec::new(),
            in_flight: false,
            created_at: now,
            last_active_at: now,
        }
    }

    /// Conversation history, oldest first
    pub fn history(&self) -> &[Turn] {
        &self.history
    }

    /// Whether an orchestration currently owns this session
    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }
}

/// Read-only view of a session for status reporting
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub id: String,
    pub credential_hash: String,
    pub turn_count: usize,
    pub in_flight: bool,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
}

impl From<&Session> for SessionSnapshot {
    fn from(session: &Session) -> Self {
        Self {
            id: session.id.clone(),
            credential_hash: session.credential_hash.clone(),
            turn_count: session.history.len(),
            in_flight: session.in_flight,
            created_at: session.created_at,
            last_active_at: session.last_active_at,
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    /// Sessions keyed by id
    sessions: HashMap<String, Session>,

    /// Subject identity to session id
    by_subject: HashMap<String, String>,
}

/// Concurrency-safe session registry
///
/// Callers hold an explicit `Arc<SessionStore>` handle; there is no
/// ambient global state.
#[derive(Debug)]
pub struct SessionStore {
    max_history_turns: usize,
    inner: Mutex<Inner>,
}

impl SessionStore {
    /// Create a new store with the given history cap
    pub fn new(max_history_turns: usize) -> Self {
        Self {
            max_history_turns,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Resolve the session for a subject, creating it on first contact
    ///
    /// Refreshes `last_active_at` and returns the session id. The
    /// credential hash is fixed at creation and not rewritten on later
    /// authentications.
    pub fn resolve(&self, subject: &str, credential_hash: &str) -> String {
        let mut inner = self.lock();

        if let Some(id) = inner.by_subject.get(subject).cloned() {
            if let Some(session) = inner.sessions.get_mut(&id) {
                session.last_active_at = Utc::now();
                return id;
            }
        }

        let session = Session::new(subject, credential_hash);
        let id = session.id.clone();
        debug!("Created session {} for subject {}", id, subject);
        inner.by_subject.insert(subject.to_string(), id.clone());
        inner.sessions.insert(id.clone(), session);
        id
    }

    /// Get a snapshot of a session
    pub fn get(&self, session_id: &str) -> Option<SessionSnapshot> {
        self.lock().sessions.get(session_id).map(SessionSnapshot::from)
    }

    /// Clone a session's history for use as generation context
    pub fn history(&self, session_id: &str) -> Option<Vec<Turn>> {
        self.lock()
            .sessions
            .get(session_id)
            .map(|s| s.history.clone())
    }

    /// Atomically mark a session in flight
    ///
    /// Returns false when the session is unknown or already owned by
    /// another orchestration; the caller must reject the new turn rather
    /// than interleave.
    pub fn try_acquire(&self, session_id: &str) -> bool {
        let mut inner = self.lock();
        match inner.sessions.get_mut(session_id) {
            Some(session) if !session.in_flight => {
                session.in_flight = true;
                true
            }
            _ => false,
        }
    }

    /// Release a session after orchestration
    ///
    /// Safe to call for unknown sessions (the session may have been
    /// explicitly destroyed while a failed orchestration unwound).
    pub fn release(&self, session_id: &str) {
        if let Some(session) = self.lock().sessions.get_mut(session_id) {
            session.in_flight = false;
        }
    }

    /// Append a finalized turn, trimming history to the cap
    ///
    /// Atomic: the push, FIFO trim and `last_active_at` refresh happen
    /// under one lock acquisition.
    pub fn append_turn(
        &self,
        session_id: &str,
        turn: Turn,
    ) -> Result<SessionSnapshot, GatewayError> {
        let mut inner = self.lock();
        let session = inner
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| GatewayError::SessionNotFound(session_id.to_string()))?;

        session.history.push(turn);
        if session.history.len() > self.max_history_turns {
            let excess = session.history.len() - self.max_history_turns;
            session.history.drain(..excess);
        }
        session.last_active_at = Utc::now();

        Ok(SessionSnapshot::from(&*session))
    }

    /// Empty a session's history, leaving its identity intact
    pub fn clear(&self, session_id: &str) -> Result<(), GatewayError> {
        let mut inner = self.lock();
        let session = inner
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| GatewayError::SessionNotFound(session_id.to_string()))?;

        session.history.clear();
        session.last_active_at = Utc::now();
        debug!("Cleared history for session {}", session_id);
        Ok(())
    }

    /// Evict sessions idle longer than `threshold`
    ///
    /// In-flight sessions are never evicted regardless of idle time.
    /// Returns the number of sessions removed.
    pub fn evict_idle(&self, threshold: Duration) -> usize {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(threshold).unwrap_or(chrono::Duration::zero());

        let mut inner = self.lock();
        let expired: Vec<(String, String)> = inner
            .sessions
            .values()
            .filter(|s| !s.in_flight && s.last_active_at < cutoff)
            .map(|s| (s.id.clone(), s.subject.clone()))
            .collect();

        for (id, subject) in &expired {
            inner.sessions.remove(id);
            inner.by_subject.remove(subject);
        }

        if !expired.is_empty() {
            info!("Evicted {} idle session(s)", expired.len());
        }
        expired.len()
    }

    /// Number of live sessions
    pub fn len(&self) -> usize {
        self.lock().sessions.len()
    }

    /// Whether the store holds no sessions
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A poisoned registry mutex means a panic mid-update; propagating
        // the poison here would wedge every session, so take the data as-is.
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
