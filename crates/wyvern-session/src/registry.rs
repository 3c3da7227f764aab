//! The session registry: which session IDs are live, in what state, and
//! which account each one is bound to.
//!
//! # Concurrency note
//!
//! `SessionRegistry` is NOT thread-safe by itself. It's a plain pair of
//! `HashMap`s; the connection manager wraps it in a single mutex and only
//! holds that lock for inserts, removals and lookups, never across I/O.

use std::collections::HashMap;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use wyvern_protocol::{AccountId, SessionId};

use crate::{SessionError, SessionState};

/// What the registry remembers about one live session.
#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub id: SessionId,
    pub state: SessionState,
    pub account: Option<AccountId>,
    pub opened_at: Instant,
}

/// Session counts by state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCounts {
    pub awaiting_handshake: usize,
    pub key_established: usize,
    pub authenticating: usize,
    pub active: usize,
    pub closing: usize,
    pub total: usize,
}

pub struct SessionRegistry {
    sessions: HashMap<SessionId, SessionRecord>,
    /// Index from account to its one live session.
    accounts: HashMap<AccountId, SessionId>,
    /// Released IDs and the instant they become reusable.
    quarantine: HashMap<SessionId, Instant>,
    quarantine_period: Duration,
}

impl SessionRegistry {
    pub fn new(quarantine_period: Duration) -> Self {
        Self {
            sessions: HashMap::new(),
            accounts: HashMap::new(),
            quarantine: HashMap::new(),
            quarantine_period,
        }
    }

    /// Registers a new session under a fresh random ID.
    ///
    /// The ID is neither live nor in quarantine.
    pub fn allocate(&mut self) -> SessionId {
        self.purge_quarantine(Instant::now());
        let mut rng = rand::rng();
        let id = loop {
            let candidate = SessionId(rng.random());
            if candidate.0 != 0
                && !self.sessions.contains_key(&candidate)
                && !self.quarantine.contains_key(&candidate)
            {
                break candidate;
            }
        };
        self.insert(id);
        id
    }

    /// Registers a session under a caller-chosen ID. Returns `false` if
    /// the ID is live or quarantined.
    pub fn try_register(&mut self, id: SessionId) -> bool {
        self.purge_quarantine(Instant::now());
        if self.sessions.contains_key(&id) || self.quarantine.contains_key(&id) {
            return false;
        }
        self.insert(id);
        true
    }

    fn insert(&mut self, id: SessionId) {
        self.sessions.insert(
            id,
            SessionRecord {
                id,
                state: SessionState::AwaitingHandshake,
                account: None,
                opened_at: Instant::now(),
            },
        );
    }

    /// Records a state change. Returns the previous state.
    pub fn set_state(
        &mut self,
        id: SessionId,
        state: SessionState,
    ) -> Result<SessionState, SessionError> {
        let record = self.sessions.get_mut(&id).ok_or(SessionError::NotFound(id))?;
        Ok(std::mem::replace(&mut record.state, state))
    }

    /// Binds an account to a session. One live session per account.
    ///
    /// # Errors
    /// - [`SessionError::AlreadyConnected`] if another session holds it
    /// - [`SessionError::NotFound`] if `id` isn't registered
    pub fn bind_account(&mut self, id: SessionId, account: AccountId) -> Result<(), SessionError> {
        if let Some(&holder) = self.accounts.get(&account) {
            if holder != id {
                return Err(SessionError::AlreadyConnected(account));
            }
        }
        let record = self.sessions.get_mut(&id).ok_or(SessionError::NotFound(id))?;
        record.account = Some(account);
        self.accounts.insert(account, id);
        Ok(())
    }

    /// Removes a session and puts its ID in quarantine.
    pub fn release(&mut self, id: SessionId) -> Option<SessionRecord> {
        let record = self.sessions.remove(&id)?;
        if let Some(account) = record.account {
            self.accounts.remove(&account);
        }
        self.quarantine
            .insert(id, Instant::now() + self.quarantine_period);
        tracing::debug!(session_id = %id, "session released");
        Some(record)
    }

    /// Drops quarantine entries whose period has elapsed.
    pub fn purge_quarantine(&mut self, now: Instant) {
        self.quarantine.retain(|_, until| *until > now);
    }

    pub fn is_quarantined(&self, id: SessionId) -> bool {
        self.quarantine
            .get(&id)
            .is_some_and(|until| *until > Instant::now())
    }

    pub fn get(&self, id: SessionId) -> Option<&SessionRecord> {
        self.sessions.get(&id)
    }

    pub fn session_for_account(&self, account: AccountId) -> Option<SessionId> {
        self.accounts.get(&account).copied()
    }

    /// IDs of every session currently in `state`.
    pub fn ids_in_state(&self, state: SessionState) -> Vec<SessionId> {
        self.sessions
            .values()
            .filter(|r| r.state == state)
            .map(|r| r.id)
            .collect()
    }

    pub fn ids(&self) -> Vec<SessionId> {
        self.sessions.keys().copied().collect()
    }

    pub fn counts(&self) -> SessionCounts {
        let mut counts = SessionCounts::default();
        for record in self.sessions.values() {
            match record.state {
                SessionState::AwaitingHandshake => counts.awaiting_handshake += 1,
                SessionState::KeyEstablished => counts.key_established += 1,
                SessionState::Authenticating => counts.authenticating += 1,
                SessionState::Active => counts.active += 1,
                SessionState::Closing | SessionState::Closed => counts.closing += 1,
            }
        }
        counts.total = self.sessions.len();
        counts
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    //! Quarantine behaviour is tested with tokio's paused clock, so
    //! `advance` moves `Instant::now()` without sleeping.

    use super::*;

    fn registry() -> SessionRegistry {
        SessionRegistry::new(Duration::from_secs(30))
    }

    #[test]
    fn test_allocate_ids_are_unique_and_nonzero() {
        let mut reg = registry();
        let ids: Vec<_> = (0..100).map(|_| reg.allocate()).collect();
        let unique: std::collections::HashSet<_> = ids.iter().collect();
        assert_eq!(unique.len(), 100);
        assert!(ids.iter().all(|id| id.0 != 0));
        assert_eq!(reg.len(), 100);
    }

    #[test]
    fn test_bind_account_second_session_already_connected() {
        let mut reg = registry();
        let a = reg.allocate();
        let b = reg.allocate();
        reg.bind_account(a, AccountId(42)).unwrap();

        let result = reg.bind_account(b, AccountId(42));
        assert!(matches!(result, Err(SessionError::AlreadyConnected(AccountId(42)))));
        assert_eq!(reg.session_for_account(AccountId(42)), Some(a));
    }

    #[test]
    fn test_release_frees_account_for_next_login() {
        let mut reg = registry();
        let a = reg.allocate();
        reg.bind_account(a, AccountId(42)).unwrap();
        reg.release(a);

        let b = reg.allocate();
        assert!(reg.bind_account(b, AccountId(42)).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_quarantines_id_until_period_elapses() {
        let mut reg = registry();
        let id = SessionId(7);
        assert!(reg.try_register(id));
        reg.release(id);

        assert!(reg.is_quarantined(id));
        assert!(!reg.try_register(id));

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(!reg.is_quarantined(id));
        assert!(reg.try_register(id));
    }

    #[test]
    fn test_try_register_live_id_refused() {
        let mut reg = registry();
        assert!(reg.try_register(SessionId(1)));
        assert!(!reg.try_register(SessionId(1)));
    }

    #[test]
    fn test_counts_by_state() {
        let mut reg = registry();
        let a = reg.allocate();
        let b = reg.allocate();
        let _c = reg.allocate();
        reg.set_state(a, SessionState::Active).unwrap();
        reg.set_state(b, SessionState::KeyEstablished).unwrap();

        let counts = reg.counts();
        assert_eq!(counts.total, 3);
        assert_eq!(counts.active, 1);
        assert_eq!(counts.key_established, 1);
        assert_eq!(counts.awaiting_handshake, 1);
        assert_eq!(reg.ids_in_state(SessionState::Active), vec![a]);
    }

    #[test]
    fn test_set_state_unknown_session_not_found() {
        let mut reg = registry();
        let result = reg.set_state(SessionId(9), SessionState::Active);
        assert!(matches!(result, Err(SessionError::NotFound(SessionId(9)))));
    }
}
