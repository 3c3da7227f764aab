//! The connection manager: the one shared structure every session task
//! touches.
//!
//! It owns the session registry, the capacity semaphore, each session's
//! outbound queue and close signal, and the event stream observers
//! subscribe to. Everything sits behind a single `std::sync::Mutex` that
//! is only held for map inserts, removals and lookups, never across an
//! `.await`.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, broadcast, mpsc, watch};
use wyvern_protocol::{AccountId, CloseReason, Opcode, SessionId};
use wyvern_session::{SessionCounts, SessionError, SessionRegistry, SessionState};
use wyvern_transport::ConnectionId;

const EVENT_CAPACITY: usize = 256;

/// Lifecycle events for observers (metrics, admin consoles, chat bots).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Opened {
        session_id: SessionId,
        conn_id: ConnectionId,
        peer: Option<SocketAddr>,
    },
    StateChanged {
        session_id: SessionId,
        from: SessionState,
        to: SessionState,
    },
    Authenticated {
        session_id: SessionId,
        account_id: AccountId,
    },
    Closed {
        session_id: SessionId,
        reason: CloseReason,
        account_id: Option<AccountId>,
    },
}

/// A packet queued for a session by someone other than its own task.
#[derive(Debug, Clone)]
pub(crate) struct Outbound {
    pub(crate) opcode: Opcode,
    pub(crate) body: Bytes,
}

/// The receiving ends a session task listens on.
pub(crate) struct SessionLinks {
    pub(crate) outbound: mpsc::Receiver<Outbound>,
    pub(crate) close: watch::Receiver<Option<CloseReason>>,
}

struct Link {
    outbound: mpsc::Sender<Outbound>,
    close: watch::Sender<Option<CloseReason>>,
}

struct Registry {
    sessions: SessionRegistry,
    links: HashMap<SessionId, Link>,
}

struct Inner {
    registry: Mutex<Registry>,
    capacity: Arc<Semaphore>,
    max_sessions: usize,
    outbound_depth: usize,
    max_body_len: usize,
    events: broadcast::Sender<SessionEvent>,
    shutting_down: AtomicBool,
}

/// Cheap to clone; every clone is the same manager.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    /// `max_body_len` is the largest body a session can seal into one
    /// frame; larger broadcasts are refused outright.
    pub fn new(
        max_sessions: usize,
        id_quarantine: Duration,
        outbound_depth: usize,
        max_body_len: usize,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                registry: Mutex::new(Registry {
                    sessions: SessionRegistry::new(id_quarantine),
                    links: HashMap::new(),
                }),
                capacity: Arc::new(Semaphore::new(max_sessions)),
                max_sessions,
                outbound_depth: outbound_depth.max(1),
                max_body_len,
                events,
                shutting_down: AtomicBool::new(false),
            }),
        }
    }

    /// Subscribes to [`SessionEvent`]s. Slow subscribers lose the oldest
    /// events rather than slowing sessions down.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    pub fn max_sessions(&self) -> usize {
        self.inner.max_sessions
    }

    /// Largest body [`broadcast`](Self::broadcast) and
    /// [`send_to`](Self::send_to) accept.
    pub fn max_body_len(&self) -> usize {
        self.inner.max_body_len
    }

    /// Session counts by state (the server status report).
    pub fn stats(&self) -> SessionCounts {
        self.lock().sessions.counts()
    }

    pub fn len(&self) -> usize {
        self.lock().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().sessions.is_empty()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutting_down.load(Ordering::Acquire)
    }

    /// Queues an application packet for every `Active` session.
    ///
    /// Sessions whose queue is full miss this packet. A body over
    /// [`max_body_len`](Self::max_body_len) goes nowhere. Returns how many
    /// sessions it was queued for.
    pub fn broadcast(&self, opcode: Opcode, body: impl Into<Bytes>) -> usize {
        if opcode.is_reserved() {
            tracing::warn!(%opcode, "refusing to broadcast a reserved opcode");
            return 0;
        }
        let body = body.into();
        if !self.fits(opcode, &body) {
            return 0;
        }
        let registry = self.lock();
        let mut queued = 0;
        for id in registry.sessions.ids_in_state(SessionState::Active) {
            let Some(link) = registry.links.get(&id) else {
                continue;
            };
            let packet = Outbound {
                opcode,
                body: body.clone(),
            };
            match link.outbound.try_send(packet) {
                Ok(()) => queued += 1,
                Err(_) => {
                    tracing::debug!(session_id = %id, %opcode, "outbound queue full, dropped")
                }
            }
        }
        queued
    }

    /// Queues an application packet for one `Active` session.
    pub fn send_to(&self, session_id: SessionId, opcode: Opcode, body: impl Into<Bytes>) -> bool {
        if opcode.is_reserved() {
            return false;
        }
        let body = body.into();
        if !self.fits(opcode, &body) {
            return false;
        }
        let registry = self.lock();
        let active = registry
            .sessions
            .get(session_id)
            .is_some_and(|r| r.state == SessionState::Active);
        active
            && registry.links.get(&session_id).is_some_and(|link| {
                link.outbound.try_send(Outbound { opcode, body }).is_ok()
            })
    }

    /// Asks one session to close with [`CloseReason::Kicked`].
    pub fn kick(&self, session_id: SessionId) -> bool {
        self.request_close(session_id, CloseReason::Kicked)
    }

    /// Kicks whichever session the account is logged in on.
    pub fn kick_account(&self, account_id: AccountId) -> bool {
        let session = self.lock().sessions.session_for_account(account_id);
        session.is_some_and(|id| self.kick(id))
    }

    /// Asks every session to close with [`CloseReason::ServerShutdown`].
    /// Sessions opened afterwards close immediately.
    pub fn shutdown(&self) {
        self.inner.shutting_down.store(true, Ordering::Release);
        let registry = self.lock();
        for link in registry.links.values() {
            link.close.send_replace(Some(CloseReason::ServerShutdown));
        }
        tracing::info!(sessions = registry.links.len(), "closing all sessions");
    }

    // -----------------------------------------------------------------------
    // Crate-internal: used by the accept loop and session tasks
    // -----------------------------------------------------------------------

    /// Claims a session slot, or `None` at capacity.
    pub(crate) fn try_acquire(&self) -> Option<OwnedSemaphorePermit> {
        Arc::clone(&self.inner.capacity).try_acquire_owned().ok()
    }

    /// Registers a new session and returns its ID plus the channels its
    /// task listens on.
    pub(crate) fn open(
        &self,
        conn_id: ConnectionId,
        peer: Option<SocketAddr>,
    ) -> (SessionId, SessionLinks) {
        let (out_tx, out_rx) = mpsc::channel(self.inner.outbound_depth);
        let initial = self.is_shutting_down().then_some(CloseReason::ServerShutdown);
        let (close_tx, close_rx) = watch::channel(initial);

        let session_id = {
            let mut registry = self.lock();
            let id = registry.sessions.allocate();
            registry.links.insert(
                id,
                Link {
                    outbound: out_tx,
                    close: close_tx,
                },
            );
            id
        };

        self.emit(SessionEvent::Opened {
            session_id,
            conn_id,
            peer,
        });
        (
            session_id,
            SessionLinks {
                outbound: out_rx,
                close: close_rx,
            },
        )
    }

    /// Mirrors a session's state into the registry.
    pub(crate) fn set_state(&self, session_id: SessionId, to: SessionState) {
        let from = self.lock().sessions.set_state(session_id, to);
        match from {
            Ok(from) if from != to => self.emit(SessionEvent::StateChanged {
                session_id,
                from,
                to,
            }),
            Ok(_) => {}
            Err(e) => tracing::debug!(error = %e, "state update for unknown session"),
        }
    }

    /// Binds an account, enforcing one live session per account.
    pub(crate) fn bind_account(
        &self,
        session_id: SessionId,
        account_id: AccountId,
    ) -> Result<(), SessionError> {
        self.lock().sessions.bind_account(session_id, account_id)?;
        self.emit(SessionEvent::Authenticated {
            session_id,
            account_id,
        });
        Ok(())
    }

    /// Forgets a session. Its ID goes into quarantine.
    pub(crate) fn release(&self, session_id: SessionId, reason: CloseReason) {
        let record = {
            let mut registry = self.lock();
            registry.links.remove(&session_id);
            registry.sessions.release(session_id)
        };
        if let Some(record) = record {
            self.emit(SessionEvent::Closed {
                session_id,
                reason,
                account_id: record.account,
            });
        }
    }

    fn request_close(&self, session_id: SessionId, reason: CloseReason) -> bool {
        let registry = self.lock();
        match registry.links.get(&session_id) {
            Some(link) => {
                link.close.send_replace(Some(reason));
                true
            }
            None => false,
        }
    }

    fn fits(&self, opcode: Opcode, body: &Bytes) -> bool {
        let fits = body.len() <= self.inner.max_body_len;
        if !fits {
            tracing::warn!(
                %opcode,
                len = body.len(),
                max = self.inner.max_body_len,
                "refusing to queue a body too large for one frame"
            );
        }
        fits
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.inner.events.send(event);
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        // Every critical section leaves the maps consistent, so a poisoned
        // lock is still usable.
        self.inner
            .registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("max_sessions", &self.inner.max_sessions)
            .field("stats", &self.stats())
            .finish()
    }
}

// =========================================================================
// Tests
// =========================================================================
