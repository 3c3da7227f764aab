//! Opcode routing to game-logic handlers.
//!
//! Handlers are registered once at startup and the table is read-only
//! afterwards, so every session shares one [`Dispatcher`] behind an `Arc`
//! with no locking.
//!
//! Dispatch never takes a session down on its own account:
//!
//! | Handler does...          | Client sees                 | Session |
//! |--------------------------|-----------------------------|---------|
//! | `Ok(Some(body))`         | response on the same opcode | open    |
//! | `Ok(None)`               | nothing                     | open    |
//! | `Err(HandlerError)`      | `ERROR_RESPONSE`            | open    |
//! | nothing (not registered) | nothing, logged             | open    |
//! | panics                   | `CLOSE` (internal error)    | closed  |

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::panic::{AssertUnwindSafe, catch_unwind};

use bytes::Bytes;
use wyvern_protocol::{AccountId, Opcode, ProtocolError, SessionId};
use wyvern_session::{AccountIdentity, SessionCounts};

use crate::manager::ConnectionManager;

/// What a handler returns: an optional response body, or a domain error.
pub type HandlerResult = Result<Option<Bytes>, HandlerError>;

/// A domain-level failure. Its message is sent to the client in an
/// `ERROR_RESPONSE`, so keep it player-safe.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<ProtocolError> for HandlerError {
    fn from(e: ProtocolError) -> Self {
        Self::new(format!("bad request: {e}"))
    }
}

/// Configuration errors from building the handler table.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// Two handlers for one opcode. Routing would be ambiguous.
    #[error("opcode {0} already has a handler")]
    Duplicate(Opcode),

    /// Reserved opcodes belong to the session layer.
    #[error("opcode {0} is reserved for the session layer")]
    Reserved(Opcode),
}

// ---------------------------------------------------------------------------
// SessionContext
// ---------------------------------------------------------------------------

/// The handler's view of the session it's serving.
///
/// Read-only identity plus a few server-wide operations. Handlers never see
/// the session's key, counters or state.
pub struct SessionContext {
    session_id: SessionId,
    account: AccountIdentity,
    peer: Option<SocketAddr>,
    manager: ConnectionManager,
}

impl SessionContext {
    pub(crate) fn new(
        session_id: SessionId,
        account: AccountIdentity,
        peer: Option<SocketAddr>,
        manager: ConnectionManager,
    ) -> Self {
        Self {
            session_id,
            account,
            peer,
            manager,
        }
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn account_id(&self) -> AccountId {
        self.account.account_id
    }

    pub fn account_name(&self) -> &str {
        &self.account.name
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Queues a packet to every active session, this one included.
    /// Returns how many sessions it was queued for.
    pub fn broadcast(&self, opcode: Opcode, body: impl Into<Bytes>) -> usize {
        self.manager.broadcast(opcode, body)
    }

    /// Queues a packet to one other session.
    pub fn send_to(&self, session_id: SessionId, opcode: Opcode, body: impl Into<Bytes>) -> bool {
        self.manager.send_to(session_id, opcode, body)
    }

    pub fn server_stats(&self) -> SessionCounts {
        self.manager.stats()
    }

    /// Largest response or broadcast body that fits in one frame.
    pub fn max_body_len(&self) -> usize {
        self.manager.max_body_len()
    }
}

impl fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionContext")
            .field("session_id", &self.session_id)
            .field("account", &self.account)
            .field("peer", &self.peer)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Handler
// ---------------------------------------------------------------------------

/// Game logic for one opcode.
///
/// Handlers are synchronous and must not block: they run inline on the
/// session's task between two packet reads. Closures with the right
/// signature implement this automatically.
pub trait Handler: Send + Sync + 'static {
    fn handle(&self, ctx: &SessionContext, body: Bytes) -> HandlerResult;
}

impl<F> Handler for F
where
    F: Fn(&SessionContext, Bytes) -> HandlerResult + Send + Sync + 'static,
{
    fn handle(&self, ctx: &SessionContext, body: Bytes) -> HandlerResult {
        self(ctx, body)
    }
}

/// Result of routing one packet.
#[derive(Debug)]
pub enum Dispatch {
    /// The handler ran. `None` means it had nothing to say back.
    Response(Option<Bytes>),
    /// No handler for this opcode.
    Unhandled,
    /// The handler returned a domain error.
    Failed(HandlerError),
    /// The handler panicked; the panic stopped here.
    Panicked,
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct Dispatcher {
    handlers: HashMap<Opcode, Box<dyn Handler>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `opcode`.
    ///
    /// # Errors
    /// - [`DispatchError::Reserved`] for opcodes below `FIRST_APPLICATION`
    /// - [`DispatchError::Duplicate`] if the opcode already has a handler
    pub fn register(&mut self, opcode: Opcode, handler: impl Handler) -> Result<(), DispatchError> {
        if opcode.is_reserved() {
            return Err(DispatchError::Reserved(opcode));
        }
        if self.handlers.contains_key(&opcode) {
            return Err(DispatchError::Duplicate(opcode));
        }
        self.handlers.insert(opcode, Box::new(handler));
        Ok(())
    }

    /// Builder-style [`register`](Self::register).
    pub fn with(mut self, opcode: Opcode, handler: impl Handler) -> Result<Self, DispatchError> {
        self.register(opcode, handler)?;
        Ok(self)
    }

    pub fn is_registered(&self, opcode: Opcode) -> bool {
        self.handlers.contains_key(&opcode)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Routes one decrypted body to its handler, exactly once.
    pub fn dispatch(&self, ctx: &SessionContext, opcode: Opcode, body: Bytes) -> Dispatch {
        let Some(handler) = self.handlers.get(&opcode) else {
            tracing::debug!(session_id = %ctx.session_id, %opcode, "unhandled opcode");
            return Dispatch::Unhandled;
        };

        match catch_unwind(AssertUnwindSafe(|| handler.handle(ctx, body))) {
            Ok(Ok(response)) => Dispatch::Response(response),
            Ok(Err(e)) => {
                tracing::debug!(session_id = %ctx.session_id, %opcode, error = %e, "handler failed");
                Dispatch::Failed(e)
            }
            Err(_) => {
                tracing::error!(session_id = %ctx.session_id, %opcode, "handler panicked");
                Dispatch::Panicked
            }
        }
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut opcodes: Vec<_> = self.handlers.keys().copied().collect();
        opcodes.sort();
        f.debug_struct("Dispatcher").field("opcodes", &opcodes).finish()
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    fn ctx() -> SessionContext {
        SessionContext::new(
            SessionId(1),
            AccountIdentity {
                account_id: AccountId(42),
                name: "alice".into(),
            },
            None,
            ConnectionManager::new(4, Duration::from_secs(1), 8, 1024),
        )
    }

    fn echo(_: &SessionContext, body: Bytes) -> HandlerResult {
        Ok(Some(body))
    }

    #[test]
    fn test_register_duplicate_opcode_rejected() {
        let mut d = Dispatcher::new();
        d.register(Opcode(0x0100), echo).unwrap();
        let result = d.register(Opcode(0x0100), echo);
        assert!(matches!(result, Err(DispatchError::Duplicate(Opcode(0x0100)))));
        assert_eq!(d.len(), 1);
    }

    #[test]
    fn test_register_reserved_opcode_rejected() {
        let mut d = Dispatcher::new();
        let result = d.register(Opcode(0x0010), echo);
        assert!(matches!(result, Err(DispatchError::Reserved(_))));
        assert!(d.is_empty());
    }

    #[test]
    fn test_dispatch_registered_opcode_invokes_handler_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let d = Dispatcher::new()
            .with(Opcode(0x0100), move |_: &SessionContext, _: Bytes| -> HandlerResult {
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(None)
            })
            .unwrap()
            .with(Opcode(0x0101), echo)
            .unwrap();

        assert!(matches!(
            d.dispatch(&ctx(), Opcode(0x0100), Bytes::new()),
            Dispatch::Response(None)
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dispatch_unregistered_opcode_is_unhandled() {
        let d = Dispatcher::new();
        assert!(matches!(
            d.dispatch(&ctx(), Opcode(0x0999), Bytes::new()),
            Dispatch::Unhandled
        ));
    }

    #[test]
    fn test_dispatch_handler_error_is_failed() {
        let d = Dispatcher::new()
            .with(Opcode(0x0100), |_: &SessionContext, _: Bytes| -> HandlerResult {
                Err(HandlerError::new("not enough gold"))
            })
            .unwrap();
        match d.dispatch(&ctx(), Opcode(0x0100), Bytes::new()) {
            Dispatch::Failed(e) => assert_eq!(e.message(), "not enough gold"),
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[test]
    fn test_dispatch_handler_panic_is_contained() {
        let d = Dispatcher::new()
            .with(Opcode(0x0100), |_: &SessionContext, _: Bytes| -> HandlerResult {
                panic!("bug in game logic")
            })
            .unwrap()
            .with(Opcode(0x0101), echo)
            .unwrap();

        assert!(matches!(
            d.dispatch(&ctx(), Opcode(0x0100), Bytes::new()),
            Dispatch::Panicked
        ));
        // The table is still usable afterwards.
        match d.dispatch(&ctx(), Opcode(0x0101), Bytes::from_static(b"hi")) {
            Dispatch::Response(Some(body)) => assert_eq!(&body[..], b"hi"),
            other => panic!("expected echo, got {other:?}"),
        }
    }

    #[test]
    fn test_handler_error_from_protocol_error() {
        let e: HandlerError = ProtocolError::InvalidMessage("x".into()).into();
        assert!(e.message().starts_with("bad request"));
    }
}
