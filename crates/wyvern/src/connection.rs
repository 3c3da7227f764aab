//! Per-connection driver: from accept to close.
//!
//! Each accepted connection gets its own Tokio task running
//! [`handle_connection`]. The flow is:
//!
//!   1. Register the session, send `HANDSHAKE_INIT`
//!   2. Loop: read frames → [`Session::handle_packet`] → act on the [`Step`].
//!      Queued broadcasts, close requests and the session's deadline are
//!      watched alongside.
//!   3. Close: drain, send the close notice, release the slot
//!
//! The [`Session`] does the protocol thinking; this module only moves bytes
//! and waits.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{ReadHalf, WriteHalf};
use tokio::sync::{OwnedSemaphorePermit, watch};
use tokio::time::Instant;
use tokio_util::codec::{FramedRead, FramedWrite};
use wyvern_protocol::{
    CloseNotice, CloseReason, Codec, ErrorCode, FrameCodec, JsonCodec, Opcode, Packet,
    ProtocolError, SessionId, opcodes,
};
use wyvern_session::{AccountIdentity, AccountStore, Session, SessionError, SessionState, Step};
use wyvern_transport::Connection;

use crate::dispatcher::{Dispatch, SessionContext};
use crate::manager::{ConnectionManager, SessionLinks};
use crate::server::ServerState;

type Reader<C> = FramedRead<ReadHalf<C>, FrameCodec>;
type Writer<C> = FramedWrite<WriteHalf<C>, FrameCodec>;

/// How long to wait for the next deadline when no timer applies.
const NO_DEADLINE: Duration = Duration::from_secs(3600);

/// Drop guard that releases the session slot when the task exits.
///
/// Runs on every exit path, including a panic unwinding out of the task.
/// The registry lock is synchronous, so no cleanup task is needed.
struct SessionGuard {
    manager: ConnectionManager,
    session_id: SessionId,
    reason: CloseReason,
    permit: Option<OwnedSemaphorePermit>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        // Slot first, so observers of `Closed` can connect again at once.
        drop(self.permit.take());
        self.manager.release(self.session_id, self.reason);
    }
}

/// Handles a single connection from accept to close.
pub(crate) async fn handle_connection<C, A>(
    conn: C,
    state: Arc<ServerState<A>>,
    permit: OwnedSemaphorePermit,
) where
    C: Connection,
    A: AccountStore,
{
    let conn_id = conn.id();
    let peer = conn.peer_addr();
    let (session_id, mut links) = state.manager.open(conn_id, peer);
    let mut guard = SessionGuard {
        manager: state.manager.clone(),
        session_id,
        reason: CloseReason::InternalError,
        permit: Some(permit),
    };
    tracing::info!(%conn_id, %session_id, ?peer, "session opened");

    let (read, write) = tokio::io::split(conn);
    let mut reader = FramedRead::new(read, state.codec.clone());
    let mut writer = FramedWrite::new(write, state.codec.clone());
    let mut session = Session::new(
        session_id,
        state.session_config.clone(),
        Arc::clone(&state.crypto),
    );

    let outcome = run_session(&state, &mut session, &mut reader, &mut writer, &mut links, peer).await;
    let (reason, peer_gone) = match outcome {
        Ok(Some(reason)) => (reason, false),
        Ok(None) => (CloseReason::ClientLogout, true),
        Err(e) => {
            let reason = e.close_reason();
            if e.is_security_relevant() {
                tracing::warn!(%session_id, ?peer, error = %e, "closing session after protocol violation");
            } else {
                tracing::info!(%session_id, error = %e, "closing session");
            }
            (reason, matches!(e, SessionError::Protocol(ProtocolError::Io(_))))
        }
    };
    guard.reason = reason;

    close_session(&state, &mut session, &mut writer, &mut links, reason, peer_gone).await;
    tracing::info!(
        %session_id,
        account_id = ?session.account_id(),
        %reason,
        "session closed"
    );
    // guard drops here → slot and ID released.
}

/// Runs the session until something ends it.
///
/// `Ok(Some(reason))` for an orderly close, `Ok(None)` when the peer closed
/// the stream, `Err` for anything fatal.
async fn run_session<C, A>(
    state: &ServerState<A>,
    session: &mut Session,
    reader: &mut Reader<C>,
    writer: &mut Writer<C>,
    links: &mut SessionLinks,
    peer: Option<SocketAddr>,
) -> Result<Option<CloseReason>, SessionError>
where
    C: Connection,
    A: AccountStore,
{
    writer.send(session.start()?).await?;

    loop {
        let deadline = session
            .deadline()
            .unwrap_or_else(|| Instant::now() + NO_DEADLINE);

        tokio::select! {
            frame = reader.next() => {
                let Some(frame) = frame else {
                    return Ok(None);
                };
                let step = session.handle_packet(frame?)?;
                if let Some(reason) = apply_step(state, session, writer, links, peer, step).await? {
                    return Ok(Some(reason));
                }
                state.manager.set_state(session.id(), session.state());
            }
            Some(out) = links.outbound.recv() => {
                if session.state() == SessionState::Active {
                    match session.seal(out.opcode, &out.body) {
                        Ok(packet) => writer.send(packet).await?,
                        Err(e @ SessionError::BodyTooLarge { .. }) => {
                            tracing::warn!(session_id = %session.id(), opcode = %out.opcode, error = %e, "dropping queued packet");
                        }
                        Err(e) => return Err(e),
                    }
                }
            }
            reason = requested_close(&mut links.close) => return Ok(Some(reason)),
            _ = tokio::time::sleep_until(deadline) => {
                session.check_timeouts(Instant::now())?;
            }
        }
    }
}

/// Carries out one [`Step`]. Returns a close reason if the step ends the
/// session.
async fn apply_step<C, A>(
    state: &ServerState<A>,
    session: &mut Session,
    writer: &mut Writer<C>,
    links: &mut SessionLinks,
    peer: Option<SocketAddr>,
    step: Step,
) -> Result<Option<CloseReason>, SessionError>
where
    C: Connection,
    A: AccountStore,
{
    match step {
        Step::Idle => {}
        Step::Send(packet) => writer.send(packet).await?,
        Step::Close(reason) => return Ok(Some(reason)),

        Step::Authenticate(request) => {
            state.manager.set_state(session.id(), SessionState::Authenticating);
            let verdict = match authenticate(state, session, &request.user, &request.cred, links).await {
                AuthOutcome::Verdict(v) => v,
                AuthOutcome::TimedOut => return Err(SessionError::AuthTimeout),
                AuthOutcome::Interrupted(reason) => return Ok(Some(reason)),
            };
            let reply = session.complete_auth(verdict)?;
            // Visible to broadcasts before the client hears it is logged in.
            state.manager.set_state(session.id(), session.state());
            writer.send(reply).await?;
        }

        Step::Dispatch { opcode, body } => {
            let Some(account) = session.account().cloned() else {
                return Err(SessionError::UnexpectedOpcode {
                    state: session.state(),
                    opcode,
                });
            };
            let ctx = SessionContext::new(session.id(), account, peer, state.manager.clone());
            match state.dispatcher.dispatch(&ctx, opcode, body) {
                Dispatch::Response(Some(response)) => {
                    let packet = match session.seal(opcode, &response) {
                        Err(SessionError::BodyTooLarge { len, max }) => {
                            tracing::warn!(session_id = %session.id(), %opcode, len, max, "handler response too large");
                            handler_failure(session, opcode, "response too large")?
                        }
                        sealed => sealed?,
                    };
                    writer.send(packet).await?;
                }
                Dispatch::Response(None) | Dispatch::Unhandled => {}
                Dispatch::Failed(e) => {
                    writer.send(handler_failure(session, opcode, e.message())?).await?;
                }
                Dispatch::Panicked => return Ok(Some(CloseReason::InternalError)),
            }
        }
    }
    Ok(None)
}

/// `ERROR_RESPONSE{HandlerFailed}`. Falls back to a generic message when
/// the handler's own would not fit in a frame.
fn handler_failure(
    session: &mut Session,
    opcode: Opcode,
    message: &str,
) -> Result<Packet, SessionError> {
    match session.error_response(opcode, ErrorCode::HandlerFailed, message) {
        Err(SessionError::BodyTooLarge { .. }) => {
            session.error_response(opcode, ErrorCode::HandlerFailed, "handler failed")
        }
        other => other,
    }
}

enum AuthOutcome {
    Verdict(Result<AccountIdentity, SessionError>),
    /// The auth deadline passed before the store answered.
    TimedOut,
    /// Kicked or shut down while the store was thinking.
    Interrupted(CloseReason),
}

/// The session's one suspension point outside I/O: the account-store
/// lookup, bounded by the auth deadline.
async fn authenticate<A: AccountStore>(
    state: &ServerState<A>,
    session: &Session,
    user: &str,
    credential: &str,
    links: &mut SessionLinks,
) -> AuthOutcome {
    let deadline = session
        .deadline()
        .unwrap_or_else(|| Instant::now() + NO_DEADLINE);

    tokio::select! {
        verdict = state.accounts.verify_credentials(user, credential) => {
            AuthOutcome::Verdict(verdict.and_then(|identity| {
                state
                    .manager
                    .bind_account(session.id(), identity.account_id)
                    .map(|()| identity)
            }))
        }
        _ = tokio::time::sleep_until(deadline) => AuthOutcome::TimedOut,
        reason = requested_close(&mut links.close) => AuthOutcome::Interrupted(reason),
    }
}

/// Resolves once someone asks this session to close (kick or shutdown).
async fn requested_close(close: &mut watch::Receiver<Option<CloseReason>>) -> CloseReason {
    match close.wait_for(Option::is_some).await {
        Ok(reason) => (*reason).unwrap_or(CloseReason::InternalError),
        Err(_) => CloseReason::InternalError,
    }
}

/// `Closing`: flush what's queued, say goodbye, tear down.
async fn close_session<C, A>(
    state: &ServerState<A>,
    session: &mut Session,
    writer: &mut Writer<C>,
    links: &mut SessionLinks,
    reason: CloseReason,
    peer_gone: bool,
) where
    C: Connection,
    A: AccountStore,
{
    let session_id = session.id();
    let was_active = session.state() == SessionState::Active;

    let mut pending = Vec::new();
    if was_active && !peer_gone {
        while let Ok(out) = links.outbound.try_recv() {
            match session.seal(out.opcode, &out.body) {
                Ok(packet) => pending.push(packet),
                Err(e) => tracing::debug!(%session_id, error = %e, "dropping queued packet"),
            }
        }
    }

    pending.extend(session.begin_close(reason));
    state.manager.set_state(session_id, SessionState::Closing);

    if !peer_gone {
        let goodbye = async {
            for packet in pending {
                writer.feed(packet).await?;
            }
            writer.close().await
        };
        match tokio::time::timeout(state.drain_timeout, goodbye).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::debug!(%session_id, error = %e, "close notice not delivered"),
            Err(_) => tracing::debug!(%session_id, "close notice timed out"),
        }
    }

    session.finish_close();
    state.manager.set_state(session_id, SessionState::Closed);
}

/// Turns away a connection that arrived with every slot taken.
pub(crate) async fn reject_full<C: Connection>(conn: C, codec: FrameCodec, timeout: Duration) {
    let conn_id = conn.id();
    tracing::warn!(%conn_id, peer = ?conn.peer_addr(), "at capacity, rejecting connection");

    let notice = match JsonCodec.encode(&CloseNotice::new(CloseReason::ServerFull)) {
        Ok(body) => Packet::new(opcodes::CLOSE, body),
        Err(e) => {
            tracing::debug!(%conn_id, error = %e, "could not encode close notice");
            return;
        }
    };
    let mut writer = FramedWrite::new(conn, codec);
    let goodbye = async {
        writer.send(notice).await?;
        writer.close().await
    };
    if let Ok(Err(e)) = tokio::time::timeout(timeout, goodbye).await {
        tracing::debug!(%conn_id, error = %e, "rejection not delivered");
    }
}
