//! The per-connection session state machine.
//!
//! A [`Session`] is pure, synchronous logic: packets go in, [`Step`]s come
//! out. It never touches a socket and never awaits. The connection driver
//! owns the I/O and the one suspension point that belongs to the session
//! itself, the account-store lookup.
//!
//! ```text
//!  AwaitingHandshake ──proposal──→ KeyEstablished ──AUTH_REQUEST──→ Authenticating
//!         │                            ↑      │                         │    │
//!         │                            └──────┼──── failure (retry) ────┘    │
//!         │                                   │                       success│
//!         ▼                                   ▼                              ▼
//!      Closing ←─────────── any fatal error / timeout / CLOSE ─────────── Active
//!         │
//!         ▼
//!       Closed
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use wyvern_crypto::{CryptoProvider, Digest, hash};
use wyvern_protocol::{
    AccountId, AuthFailed, AuthOk, AuthRequest, CloseNotice, CloseReason, Codec,
    DEFAULT_MAX_FRAME_LENGTH, ErrorCode, ErrorResponse, JsonCodec, Opcode, Packet, SessionId,
    opcodes,
};

use crate::handshake::{accept_proposal, init_packet, rejected_packet};
use crate::{AccountIdentity, SEALED_OVERHEAD, SecureChannel, SessionError};

// ---------------------------------------------------------------------------
// SessionConfig
// ---------------------------------------------------------------------------

/// Timeouts and limits for one session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// From `HANDSHAKE_INIT` until the key is established.
    pub handshake_timeout: Duration,
    /// From key establishment until authentication succeeds. Failed
    /// attempts don't restart it.
    pub auth_timeout: Duration,
    /// Longest silence tolerated from an `Active` client.
    pub idle_timeout: Duration,
    /// Failed `AUTH_REQUEST`s allowed before the session closes.
    pub max_auth_attempts: u32,
    /// How long a released session ID stays unusable.
    pub id_quarantine: Duration,
    /// Frame size limit. Outgoing bodies that would not fit once sealed
    /// are refused.
    pub max_frame_length: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(5),
            auth_timeout: Duration::from_secs(15),
            idle_timeout: Duration::from_secs(60),
            max_auth_attempts: 3,
            id_quarantine: Duration::from_secs(30),
            max_frame_length: DEFAULT_MAX_FRAME_LENGTH,
        }
    }
}

// ---------------------------------------------------------------------------
// SessionState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Only the handshake response is accepted.
    AwaitingHandshake,
    /// Key agreed; bodies must decrypt. Waiting for `AUTH_REQUEST`.
    KeyEstablished,
    /// The account store is checking credentials.
    Authenticating,
    /// Authenticated; application opcodes go to the dispatcher.
    Active,
    /// Sending the close notice and releasing resources.
    Closing,
    /// Terminal.
    Closed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AwaitingHandshake => "awaiting_handshake",
            Self::KeyEstablished => "key_established",
            Self::Authenticating => "authenticating",
            Self::Active => "active",
            Self::Closing => "closing",
            Self::Closed => "closed",
        }
    }

    /// `true` once the session is on its way out.
    pub fn is_closing(&self) -> bool {
        matches!(self, Self::Closing | Self::Closed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Step
// ---------------------------------------------------------------------------

/// What the driver should do after feeding the session a packet.
#[derive(Debug)]
pub enum Step {
    /// Nothing to send.
    Idle,
    /// Write this packet and keep reading.
    Send(Packet),
    /// Look up these credentials, then call [`Session::complete_auth`].
    Authenticate(AuthRequest),
    /// Hand a decrypted application body to the dispatcher.
    Dispatch { opcode: Opcode, body: Bytes },
    /// End the session with this reason.
    Close(CloseReason),
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// One connection's protocol state: current phase, the secure channel
/// (absent until the handshake completes), who is logged in, and the
/// clocks behind the three timeouts.
pub struct Session {
    id: SessionId,
    state: SessionState,
    config: SessionConfig,
    crypto: Arc<CryptoProvider>,
    channel: Option<SecureChannel>,
    key_fingerprint: Option<Digest>,
    account: Option<AccountIdentity>,
    failed_auth_attempts: u32,
    /// When the current handshake or auth phase started.
    phase_started: Instant,
    last_activity: Instant,
    close_reason: Option<CloseReason>,
}

impl Session {
    pub fn new(id: SessionId, config: SessionConfig, crypto: Arc<CryptoProvider>) -> Self {
        let now = Instant::now();
        Self {
            id,
            state: SessionState::AwaitingHandshake,
            config,
            crypto,
            channel: None,
            key_fingerprint: None,
            account: None,
            failed_auth_attempts: 0,
            phase_started: now,
            last_activity: now,
            close_reason: None,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn account(&self) -> Option<&AccountIdentity> {
        self.account.as_ref()
    }

    pub fn account_id(&self) -> Option<AccountId> {
        self.account.as_ref().map(|a| a.account_id)
    }

    pub fn failed_auth_attempts(&self) -> u32 {
        self.failed_auth_attempts
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        self.close_reason
    }

    /// SHA-256 of the negotiated key, once there is one.
    pub fn key_fingerprint(&self) -> Option<Digest> {
        self.key_fingerprint
    }

    /// Largest application body [`seal`](Self::seal) will accept.
    pub fn max_body_len(&self) -> usize {
        self.config.max_frame_length.saturating_sub(SEALED_OVERHEAD)
    }

    /// Sequence counters `(send, recv)` once the channel exists.
    pub fn sequence_counters(&self) -> Option<(u32, u32)> {
        self.channel.as_ref().map(|c| (c.send_seq(), c.recv_seq()))
    }

    /// Produces `HANDSHAKE_INIT` and starts the handshake clock.
    pub fn start(&mut self) -> Result<Packet, SessionError> {
        self.phase_started = Instant::now();
        init_packet(&self.crypto)
    }

    /// Feeds one deframed packet through the state machine.
    ///
    /// An `Err` is fatal: pass [`SessionError::close_reason`] to
    /// [`begin_close`](Self::begin_close).
    pub fn handle_packet(&mut self, packet: Packet) -> Result<Step, SessionError> {
        match self.state {
            SessionState::AwaitingHandshake => self.on_handshake(packet),
            SessionState::KeyEstablished => self.on_key_established(packet),
            SessionState::Authenticating => Err(self.unexpected(packet.opcode)),
            SessionState::Active => self.on_active(packet),
            SessionState::Closing | SessionState::Closed => Ok(Step::Idle),
        }
    }

    fn on_handshake(&mut self, packet: Packet) -> Result<Step, SessionError> {
        if packet.opcode != opcodes::HANDSHAKE_RESPONSE {
            return Err(self.unexpected(packet.opcode));
        }
        let (key, digest) = accept_proposal(&self.crypto, &packet.body)?;
        let cipher = self.crypto.session_cipher(&key).map_err(SessionError::Cipher)?;
        let mut channel = SecureChannel::new(cipher).with_max_frame_length(self.config.max_frame_length);
        let confirm = channel.seal(opcodes::HANDSHAKE_CONFIRM, &digest)?;

        self.key_fingerprint = Some(hash(key.as_bytes()));
        self.channel = Some(channel);
        self.transition(SessionState::KeyEstablished);
        self.phase_started = Instant::now();
        Ok(Step::Send(confirm))
    }

    fn on_key_established(&mut self, packet: Packet) -> Result<Step, SessionError> {
        let opcode = packet.opcode;
        let body = self.open(&packet)?;

        match opcode {
            opcodes::AUTH_REQUEST => match JsonCodec.decode::<AuthRequest>(&body) {
                Ok(request) => {
                    self.transition(SessionState::Authenticating);
                    Ok(Step::Authenticate(request))
                }
                // Garbage credentials cost an attempt like wrong ones do.
                Err(_) => {
                    self.transition(SessionState::Authenticating);
                    self.complete_auth(Err(SessionError::MalformedBody { opcode }))
                        .map(Step::Send)
                }
            },
            opcodes::CLOSE => Ok(Step::Close(CloseReason::ClientLogout)),
            op if !op.is_reserved() => self
                .error_response(op, ErrorCode::NotAuthenticated, "authenticate first")
                .map(Step::Send),
            op => Err(self.unexpected(op)),
        }
    }

    fn on_active(&mut self, packet: Packet) -> Result<Step, SessionError> {
        let opcode = packet.opcode;
        let body = self.open(&packet)?;
        self.last_activity = Instant::now();

        match opcode {
            opcodes::CLOSE => Ok(Step::Close(CloseReason::ClientLogout)),
            opcodes::AUTH_REQUEST => self
                .error_response(opcode, ErrorCode::AlreadyAuthenticated, "already authenticated")
                .map(Step::Send),
            op if !op.is_reserved() => Ok(Step::Dispatch { opcode: op, body }),
            op => Err(self.unexpected(op)),
        }
    }

    /// Applies the account store's verdict.
    ///
    /// Success binds the account and moves to `Active`, returning
    /// `AUTH_OK`. Failure returns `AUTH_FAILED` and goes back to
    /// `KeyEstablished`, or errors with
    /// [`SessionError::TooManyAuthAttempts`] once the limit is reached.
    pub fn complete_auth(
        &mut self,
        result: Result<AccountIdentity, SessionError>,
    ) -> Result<Packet, SessionError> {
        if self.state != SessionState::Authenticating {
            return Err(self.unexpected(opcodes::AUTH_REQUEST));
        }

        match result {
            Ok(identity) => {
                let ok = AuthOk {
                    account_id: identity.account_id,
                };
                tracing::info!(
                    session_id = %self.id,
                    account_id = %identity.account_id,
                    "session authenticated"
                );
                self.account = Some(identity);
                self.transition(SessionState::Active);
                self.last_activity = Instant::now();
                self.seal(opcodes::AUTH_OK, &JsonCodec.encode(&ok)?)
            }
            Err(e) => {
                self.failed_auth_attempts += 1;
                tracing::debug!(
                    session_id = %self.id,
                    attempt = self.failed_auth_attempts,
                    error = %e,
                    "authentication attempt failed"
                );
                if self.failed_auth_attempts >= self.config.max_auth_attempts {
                    return Err(SessionError::TooManyAuthAttempts(self.failed_auth_attempts));
                }
                self.transition(SessionState::KeyEstablished);
                let failed = AuthFailed {
                    attempts_left: self.config.max_auth_attempts - self.failed_auth_attempts,
                    message: match e {
                        SessionError::AlreadyConnected(_) => "account already logged in".into(),
                        _ => "invalid credentials".into(),
                    },
                };
                self.seal(opcodes::AUTH_FAILED, &JsonCodec.encode(&failed)?)
            }
        }
    }

    /// Encrypts an outgoing packet under the session key.
    pub fn seal(&mut self, opcode: Opcode, body: &[u8]) -> Result<Packet, SessionError> {
        self.channel
            .as_mut()
            .ok_or(SessionError::NoSessionKey)?
            .seal(opcode, body)
    }

    /// Encrypted `ERROR_RESPONSE` referring to `opcode`. The session stays
    /// open.
    pub fn error_response(
        &mut self,
        opcode: Opcode,
        code: ErrorCode,
        message: &str,
    ) -> Result<Packet, SessionError> {
        let body = ErrorResponse {
            opcode,
            code,
            message: message.to_string(),
        };
        self.seal(opcodes::ERROR_RESPONSE, &JsonCodec.encode(&body)?)
    }

    /// The next instant at which [`check_timeouts`](Self::check_timeouts)
    /// could fail, or `None` when no timer applies.
    pub fn deadline(&self) -> Option<Instant> {
        match self.state {
            SessionState::AwaitingHandshake => {
                Some(self.phase_started + self.config.handshake_timeout)
            }
            SessionState::KeyEstablished | SessionState::Authenticating => {
                Some(self.phase_started + self.config.auth_timeout)
            }
            SessionState::Active => Some(self.last_activity + self.config.idle_timeout),
            SessionState::Closing | SessionState::Closed => None,
        }
    }

    /// Errors with the matching timeout if `now` is past the deadline.
    pub fn check_timeouts(&self, now: Instant) -> Result<(), SessionError> {
        match self.deadline() {
            Some(deadline) if now >= deadline => Err(match self.state {
                SessionState::AwaitingHandshake => SessionError::HandshakeTimeout,
                SessionState::Active => SessionError::IdleTimeout,
                _ => SessionError::AuthTimeout,
            }),
            _ => Ok(()),
        }
    }

    /// Moves to `Closing` and returns the packets to send before the
    /// transport is torn down.
    ///
    /// A failed handshake gets `HANDSHAKE_REJECTED`. Every path gets a
    /// `CLOSE` notice, encrypted when a key exists. Calling this twice
    /// returns nothing the second time.
    pub fn begin_close(&mut self, reason: CloseReason) -> Vec<Packet> {
        if self.state.is_closing() {
            return Vec::new();
        }
        let was = self.state;
        self.close_reason = Some(reason);
        self.transition(SessionState::Closing);

        let mut out = Vec::with_capacity(2);
        if was == SessionState::AwaitingHandshake && reason == CloseReason::HandshakeFailure {
            match rejected_packet() {
                Ok(p) => out.push(p),
                Err(e) => tracing::debug!(session_id = %self.id, error = %e, "rejection not encoded"),
            }
        }

        let notice = CloseNotice::new(reason);
        let packet = JsonCodec.encode(&notice).map_err(SessionError::from).and_then(|body| {
            match self.channel.as_mut() {
                Some(channel) => channel.seal(opcodes::CLOSE, &body),
                None => Ok(Packet::new(opcodes::CLOSE, body)),
            }
        });
        match packet {
            Ok(p) => out.push(p),
            Err(e) => tracing::debug!(session_id = %self.id, error = %e, "close notice not encoded"),
        }
        out
    }

    /// Terminal transition. Drops the channel, which zeroes the key.
    pub fn finish_close(&mut self) {
        self.channel = None;
        self.transition(SessionState::Closed);
    }

    fn open(&mut self, packet: &Packet) -> Result<Bytes, SessionError> {
        self.channel
            .as_mut()
            .ok_or(SessionError::NoSessionKey)?
            .open(packet)
    }

    fn transition(&mut self, to: SessionState) {
        if self.state != to {
            tracing::debug!(session_id = %self.id, from = %self.state, %to, "session state");
            self.state = to;
        }
    }

    fn unexpected(&self, opcode: Opcode) -> SessionError {
        SessionError::UnexpectedOpcode {
            state: self.state,
            opcode,
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("account", &self.account_id())
            .field("channel", &self.channel)
            .finish_non_exhaustive()
    }
}
