//! Identity and tag types shared by every layer.
//!
//! These are newtype wrappers over plain integers so a `SessionId` can't be
//! passed where an `AccountId` is expected, even though both are `u64`.

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// Identifies one live connection's session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S-{:016x}", self.0)
    }
}

/// Identifies an authenticated account, as issued by the account store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(pub u64);

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "A-{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Opcode
// ---------------------------------------------------------------------------

/// Tag identifying a packet's semantic type. Travels as a little-endian
/// `u16` in the frame header.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize,
    Deserialize,
)]
#[serde(transparent)]
pub struct Opcode(pub u16);

impl Opcode {
    /// Returns `true` for opcodes the session layer consumes itself.
    /// Handlers can't be registered for these.
    pub fn is_reserved(self) -> bool {
        self.0 < opcodes::FIRST_APPLICATION.0
    }

    /// Little-endian wire bytes, also used as AEAD associated data.
    pub fn to_le_bytes(self) -> [u8; 2] {
        self.0.to_le_bytes()
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06x}", self.0)
    }
}

/// Control opcodes consumed by the session layer.
///
/// The concrete game's catalog is whatever the integrator registers at
/// [`FIRST_APPLICATION`] and above.
pub mod opcodes {
    use super::Opcode;

    /// Server → client: public key and cipher suite (plaintext).
    pub const HANDSHAKE_INIT: Opcode = Opcode(0x0001);
    /// Client → server: sealed symmetric key proposal (plaintext frame).
    pub const HANDSHAKE_RESPONSE: Opcode = Opcode(0x0002);
    /// Server → client: proof of key possession (encrypted).
    pub const HANDSHAKE_CONFIRM: Opcode = Opcode(0x0003);
    /// Server → client: the proposal could not be opened (plaintext).
    pub const HANDSHAKE_REJECTED: Opcode = Opcode(0x0004);

    /// Client → server: credentials.
    pub const AUTH_REQUEST: Opcode = Opcode(0x0010);
    /// Server → client: credentials accepted, account bound.
    pub const AUTH_OK: Opcode = Opcode(0x0011);
    /// Server → client: credentials rejected, may retry.
    pub const AUTH_FAILED: Opcode = Opcode(0x0012);

    /// Server → client: a request failed but the session stays open.
    pub const ERROR_RESPONSE: Opcode = Opcode(0x00FE);
    /// Either direction: terminal notification before teardown.
    pub const CLOSE: Opcode = Opcode(0x00FF);

    /// First opcode available to game-logic handlers.
    pub const FIRST_APPLICATION: Opcode = Opcode(0x0100);
}

// ---------------------------------------------------------------------------
// CloseReason: coarse code sent in the terminal notification
// ---------------------------------------------------------------------------

/// Why a session is being torn down. Sent to the client in a
/// [`CloseNotice`](crate::CloseNotice) where the transport still allows it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    /// The client asked to log out.
    ClientLogout,
    /// Malformed or oversized frame.
    FramingError,
    /// Checksum failed; possible tampering.
    ChecksumMismatch,
    /// Key exchange failed or timed out.
    HandshakeFailure,
    /// Too many failed authentication attempts, or auth timed out.
    AuthFailure,
    /// Replayed or out-of-order packet.
    SequenceViolation,
    /// Opcode not allowed in the current state.
    ProtocolViolation,
    /// No traffic within the idle window.
    IdleTimeout,
    /// Server at capacity.
    ServerFull,
    /// Server is shutting down.
    ServerShutdown,
    /// Removed by an operator or game logic.
    Kicked,
    /// Unexpected failure on the server side.
    InternalError,
}

impl CloseReason {
    /// Numeric code, stable across releases.
    pub fn code(self) -> u8 {
        match self {
            Self::ClientLogout => 0,
            Self::FramingError => 1,
            Self::ChecksumMismatch => 2,
            Self::HandshakeFailure => 3,
            Self::AuthFailure => 4,
            Self::SequenceViolation => 5,
            Self::ProtocolViolation => 6,
            Self::IdleTimeout => 7,
            Self::ServerFull => 8,
            Self::ServerShutdown => 9,
            Self::Kicked => 10,
            Self::InternalError => 255,
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ClientLogout => "client logout",
            Self::FramingError => "framing error",
            Self::ChecksumMismatch => "checksum mismatch",
            Self::HandshakeFailure => "handshake failure",
            Self::AuthFailure => "authentication failure",
            Self::SequenceViolation => "sequence violation",
            Self::ProtocolViolation => "protocol violation",
            Self::IdleTimeout => "idle timeout",
            Self::ServerFull => "server full",
            Self::ServerShutdown => "server shutdown",
            Self::Kicked => "kicked",
            Self::InternalError => "internal error",
        };
        f.write_str(s)
    }
}
