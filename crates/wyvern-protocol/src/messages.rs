//! Bodies of the control messages the session layer speaks.
//!
//! Application payloads are opaque to this crate; only the reserved
//! opcodes in [`opcodes`](crate::opcodes) have a defined body shape, and
//! those shapes live here.

use serde::{Deserialize, Serialize};

use crate::{AccountId, CloseReason, Opcode};

/// Version of the handshake and control message layout.
pub const PROTOCOL_VERSION: u32 = 1;

/// Body of `HANDSHAKE_INIT` (plaintext).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeInit {
    pub version: u32,
    /// The server's X25519 public key.
    pub public_key: [u8; 32],
    /// Identifier of the symmetric cipher used after the handshake.
    pub cipher_suite: String,
}

/// Body of `HANDSHAKE_REJECTED` (plaintext).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeRejected {
    pub reason: String,
}

/// Body of `AUTH_REQUEST`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthRequest {
    pub user: String,
    pub cred: String,
}

/// Body of `AUTH_OK`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthOk {
    pub account_id: AccountId,
}

/// Body of `AUTH_FAILED`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthFailed {
    pub attempts_left: u32,
    pub message: String,
}

/// Coarse error category carried in an [`ErrorResponse`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Application opcode sent before authentication.
    NotAuthenticated,
    /// `AUTH_REQUEST` on an already authenticated session.
    AlreadyAuthenticated,
    /// A handler rejected the request.
    HandlerFailed,
    /// The body couldn't be parsed.
    BadRequest,
}

/// Body of `ERROR_RESPONSE`. The session stays open after this.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// The request opcode the error refers to.
    pub opcode: Opcode,
    pub code: ErrorCode,
    pub message: String,
}

/// Body of `CLOSE`: the terminal notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseNotice {
    pub reason: CloseReason,
    /// Numeric form of `reason`, for clients that don't parse the name.
    pub code: u8,
}

impl CloseNotice {
    pub fn new(reason: CloseReason) -> Self {
        Self {
            reason,
            code: reason.code(),
        }
    }
}
