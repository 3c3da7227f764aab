//! Error types for the session layer.

use wyvern_crypto::CryptoError;
use wyvern_protocol::{AccountId, CloseReason, Opcode, ProtocolError, SessionId};

use crate::SessionState;

/// Errors that can occur while driving a session.
///
/// Apart from [`AuthFailed`](Self::AuthFailed) and
/// [`AlreadyConnected`](Self::AlreadyConnected), which the state machine
/// absorbs as retryable auth failures, and
/// [`BodyTooLarge`](Self::BodyTooLarge), which only drops the one outgoing
/// packet, every variant ends the session.
/// [`close_reason`](Self::close_reason) gives the code sent to the client.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Framing or checksum failure underneath the session.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The key proposal didn't open, or the confirmation didn't match.
    #[error("handshake failed: {0}")]
    HandshakeFailure(String),

    /// A post-handshake body failed to open (or seal) under the session key.
    #[error("session cipher: {0}")]
    Cipher(#[source] CryptoError),

    /// The account store rejected the credentials.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// The account already has a live session.
    #[error("account {0} already has an active session")]
    AlreadyConnected(AccountId),

    /// The retry limit for authentication was reached.
    #[error("too many failed authentication attempts ({0})")]
    TooManyAuthAttempts(u32),

    /// A received sequence number was not exactly one past the last one.
    #[error("sequence violation: expected {expected}, got {actual}")]
    SequenceViolation { expected: u32, actual: u32 },

    /// The send counter would wrap.
    #[error("sequence space exhausted")]
    SequenceExhausted,

    /// An outgoing body would not fit in one frame once sealed. Nothing
    /// was encrypted and the send counter did not move.
    #[error("body of {len} bytes exceeds the sealed limit of {max}")]
    BodyTooLarge { len: usize, max: usize },

    /// An opcode arrived that the current state doesn't accept.
    #[error("opcode {opcode} not allowed in state {state}")]
    UnexpectedOpcode { state: SessionState, opcode: Opcode },

    /// A control message body couldn't be parsed.
    #[error("malformed {opcode} body")]
    MalformedBody { opcode: Opcode },

    #[error("handshake timed out")]
    HandshakeTimeout,

    #[error("authentication timed out")]
    AuthTimeout,

    #[error("idle timeout")]
    IdleTimeout,

    /// Tried to encrypt before a session key exists.
    #[error("no session key established")]
    NoSessionKey,

    /// The registry has no record of this session.
    #[error("session {0} not found")]
    NotFound(SessionId),
}

impl SessionError {
    /// The coarse reason code reported to the client when this error ends
    /// the session.
    pub fn close_reason(&self) -> CloseReason {
        match self {
            Self::Protocol(ProtocolError::FrameTooLarge { .. }) => CloseReason::FramingError,
            Self::Protocol(ProtocolError::ChecksumMismatch { .. }) => {
                CloseReason::ChecksumMismatch
            }
            Self::Protocol(ProtocolError::Io(_)) => CloseReason::FramingError,
            Self::Protocol(_) => CloseReason::ProtocolViolation,
            Self::HandshakeFailure(_) | Self::HandshakeTimeout => CloseReason::HandshakeFailure,
            Self::AuthFailed(_)
            | Self::AlreadyConnected(_)
            | Self::TooManyAuthAttempts(_)
            | Self::AuthTimeout => CloseReason::AuthFailure,
            Self::SequenceViolation { .. } => CloseReason::SequenceViolation,
            Self::Cipher(_)
            | Self::SequenceExhausted
            | Self::UnexpectedOpcode { .. }
            | Self::MalformedBody { .. } => CloseReason::ProtocolViolation,
            Self::IdleTimeout => CloseReason::IdleTimeout,
            Self::NoSessionKey | Self::NotFound(_) | Self::BodyTooLarge { .. } => {
                CloseReason::InternalError
            }
        }
    }

    /// Events worth a `warn!`: tampering, replay, or a peer that doesn't
    /// speak the protocol.
    pub fn is_security_relevant(&self) -> bool {
        matches!(
            self,
            Self::Protocol(ProtocolError::ChecksumMismatch { .. })
                | Self::Cipher(_)
                | Self::SequenceViolation { .. }
                | Self::HandshakeFailure(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_reason_framing_errors() {
        let err = SessionError::from(ProtocolError::FrameTooLarge {
            declared: 500,
            max: 256,
        });
        assert_eq!(err.close_reason(), CloseReason::FramingError);

        let err = SessionError::from(ProtocolError::ChecksumMismatch {
            expected: 1,
            actual: 2,
        });
        assert_eq!(err.close_reason(), CloseReason::ChecksumMismatch);
        assert!(err.is_security_relevant());
    }

    #[test]
    fn test_close_reason_timeouts_follow_phase() {
        assert_eq!(
            SessionError::HandshakeTimeout.close_reason(),
            CloseReason::HandshakeFailure
        );
        assert_eq!(SessionError::AuthTimeout.close_reason(), CloseReason::AuthFailure);
        assert_eq!(SessionError::IdleTimeout.close_reason(), CloseReason::IdleTimeout);
    }

    #[test]
    fn test_close_reason_replay() {
        let err = SessionError::SequenceViolation {
            expected: 3,
            actual: 2,
        };
        assert_eq!(err.close_reason(), CloseReason::SequenceViolation);
        assert!(err.to_string().contains("expected 3"));
    }

    #[test]
    fn test_body_too_large_is_not_security_relevant() {
        let err = SessionError::BodyTooLarge { len: 300, max: 220 };
        assert!(!err.is_security_relevant());
        assert_eq!(err.close_reason(), CloseReason::InternalError);
        assert!(err.to_string().contains("300"));
    }
}
