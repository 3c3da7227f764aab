//! Unified error type for Wyvern.

use wyvern_crypto::CryptoError;
use wyvern_protocol::{CloseReason, Opcode, ProtocolError};
use wyvern_session::SessionError;
use wyvern_transport::TransportError;

use crate::config::ConfigError;
use crate::dispatcher::DispatchError;

/// Top-level error that wraps all crate-specific errors.
///
/// The `#[from]` attribute on each layer's variant lets `?` convert
/// sub-crate errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum WyvernError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    /// The server ended the session (client side).
    #[error("session closed by server: {0}")]
    Closed(CloseReason),

    /// The server sent something that makes no sense here (client side).
    #[error("unexpected packet {0} from server")]
    UnexpectedPacket(Opcode),

    /// The stream ended without a close notice.
    #[error("connection lost")]
    ConnectionLost,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_transport_error() {
        let err: WyvernError = TransportError::ConnectionClosed("gone".into()).into();
        assert!(matches!(err, WyvernError::Transport(_)));
        assert!(err.to_string().contains("gone"));
    }

    #[test]
    fn test_from_protocol_error() {
        let err: WyvernError = ProtocolError::InvalidMessage("bad".into()).into();
        assert!(matches!(err, WyvernError::Protocol(_)));
    }

    #[test]
    fn test_from_session_error() {
        let err: WyvernError = SessionError::AuthFailed("nope".into()).into();
        assert!(matches!(err, WyvernError::Session(_)));
    }

    #[test]
    fn test_from_dispatch_error() {
        let err: WyvernError = DispatchError::Duplicate(Opcode(0x0100)).into();
        assert!(err.to_string().contains("0x0100"));
    }

    #[test]
    fn test_closed_display_uses_reason() {
        let err = WyvernError::Closed(CloseReason::ServerFull);
        assert!(err.to_string().contains(&CloseReason::ServerFull.to_string()));
    }
}
