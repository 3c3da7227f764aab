//! Body codecs for structured control messages.
//!
//! Frames carry opaque bytes. Control messages (auth requests, error
//! responses, close notices) need a concrete encoding inside those bytes;
//! the [`Codec`] trait keeps that choice swappable. [`JsonCodec`] is the
//! default: easy to inspect in a packet capture, and control traffic is
//! too rare for its size to matter.

use serde::{Serialize, de::DeserializeOwned};

use crate::ProtocolError;

/// Encodes values to bytes and back.
///
/// `DeserializeOwned` because decoded messages outlive the receive buffer
/// they came from.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a value into bytes.
    fn encode<T: Serialize>(
        &self,
        value: &T,
    ) -> Result<Vec<u8>, ProtocolError>;

    /// Deserializes bytes back into a value.
    fn decode<T: DeserializeOwned>(
        &self,
        data: &[u8],
    ) -> Result<T, ProtocolError>;
}

/// A [`Codec`] backed by `serde_json`.
///
/// ```rust
/// use wyvern_protocol::{AuthRequest, Codec, JsonCodec};
///
/// let req = AuthRequest { user: "alice".into(), cred: "secret".into() };
/// let bytes = JsonCodec.encode(&req).unwrap();
/// let back: AuthRequest = JsonCodec.decode(&bytes).unwrap();
/// assert_eq!(req, back);
/// ```
#[cfg(feature = "json")]
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

#[cfg(feature = "json")]
impl Codec for JsonCodec {
    fn encode<T: Serialize>(
        &self,
        value: &T,
    ) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(
        &self,
        data: &[u8],
    ) -> Result<T, ProtocolError> {
        serde_json::from_slice(data).map_err(ProtocolError::Decode)
    }
}
