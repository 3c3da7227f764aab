//! Error types for the protocol layer.
//!
//! Everything in here is about bytes on the wire: frames that are too long,
//! frames whose checksum doesn't match, and control bodies that fail to
//! serialize. None of these are recoverable on the same connection; the
//! codec never tries to resynchronize a stream after an error.

/// Errors that can occur in the protocol layer.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The declared frame length exceeds the configured maximum.
    ///
    /// Raised as soon as the header is readable, before any body bytes are
    /// buffered, so a hostile length field can't make us allocate.
    #[error("frame too large: declared {declared} bytes, maximum is {max}")]
    FrameTooLarge { declared: usize, max: usize },

    /// The checksum carried in the header doesn't match the one we computed
    /// over the received header and body. Either corruption or tampering.
    #[error("checksum mismatch: frame carried {expected:#010x}, computed {actual:#010x}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    /// Underlying I/O failure while reading or writing frames.
    ///
    /// Required by `tokio_util::codec`, whose decoder and encoder errors
    /// must be constructible from `std::io::Error`.
    #[error("frame I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization of a control body failed.
    #[cfg(feature = "json")]
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// A control body could not be parsed.
    #[cfg(feature = "json")]
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// The frame is well formed but violates a protocol rule, e.g. an
    /// unknown checksum identifier or a body shorter than its fixed prefix.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}
