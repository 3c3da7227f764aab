//! Wire protocol for Wyvern.
//!
//! This crate defines what travels between client and server:
//!
//! - **Frames** ([`FrameCodec`], [`Packet`]): length-prefixed, checksummed
//!   units cut out of a byte stream.
//! - **Checksums** ([`Checksum`], [`ChecksumAlgorithm`]): pluggable, since
//!   every game picks its own.
//! - **Opcodes** ([`Opcode`], [`opcodes`]): the reserved control range and
//!   the start of the application range.
//! - **Control messages** ([`AuthRequest`], [`CloseNotice`], ...) and the
//!   [`Codec`] that serializes them.
//!
//! # Architecture
//!
//! ```text
//! Transport (bytes) → Protocol (Packet) → Session (decrypt, sequence, state)
//! ```
//!
//! Nothing here knows about keys or sessions. Bodies are opaque bytes.

mod checksum;
mod codec;
mod error;
mod frame;
mod messages;
mod types;

pub use checksum::{Checksum, ChecksumAlgorithm};
pub use codec::Codec;
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use error::ProtocolError;
pub use frame::{
    DEFAULT_MAX_FRAME_LENGTH, Decoded, FrameCodec, FrameHeader, HEADER_LEN,
    Packet,
};
pub use messages::{
    AuthFailed, AuthOk, AuthRequest, CloseNotice, ErrorCode, ErrorResponse,
    HandshakeInit, HandshakeRejected, PROTOCOL_VERSION,
};
pub use types::{AccountId, CloseReason, Opcode, SessionId, opcodes};

pub use bytes::Bytes;
