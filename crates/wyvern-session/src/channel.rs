//! The encrypted, sequenced packet channel both peers use after the
//! handshake.
//!
//! Each encrypted body is an AEAD box over `seq:u32 LE ‖ payload`, with
//! the frame's opcode as associated data. Moving a body to a different
//! opcode breaks authentication; replaying or reordering it breaks the
//! sequence check.
//!
//! Counters start at 0 and the first packet in each direction carries
//! sequence 1.
//!
//! A sealed body is [`SEALED_OVERHEAD`] bytes longer than the plaintext.
//! A channel built with [`with_max_frame_length`](SecureChannel::with_max_frame_length)
//! refuses to seal anything that would then overflow a frame, before the
//! send counter moves.

use bytes::Bytes;
use wyvern_crypto::{SYMMETRIC_OVERHEAD, SessionCipher};
use wyvern_protocol::{Opcode, Packet};

use crate::SessionError;

const SEQ_LEN: usize = 4;

/// Bytes sealing adds to a body: sequence number, nonce and tag.
pub const SEALED_OVERHEAD: usize = SEQ_LEN + SYMMETRIC_OVERHEAD;

pub struct SecureChannel {
    cipher: SessionCipher,
    /// Sequence number of the last packet sealed.
    send_seq: u32,
    /// Sequence number of the last packet accepted.
    recv_seq: u32,
    /// Largest plaintext body [`seal`](Self::seal) accepts.
    max_body_len: usize,
}

impl SecureChannel {
    /// A channel with no size limit of its own.
    pub fn new(cipher: SessionCipher) -> Self {
        Self {
            cipher,
            send_seq: 0,
            recv_seq: 0,
            max_body_len: usize::MAX,
        }
    }

    /// Caps sealed packets at `max_frame_length` bytes on the wire.
    pub fn with_max_frame_length(mut self, max_frame_length: usize) -> Self {
        self.max_body_len = max_frame_length.saturating_sub(SEALED_OVERHEAD);
        self
    }

    /// Largest body that still fits in one frame once sealed.
    pub fn max_body_len(&self) -> usize {
        self.max_body_len
    }

    /// Encrypts `body` under the next send sequence number.
    ///
    /// # Errors
    /// [`SessionError::BodyTooLarge`] if the sealed packet would not fit in
    /// a frame. The counter is left as it was.
    pub fn seal(&mut self, opcode: Opcode, body: &[u8]) -> Result<Packet, SessionError> {
        if body.len() > self.max_body_len {
            return Err(SessionError::BodyTooLarge {
                len: body.len(),
                max: self.max_body_len,
            });
        }
        let seq = self
            .send_seq
            .checked_add(1)
            .ok_or(SessionError::SequenceExhausted)?;

        let mut plaintext = Vec::with_capacity(SEQ_LEN + body.len());
        plaintext.extend_from_slice(&seq.to_le_bytes());
        plaintext.extend_from_slice(body);

        let sealed = self
            .cipher
            .encrypt(&opcode.to_le_bytes(), &plaintext)
            .map_err(SessionError::Cipher)?;
        self.send_seq = seq;
        Ok(Packet::new(opcode, sealed))
    }

    /// Decrypts a packet and enforces `seq == last + 1`.
    ///
    /// Counters only move on success, so a rejected packet leaves the
    /// channel exactly as it was.
    pub fn open(&mut self, packet: &Packet) -> Result<Bytes, SessionError> {
        let plaintext = self
            .cipher
            .decrypt(&packet.opcode.to_le_bytes(), &packet.body)
            .map_err(SessionError::Cipher)?;
        if plaintext.len() < SEQ_LEN {
            return Err(SessionError::MalformedBody {
                opcode: packet.opcode,
            });
        }

        let mut seq_bytes = [0u8; SEQ_LEN];
        seq_bytes.copy_from_slice(&plaintext[..SEQ_LEN]);
        let actual = u32::from_le_bytes(seq_bytes);
        let expected = self.recv_seq.wrapping_add(1);
        if actual != expected || expected == 0 {
            return Err(SessionError::SequenceViolation { expected, actual });
        }
        self.recv_seq = actual;

        Ok(Bytes::from(plaintext).slice(SEQ_LEN..))
    }

    pub fn send_seq(&self) -> u32 {
        self.send_seq
    }

    pub fn recv_seq(&self) -> u32 {
        self.recv_seq
    }
}

impl std::fmt::Debug for SecureChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureChannel")
            .field("suite", &self.cipher.suite())
            .field("send_seq", &self.send_seq)
            .field("recv_seq", &self.recv_seq)
            .field("max_body_len", &self.max_body_len)
            .finish()
    }
}
