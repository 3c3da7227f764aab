//! Length-prefixed, checksummed frames.
//!
//! ```text
//! ┌────────────┬────────────┬──────────────┬──────────────────────┐
//! │ length u32 │ opcode u16 │ checksum u32 │ body (length bytes)  │
//! └────────────┴────────────┴──────────────┴──────────────────────┘
//!   little-endian throughout; checksum covers length ‖ opcode ‖ body
//! ```
//!
//! The codec knows nothing about encryption or sessions. Bodies are opaque:
//! plaintext during the first handshake exchange, ciphertext afterwards.
//! The session layer decides which.
//!
//! Decoding works on a growing receive buffer. Feed it whatever has arrived
//! so far; it answers with a complete frame, a request for more bytes, or an
//! error. It never blocks and never assumes one read holds one frame.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::{Checksum, ChecksumAlgorithm, Opcode, ProtocolError};

/// Size of the fixed frame header in bytes.
pub const HEADER_LEN: usize = 10;

/// Default cap on a frame body. Large enough for any control message and
/// typical game payloads, small enough that a forged length can't hurt.
pub const DEFAULT_MAX_FRAME_LENGTH: usize = 64 * 1024;

/// Bytes covered by the checksum inside the header (`length ‖ opcode`).
const CHECKSUMMED_HEADER_LEN: usize = 6;

/// One decoded packet: an opcode and its (possibly encrypted) body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub opcode: Opcode,
    pub body: Bytes,
}

impl Packet {
    pub fn new(opcode: Opcode, body: impl Into<Bytes>) -> Self {
        Self {
            opcode,
            body: body.into(),
        }
    }
}

/// Parsed frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub length: u32,
    pub opcode: Opcode,
    pub checksum: u32,
}

impl FrameHeader {
    /// Total bytes the frame occupies on the wire.
    pub fn frame_len(&self) -> usize {
        HEADER_LEN + self.length as usize
    }
}

/// Result of offering a buffer to [`FrameCodec::decode_frame`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// A complete, verified frame. The caller should discard `consumed`
    /// bytes from the front of its buffer.
    Frame { packet: Packet, consumed: usize },
    /// Not enough bytes yet. At least `needed` more are required.
    Incomplete { needed: usize },
}

/// Frame encoder/decoder with a pluggable checksum.
///
/// Usable directly via [`encode_frame`](Self::encode_frame) and
/// [`decode_frame`](Self::decode_frame), or as a `tokio_util` codec with
/// `FramedRead` / `FramedWrite`.
#[derive(Debug, Clone)]
pub struct FrameCodec<C: Checksum = ChecksumAlgorithm> {
    checksum: C,
    max_frame_length: usize,
}

impl Default for FrameCodec<ChecksumAlgorithm> {
    fn default() -> Self {
        Self::new(ChecksumAlgorithm::default(), DEFAULT_MAX_FRAME_LENGTH)
    }
}

impl<C: Checksum> FrameCodec<C> {
    pub fn new(checksum: C, max_frame_length: usize) -> Self {
        Self {
            checksum,
            max_frame_length,
        }
    }

    pub fn max_frame_length(&self) -> usize {
        self.max_frame_length
    }

    /// Frames `body` under `opcode` into a fresh buffer.
    ///
    /// # Errors
    /// [`ProtocolError::FrameTooLarge`] if the body exceeds the configured
    /// maximum. We refuse to send what we would refuse to receive.
    pub fn encode_frame(
        &self,
        opcode: Opcode,
        body: &[u8],
    ) -> Result<Vec<u8>, ProtocolError> {
        let mut buf = BytesMut::with_capacity(HEADER_LEN + body.len());
        self.encode_into(opcode, body, &mut buf)?;
        Ok(buf.to_vec())
    }

    /// Appends one frame to `dst`.
    pub fn encode_into(
        &self,
        opcode: Opcode,
        body: &[u8],
        dst: &mut BytesMut,
    ) -> Result<(), ProtocolError> {
        let too_large = || ProtocolError::FrameTooLarge {
            declared: body.len(),
            max: self.max_frame_length,
        };
        if body.len() > self.max_frame_length {
            return Err(too_large());
        }
        let length = u32::try_from(body.len()).map_err(|_| too_large())?;

        let mut prefix = [0u8; CHECKSUMMED_HEADER_LEN];
        prefix[..4].copy_from_slice(&length.to_le_bytes());
        prefix[4..].copy_from_slice(&opcode.to_le_bytes());
        let checksum = self.checksum.compute(&[&prefix, body]);

        dst.reserve(HEADER_LEN + body.len());
        dst.put_slice(&prefix);
        dst.put_u32_le(checksum);
        dst.put_slice(body);
        Ok(())
    }

    /// Reads the header at the front of `buf`, if enough bytes are there.
    ///
    /// The length check happens here, before the body is buffered.
    pub fn parse_header(
        &self,
        buf: &[u8],
    ) -> Result<Option<FrameHeader>, ProtocolError> {
        if buf.len() < HEADER_LEN {
            return Ok(None);
        }
        let mut cursor = &buf[..HEADER_LEN];
        let length = cursor.get_u32_le();
        let opcode = Opcode(cursor.get_u16_le());
        let checksum = cursor.get_u32_le();

        if length as usize > self.max_frame_length {
            return Err(ProtocolError::FrameTooLarge {
                declared: length as usize,
                max: self.max_frame_length,
            });
        }

        Ok(Some(FrameHeader {
            length,
            opcode,
            checksum,
        }))
    }

    /// Tries to take one frame off the front of `buf`.
    ///
    /// # Errors
    /// - [`ProtocolError::FrameTooLarge`] as soon as the header is readable
    /// - [`ProtocolError::ChecksumMismatch`] once the whole frame is present
    ///
    /// Either way the stream is unusable afterwards; the caller closes it.
    pub fn decode_frame(&self, buf: &[u8]) -> Result<Decoded, ProtocolError> {
        let Some(header) = self.parse_header(buf)? else {
            return Ok(Decoded::Incomplete {
                needed: HEADER_LEN - buf.len(),
            });
        };

        let total = header.frame_len();
        if buf.len() < total {
            return Ok(Decoded::Incomplete {
                needed: total - buf.len(),
            });
        }

        let body = &buf[HEADER_LEN..total];
        self.verify(&header, &buf[..HEADER_LEN], body)?;

        Ok(Decoded::Frame {
            packet: Packet::new(header.opcode, Bytes::copy_from_slice(body)),
            consumed: total,
        })
    }

    fn verify(
        &self,
        header: &FrameHeader,
        header_bytes: &[u8],
        body: &[u8],
    ) -> Result<(), ProtocolError> {
        let actual = self
            .checksum
            .compute(&[&header_bytes[..CHECKSUMMED_HEADER_LEN], body]);
        if actual != header.checksum {
            return Err(ProtocolError::ChecksumMismatch {
                expected: header.checksum,
                actual,
            });
        }
        Ok(())
    }
}

impl<C: Checksum> Decoder for FrameCodec<C> {
    type Item = Packet;
    type Error = ProtocolError;

    fn decode(
        &mut self,
        src: &mut BytesMut,
    ) -> Result<Option<Packet>, ProtocolError> {
        let Some(header) = self.parse_header(src)? else {
            return Ok(None);
        };

        let total = header.frame_len();
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        let mut frame = src.split_to(total);
        let body = frame.split_off(HEADER_LEN).freeze();
        self.verify(&header, &frame, &body)?;

        Ok(Some(Packet {
            opcode: header.opcode,
            body,
        }))
    }
}

impl<C: Checksum> Encoder<Packet> for FrameCodec<C> {
    type Error = ProtocolError;

    fn encode(
        &mut self,
        item: Packet,
        dst: &mut BytesMut,
    ) -> Result<(), ProtocolError> {
        self.encode_into(item.opcode, &item.body, dst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec(max: usize) -> FrameCodec {
        FrameCodec::new(ChecksumAlgorithm::Crc32, max)
    }

    #[test]
    fn test_encode_frame_writes_little_endian_header() {
        let bytes = codec(256).encode_frame(Opcode(0x0102), b"abc").unwrap();

        assert_eq!(bytes.len(), HEADER_LEN + 3);
        assert_eq!(&bytes[0..4], &3u32.to_le_bytes());
        assert_eq!(&bytes[4..6], &[0x02, 0x01]);
        assert_eq!(&bytes[HEADER_LEN..], b"abc");
    }

    #[test]
    fn test_decode_frame_roundtrip_returns_consumed_len() {
        let c = codec(256);
        let bytes = c.encode_frame(Opcode(0x0200), b"hello").unwrap();

        match c.decode_frame(&bytes).unwrap() {
            Decoded::Frame { packet, consumed } => {
                assert_eq!(packet.opcode, Opcode(0x0200));
                assert_eq!(&packet.body[..], b"hello");
                assert_eq!(consumed, bytes.len());
            }
            other => panic!("expected frame, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_frame_empty_body() {
        let c = codec(256);
        let bytes = c.encode_frame(Opcode(0x0101), b"").unwrap();

        let Decoded::Frame { packet, .. } = c.decode_frame(&bytes).unwrap() else {
            panic!("expected frame");
        };
        assert!(packet.body.is_empty());
    }

    #[test]
    fn test_decode_frame_partial_header_is_incomplete() {
        let c = codec(256);
        let bytes = c.encode_frame(Opcode(0x0101), b"xyz").unwrap();

        assert_eq!(
            c.decode_frame(&bytes[..4]).unwrap(),
            Decoded::Incomplete { needed: 6 }
        );
    }

    #[test]
    fn test_decode_frame_partial_body_is_incomplete() {
        let c = codec(256);
        let bytes = c.encode_frame(Opcode(0x0101), b"xyz").unwrap();

        assert_eq!(
            c.decode_frame(&bytes[..HEADER_LEN + 1]).unwrap(),
            Decoded::Incomplete { needed: 2 }
        );
    }

    #[test]
    fn test_decode_frame_oversized_length_rejected_from_header_alone() {
        // A 500-byte declaration against a 256-byte limit must fail with
        // only the header in hand, no body bytes are needed.
        let c = codec(256);
        let mut header = Vec::new();
        header.extend_from_slice(&500u32.to_le_bytes());
        header.extend_from_slice(&0x0100u16.to_le_bytes());
        header.extend_from_slice(&0u32.to_le_bytes());

        let err = c.decode_frame(&header).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::FrameTooLarge {
                declared: 500,
                max: 256
            }
        ));
    }

    #[test]
    fn test_decode_frame_corrupted_body_is_checksum_mismatch() {
        let c = codec(256);
        let mut bytes = c.encode_frame(Opcode(0x0100), b"payload").unwrap();
        bytes[HEADER_LEN + 2] ^= 0x01;

        assert!(matches!(
            c.decode_frame(&bytes),
            Err(ProtocolError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_decode_frame_corrupted_opcode_is_checksum_mismatch() {
        let c = codec(256);
        let mut bytes = c.encode_frame(Opcode(0x0100), b"payload").unwrap();
        bytes[4] ^= 0x01;

        assert!(matches!(
            c.decode_frame(&bytes),
            Err(ProtocolError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_encode_frame_oversized_body_rejected() {
        let err = codec(4).encode_frame(Opcode(0x0100), b"12345").unwrap_err();
        assert!(matches!(err, ProtocolError::FrameTooLarge { declared: 5, max: 4 }));
    }

    #[test]
    fn test_decoder_handles_byte_at_a_time_stream() {
        let mut c = codec(256);
        let mut stream = Vec::new();
        stream.extend(c.encode_frame(Opcode(0x0100), b"one").unwrap());
        stream.extend(c.encode_frame(Opcode(0x0101), b"two").unwrap());

        let mut buf = BytesMut::new();
        let mut packets = Vec::new();
        for byte in stream {
            buf.put_u8(byte);
            while let Some(packet) = Decoder::decode(&mut c, &mut buf).unwrap() {
                packets.push(packet);
            }
        }

        assert_eq!(packets.len(), 2);
        assert_eq!(packets[0], Packet::new(Opcode(0x0100), &b"one"[..]));
        assert_eq!(packets[1], Packet::new(Opcode(0x0101), &b"two"[..]));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decoder_and_encoder_agree() {
        let mut c = FrameCodec::new(ChecksumAlgorithm::Additive, 64);
        let mut buf = BytesMut::new();
        Encoder::encode(&mut c, Packet::new(Opcode(0x0300), &b"abc"[..]), &mut buf)
            .unwrap();

        let packet = Decoder::decode(&mut c, &mut buf).unwrap().unwrap();
        assert_eq!(packet.opcode, Opcode(0x0300));
        assert_eq!(&packet.body[..], b"abc");
    }

    #[test]
    fn test_decode_frame_checksum_algorithms_do_not_interoperate() {
        let crc = FrameCodec::new(ChecksumAlgorithm::Crc32, 64);
        let fnv = FrameCodec::new(ChecksumAlgorithm::Fnv1a, 64);
        let bytes = crc.encode_frame(Opcode(0x0100), b"data").unwrap();

        assert!(matches!(
            fnv.decode_frame(&bytes),
            Err(ProtocolError::ChecksumMismatch { .. })
        ));
    }
}
