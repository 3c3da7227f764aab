//! Property tests for the frame codec laws.
//!
//! Decoding an encoded frame gives back exactly what went in, and flipping
//! any single body byte is always caught by the checksum, for every
//! built-in algorithm.

use proptest::prelude::*;
use wyvern_protocol::{
    ChecksumAlgorithm, Decoded, FrameCodec, HEADER_LEN, Opcode, ProtocolError,
};

const MAX: usize = 4096;

fn algorithm() -> impl Strategy<Value = ChecksumAlgorithm> {
    prop_oneof![
        Just(ChecksumAlgorithm::Crc32),
        Just(ChecksumAlgorithm::Fnv1a),
        Just(ChecksumAlgorithm::Additive),
    ]
}

proptest! {
    #[test]
    fn prop_decode_inverts_encode(
        algo in algorithm(),
        opcode in any::<u16>(),
        body in prop::collection::vec(any::<u8>(), 0..MAX),
    ) {
        let codec = FrameCodec::new(algo, MAX);
        let bytes = codec.encode_frame(Opcode(opcode), &body).unwrap();

        match codec.decode_frame(&bytes).unwrap() {
            Decoded::Frame { packet, consumed } => {
                prop_assert_eq!(packet.opcode, Opcode(opcode));
                prop_assert_eq!(&packet.body[..], &body[..]);
                prop_assert_eq!(consumed, bytes.len());
            }
            Decoded::Incomplete { .. } => prop_assert!(false, "complete frame reported incomplete"),
        }
    }

    #[test]
    fn prop_single_byte_body_corruption_detected(
        // Additive sums can't see byte swaps but always see a single change;
        // CRC-32 and FNV-1a catch any single-byte error outright.
        algo in algorithm(),
        body in prop::collection::vec(any::<u8>(), 1..512),
        index in any::<prop::sample::Index>(),
        flip in 1u8..=255,
    ) {
        let codec = FrameCodec::new(algo, MAX);
        let mut bytes = codec.encode_frame(Opcode(0x0100), &body).unwrap();
        let at = HEADER_LEN + index.index(body.len());
        bytes[at] ^= flip;

        let is_mismatch = matches!(
            codec.decode_frame(&bytes),
            Err(ProtocolError::ChecksumMismatch { .. })
        );
        prop_assert!(is_mismatch);
    }

    #[test]
    fn prop_every_strict_prefix_is_incomplete(
        body in prop::collection::vec(any::<u8>(), 0..256),
        cut in any::<prop::sample::Index>(),
    ) {
        let codec = FrameCodec::default();
        let bytes = codec.encode_frame(Opcode(0x0100), &body).unwrap();
        let len = cut.index(bytes.len());

        let is_incomplete = matches!(
            codec.decode_frame(&bytes[..len]).unwrap(),
            Decoded::Incomplete { .. }
        );
        prop_assert!(is_incomplete);
    }
}
