//! Property tests for sealed bodies on the wire.
//!
//! Every body the frame limit allows comes back unchanged after sealing,
//! framing, deframing and opening. Anything larger is refused before it
//! costs a sequence number.

use proptest::prelude::*;
use wyvern_crypto::{CipherSuite, SessionCipher, SessionKey};
use wyvern_protocol::{ChecksumAlgorithm, Decoded, FrameCodec, Opcode};
use wyvern_session::{SEALED_OVERHEAD, SecureChannel, SessionError};

const MAX_FRAME: usize = 2048;

fn suite() -> impl Strategy<Value = CipherSuite> {
    prop_oneof![
        Just(CipherSuite::ChaCha20Poly1305),
        Just(CipherSuite::Aes256Gcm),
    ]
}

/// Sender capped at `MAX_FRAME`, receiver sharing the same key.
fn channels(suite: CipherSuite) -> (SecureChannel, SecureChannel) {
    let key = SessionKey::generate();
    let tx = SecureChannel::new(SessionCipher::new(suite, &key).unwrap())
        .with_max_frame_length(MAX_FRAME);
    let rx = SecureChannel::new(SessionCipher::new(suite, &key).unwrap());
    (tx, rx)
}

proptest! {
    #[test]
    fn prop_sealed_body_survives_framing(
        suite in suite(),
        body in prop::collection::vec(any::<u8>(), 0..=MAX_FRAME - SEALED_OVERHEAD),
    ) {
        let (mut tx, mut rx) = channels(suite);
        let codec = FrameCodec::new(ChecksumAlgorithm::Crc32, MAX_FRAME);

        let sealed = tx.seal(Opcode(0x0100), &body).unwrap();
        let bytes = codec.encode_frame(sealed.opcode, &sealed.body).unwrap();
        let Decoded::Frame { packet, consumed } = codec.decode_frame(&bytes).unwrap() else {
            return Err(TestCaseError::fail("complete frame reported incomplete"));
        };

        prop_assert_eq!(consumed, bytes.len());
        let opened = rx.open(&packet).unwrap();
        prop_assert_eq!(&opened[..], &body[..]);
    }

    #[test]
    fn prop_body_over_limit_refused_and_channel_stays_in_step(
        suite in suite(),
        excess in 1usize..64,
    ) {
        let (mut tx, mut rx) = channels(suite);
        let too_big = vec![0u8; MAX_FRAME - SEALED_OVERHEAD + excess];

        let refused = matches!(
            tx.seal(Opcode(0x0100), &too_big),
            Err(SessionError::BodyTooLarge { .. })
        );
        prop_assert!(refused);
        prop_assert_eq!(tx.send_seq(), 0);

        let next = tx.seal(Opcode(0x0100), b"next").unwrap();
        prop_assert_eq!(&rx.open(&next).unwrap()[..], &b"next"[..]);
    }
}
