//! Sealed key proposals.
//!
//! The client encrypts its proposed session key to the server's static
//! X25519 public key using a one-shot ephemeral keypair:
//!
//! ```text
//! ephemeral_public (32) | nonce (12) | ciphertext + tag
//! ```
//!
//! The wrapping key is `HKDF-SHA256(salt = eph_pub || server_pub,
//! ikm = X25519(eph, server))`, and the ephemeral public key is bound as
//! associated data. Only the holder of the server's private key can open
//! the box.

use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};
use hkdf::Hkdf;
use rand::Rng;
use sha2::Sha256;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroizing;

use crate::keys::KEY_LEN;
use crate::symmetric::{NONCE_LEN, TAG_LEN};
use crate::{CryptoError, ServerKeyPair};

const WRAP_INFO: &[u8] = b"wyvern key proposal v1";

/// Bytes a sealed box adds on top of its plaintext.
pub const SEAL_OVERHEAD: usize = KEY_LEN + NONCE_LEN + TAG_LEN;

/// Seals `plaintext` so that only the owner of `recipient` can read it.
///
/// # Errors
/// [`CryptoError::WeakKeyExchange`] if `recipient` is a low-order point.
pub fn seal_for(recipient: &[u8; KEY_LEN], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let eph_bytes: Zeroizing<[u8; KEY_LEN]> = Zeroizing::new(rand::rng().random());
    let ephemeral = StaticSecret::from(*eph_bytes);
    let eph_public = PublicKey::from(&ephemeral);

    let shared = ephemeral.diffie_hellman(&PublicKey::from(*recipient));
    if !shared.was_contributory() {
        return Err(CryptoError::WeakKeyExchange);
    }
    let wrap = wrapping_key(shared.as_bytes(), eph_public.as_bytes(), recipient)?;

    let nonce: [u8; NONCE_LEN] = rand::rng().random();
    let cipher =
        ChaCha20Poly1305::new_from_slice(wrap.as_slice()).map_err(|_| CryptoError::Encrypt)?;
    let ciphertext = cipher
        .encrypt(
            Nonce::from_slice(&nonce),
            Payload {
                msg: plaintext,
                aad: eph_public.as_bytes(),
            },
        )
        .map_err(|_| CryptoError::Encrypt)?;

    let mut out = Vec::with_capacity(SEAL_OVERHEAD + plaintext.len());
    out.extend_from_slice(eph_public.as_bytes());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Opens a box produced by [`seal_for`] with the server's private key.
///
/// Every failure (short input, wrong keypair, tampering) collapses into
/// [`CryptoError::Decrypt`] or [`CryptoError::WeakKeyExchange`].
pub(crate) fn open_sealed(
    keypair: &ServerKeyPair,
    sealed: &[u8],
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    if sealed.len() < SEAL_OVERHEAD {
        return Err(CryptoError::Decrypt);
    }
    let (eph_public, rest) = sealed.split_at(KEY_LEN);
    let (nonce, ciphertext) = rest.split_at(NONCE_LEN);
    let eph_public: [u8; KEY_LEN] = eph_public.try_into().map_err(|_| CryptoError::Decrypt)?;

    let shared = keypair.diffie_hellman(&eph_public)?;
    let wrap = wrapping_key(shared.as_slice(), &eph_public, &keypair.public_key())?;

    let cipher =
        ChaCha20Poly1305::new_from_slice(wrap.as_slice()).map_err(|_| CryptoError::Decrypt)?;
    let plaintext = cipher
        .decrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad: &eph_public,
            },
        )
        .map_err(|_| CryptoError::Decrypt)?;
    Ok(Zeroizing::new(plaintext))
}

fn wrapping_key(
    shared: &[u8],
    eph_public: &[u8; KEY_LEN],
    recipient: &[u8; KEY_LEN],
) -> Result<Zeroizing<[u8; KEY_LEN]>, CryptoError> {
    let mut salt = [0u8; KEY_LEN * 2];
    salt[..KEY_LEN].copy_from_slice(eph_public);
    salt[KEY_LEN..].copy_from_slice(recipient);

    let hk = Hkdf::<Sha256>::new(Some(&salt), shared);
    let mut okm = Zeroizing::new([0u8; KEY_LEN]);
    hk.expand(WRAP_INFO, okm.as_mut_slice())
        .map_err(|_| CryptoError::InvalidKeyLength {
            expected: KEY_LEN,
            actual: 0,
        })?;
    Ok(okm)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_then_open_with_matching_keypair() {
        let server = ServerKeyPair::generate();
        let sealed = seal_for(&server.public_key(), b"proposal").unwrap();

        assert_eq!(sealed.len(), SEAL_OVERHEAD + 8);
        let opened = open_sealed(&server, &sealed).unwrap();
        assert_eq!(opened.as_slice(), b"proposal");
    }

    #[test]
    fn test_open_with_mismatched_keypair_fails() {
        let intended = ServerKeyPair::generate();
        let other = ServerKeyPair::generate();
        let sealed = seal_for(&intended.public_key(), b"proposal").unwrap();

        let result = open_sealed(&other, &sealed);
        assert!(matches!(result, Err(CryptoError::Decrypt)));
    }

    #[test]
    fn test_open_tampered_ciphertext_fails() {
        let server = ServerKeyPair::generate();
        let mut sealed = seal_for(&server.public_key(), b"proposal").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;

        assert!(matches!(open_sealed(&server, &sealed), Err(CryptoError::Decrypt)));
    }

    #[test]
    fn test_open_truncated_input_fails() {
        let server = ServerKeyPair::generate();
        let result = open_sealed(&server, &[0u8; SEAL_OVERHEAD - 1]);
        assert!(matches!(result, Err(CryptoError::Decrypt)));
    }

    #[test]
    fn test_seal_same_plaintext_twice_differs() {
        let server = ServerKeyPair::generate();
        let a = seal_for(&server.public_key(), b"same").unwrap();
        let b = seal_for(&server.public_key(), b"same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_seal_for_low_order_point_rejected() {
        let result = seal_for(&[0u8; KEY_LEN], b"x");
        assert!(matches!(result, Err(CryptoError::WeakKeyExchange)));
    }
}
