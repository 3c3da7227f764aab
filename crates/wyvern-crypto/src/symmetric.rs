//! Per-session authenticated encryption.
//!
//! Every sealed body carries its own random nonce:
//!
//! ```text
//! nonce (12) | ciphertext | tag (16)
//! ```
//!
//! A 96-bit random nonce is safe for far more messages than any one session
//! will ever send under its key.

use std::fmt;
use std::str::FromStr;

use aes_gcm::Aes256Gcm;
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::{CryptoError, SessionKey};

pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;

/// Bytes [`SessionCipher::encrypt`] adds to a plaintext.
pub const SYMMETRIC_OVERHEAD: usize = NONCE_LEN + TAG_LEN;

/// Symmetric cipher used once the handshake has produced a session key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CipherSuite {
    #[default]
    #[serde(rename = "chacha20-poly1305")]
    ChaCha20Poly1305,
    #[serde(rename = "aes-256-gcm")]
    Aes256Gcm,
}

impl CipherSuite {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ChaCha20Poly1305 => "chacha20-poly1305",
            Self::Aes256Gcm => "aes-256-gcm",
        }
    }
}

impl fmt::Display for CipherSuite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CipherSuite {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chacha20-poly1305" => Ok(Self::ChaCha20Poly1305),
            "aes-256-gcm" => Ok(Self::Aes256Gcm),
            other => Err(CryptoError::UnknownCipherSuite(other.to_string())),
        }
    }
}

enum Engine {
    ChaCha(ChaCha20Poly1305),
    Aes(Box<Aes256Gcm>),
}

/// A cipher keyed once with a [`SessionKey`] and reused for every packet
/// of that session.
pub struct SessionCipher {
    suite: CipherSuite,
    engine: Engine,
}

impl SessionCipher {
    pub fn new(suite: CipherSuite, key: &SessionKey) -> Result<Self, CryptoError> {
        let bytes = key.as_bytes();
        let invalid = |_| CryptoError::InvalidKeyLength {
            expected: bytes.len(),
            actual: bytes.len(),
        };
        let engine = match suite {
            CipherSuite::ChaCha20Poly1305 => {
                Engine::ChaCha(ChaCha20Poly1305::new_from_slice(bytes).map_err(invalid)?)
            }
            CipherSuite::Aes256Gcm => {
                Engine::Aes(Box::new(Aes256Gcm::new_from_slice(bytes).map_err(invalid)?))
            }
        };
        Ok(Self { suite, engine })
    }

    pub fn suite(&self) -> CipherSuite {
        self.suite
    }

    /// Encrypts `plaintext`, authenticating `aad` alongside it.
    pub fn encrypt(&self, aad: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let nonce_bytes: [u8; NONCE_LEN] = rand::rng().random();
        let nonce = Nonce::from_slice(&nonce_bytes);
        let payload = Payload {
            msg: plaintext,
            aad,
        };
        let ciphertext = match &self.engine {
            Engine::ChaCha(c) => c.encrypt(nonce, payload),
            Engine::Aes(c) => c.encrypt(nonce, payload),
        }
        .map_err(|_| CryptoError::Encrypt)?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Reverses [`encrypt`](Self::encrypt). `aad` must match exactly.
    pub fn decrypt(&self, aad: &[u8], sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if sealed.len() < SYMMETRIC_OVERHEAD {
            return Err(CryptoError::Decrypt);
        }
        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce);
        let payload = Payload {
            msg: ciphertext,
            aad,
        };
        match &self.engine {
            Engine::ChaCha(c) => c.decrypt(nonce, payload),
            Engine::Aes(c) => c.decrypt(nonce, payload),
        }
        .map_err(|_| CryptoError::Decrypt)
    }
}

impl fmt::Debug for SessionCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCipher")
            .field("suite", &self.suite)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn both_suites() -> [CipherSuite; 2] {
        [CipherSuite::ChaCha20Poly1305, CipherSuite::Aes256Gcm]
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip_all_suites() {
        let key = SessionKey::generate();
        for suite in both_suites() {
            let cipher = SessionCipher::new(suite, &key).unwrap();
            let sealed = cipher.encrypt(b"aad", b"hello hunter").unwrap();
            assert_eq!(sealed.len(), SYMMETRIC_OVERHEAD + 12);
            assert_eq!(cipher.decrypt(b"aad", &sealed).unwrap(), b"hello hunter");
        }
    }

    #[test]
    fn test_decrypt_wrong_aad_fails() {
        let cipher = SessionCipher::new(CipherSuite::default(), &SessionKey::generate()).unwrap();
        let sealed = cipher.encrypt(&[0x00, 0x01], b"body").unwrap();
        let result = cipher.decrypt(&[0x01, 0x01], &sealed);
        assert!(matches!(result, Err(CryptoError::Decrypt)));
    }

    #[test]
    fn test_decrypt_with_other_key_fails() {
        let a = SessionCipher::new(CipherSuite::Aes256Gcm, &SessionKey::generate()).unwrap();
        let b = SessionCipher::new(CipherSuite::Aes256Gcm, &SessionKey::generate()).unwrap();
        let sealed = a.encrypt(b"", b"body").unwrap();
        assert!(matches!(b.decrypt(b"", &sealed), Err(CryptoError::Decrypt)));
    }

    #[test]
    fn test_decrypt_short_input_fails() {
        let cipher = SessionCipher::new(CipherSuite::default(), &SessionKey::generate()).unwrap();
        let result = cipher.decrypt(b"", &[0u8; SYMMETRIC_OVERHEAD - 1]);
        assert!(matches!(result, Err(CryptoError::Decrypt)));
    }

    #[test]
    fn test_encrypt_empty_plaintext() {
        let cipher = SessionCipher::new(CipherSuite::default(), &SessionKey::generate()).unwrap();
        let sealed = cipher.encrypt(b"", b"").unwrap();
        assert_eq!(sealed.len(), SYMMETRIC_OVERHEAD);
        assert!(cipher.decrypt(b"", &sealed).unwrap().is_empty());
    }

    #[test]
    fn test_cipher_suite_from_str() {
        assert_eq!(
            "aes-256-gcm".parse::<CipherSuite>().unwrap(),
            CipherSuite::Aes256Gcm
        );
        assert!(matches!(
            "rc4".parse::<CipherSuite>(),
            Err(CryptoError::UnknownCipherSuite(_))
        ));
    }

    #[test]
    fn test_cipher_suite_serde_names_match_display() {
        for suite in both_suites() {
            let json = serde_json::to_string(&suite).unwrap();
            assert_eq!(json, format!("\"{suite}\""));
        }
    }
}
