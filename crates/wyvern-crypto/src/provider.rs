//! The Crypto Provider: everything the handshake and session layers need,
//! behind one type that owns the server's private key.

use std::fmt;

use zeroize::Zeroizing;

use crate::asymmetric::open_sealed;
use crate::hash::Digest;
use crate::{CipherSuite, CryptoError, ServerKeyPair, SessionCipher, SessionKey};

/// Stateless apart from key material. Share it between sessions with an
/// `Arc`; nothing here needs `&mut self`.
pub struct CryptoProvider {
    keypair: ServerKeyPair,
    suite: CipherSuite,
}

impl CryptoProvider {
    pub fn new(keypair: ServerKeyPair, suite: CipherSuite) -> Self {
        Self { keypair, suite }
    }

    /// A provider with a freshly generated keypair.
    pub fn generate(suite: CipherSuite) -> Self {
        Self::new(ServerKeyPair::generate(), suite)
    }

    pub fn public_key(&self) -> [u8; 32] {
        self.keypair.public_key()
    }

    pub fn cipher_suite(&self) -> CipherSuite {
        self.suite
    }

    /// Opens a sealed key proposal with the server's private key.
    ///
    /// Fails with [`CryptoError::Decrypt`] on anything malformed; the caller
    /// fails that session's handshake and nothing else.
    pub fn asymmetric_decrypt(&self, ciphertext: &[u8]) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        open_sealed(&self.keypair, ciphertext).inspect_err(|e| {
            tracing::debug!(len = ciphertext.len(), error = %e, "key proposal rejected");
        })
    }

    /// Keys a reusable cipher for one session.
    pub fn session_cipher(&self, key: &SessionKey) -> Result<SessionCipher, CryptoError> {
        SessionCipher::new(self.suite, key)
    }

    /// One-off encryption. Sessions hold a [`SessionCipher`] instead.
    pub fn symmetric_encrypt(
        &self,
        key: &SessionKey,
        aad: &[u8],
        plaintext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        self.session_cipher(key)?.encrypt(aad, plaintext)
    }

    pub fn symmetric_decrypt(
        &self,
        key: &SessionKey,
        aad: &[u8],
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        self.session_cipher(key)?.decrypt(aad, ciphertext)
    }

    pub fn hash(&self, data: &[u8]) -> Digest {
        crate::hash::hash(data)
    }
}

impl fmt::Debug for CryptoProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CryptoProvider")
            .field("keypair", &self.keypair)
            .field("suite", &self.suite)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seal_for;

    #[test]
    fn test_asymmetric_decrypt_recovers_proposal() {
        let provider = CryptoProvider::generate(CipherSuite::default());
        let key = SessionKey::generate();
        let sealed = seal_for(&provider.public_key(), key.as_bytes()).unwrap();

        let opened = provider.asymmetric_decrypt(&sealed).unwrap();
        assert_eq!(opened.as_slice(), key.as_bytes());
    }

    #[test]
    fn test_asymmetric_decrypt_garbage_is_error_not_panic() {
        let provider = CryptoProvider::generate(CipherSuite::default());
        assert!(provider.asymmetric_decrypt(b"").is_err());
        assert!(provider.asymmetric_decrypt(&[0xFF; 200]).is_err());
    }

    #[test]
    fn test_symmetric_roundtrip_through_provider() {
        let provider = CryptoProvider::generate(CipherSuite::Aes256Gcm);
        let key = SessionKey::generate();
        let sealed = provider.symmetric_encrypt(&key, b"op", b"body").unwrap();
        let opened = provider.symmetric_decrypt(&key, b"op", &sealed).unwrap();
        assert_eq!(opened, b"body");
    }

    #[test]
    fn test_debug_redacts_private_key() {
        let keypair = ServerKeyPair::from_secret_bytes([0x11; crate::KEY_LEN]);
        let public = keypair.public_key();
        let provider = CryptoProvider::new(keypair, CipherSuite::ChaCha20Poly1305);
        let printed = format!("{provider:?}");

        assert!(printed.contains("ChaCha20Poly1305"));
        assert!(printed.contains("ServerKeyPair"));
        let prefix: String = public[..4].iter().map(|b| format!("{b:02x}")).collect();
        assert!(printed.contains(&prefix));

        // Nothing longer than the 4-byte public prefix may appear as hex.
        let longest_hex_run = printed
            .split(|c: char| !c.is_ascii_hexdigit())
            .map(str::len)
            .max()
            .unwrap_or(0);
        assert!(longest_hex_run <= 8, "key bytes leaked: {printed}");
    }

    #[test]
    fn test_hash_matches_free_function() {
        let provider = CryptoProvider::generate(CipherSuite::default());
        assert_eq!(provider.hash(b"hunter"), crate::hash(b"hunter"));
    }
}
