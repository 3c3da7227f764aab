//! Error types for the crypto layer.
//!
//! Messages stay vague: a peer is never told *why* a ciphertext
//! failed to open.

/// Errors produced by the Crypto Provider.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// Ciphertext was malformed, truncated, tampered with, or sealed for a
    /// different key.
    #[error("decryption failed")]
    Decrypt,

    /// The cipher refused to encrypt (only possible on absurd lengths).
    #[error("encryption failed")]
    Encrypt,

    /// Key material of the wrong size.
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    /// The peer's public key is a low-order point, so the exchange would
    /// yield a predictable secret.
    #[error("non-contributory key exchange")]
    WeakKeyExchange,

    /// Unknown cipher suite identifier.
    #[error("unknown cipher suite: {0}")]
    UnknownCipherSuite(String),
}
