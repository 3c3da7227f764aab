//! Crypto Provider for Wyvern.
//!
//! Three primitives, nothing more:
//!
//! - **Asymmetric**: a sealed box (X25519 + HKDF-SHA256 +
//!   ChaCha20-Poly1305) carrying the client's key proposal to the server.
//!   [`seal_for`] is the client half, [`CryptoProvider::asymmetric_decrypt`]
//!   the server half.
//! - **Symmetric**: [`SessionCipher`], an AEAD keyed once per session.
//! - **Hash**: SHA-256, for confirmation digests and stored credentials.
//!
//! Key types redact themselves in `Debug` output and zero their memory on
//! drop. There is no way to read the server's private key back out.

mod asymmetric;
mod error;
pub mod hash;
mod keys;
mod provider;
mod symmetric;

pub use asymmetric::{SEAL_OVERHEAD, seal_for};
pub use error::CryptoError;
pub use hash::{DIGEST_LEN, Digest, digests_equal, hash};
pub use keys::{KEY_LEN, ServerKeyPair, SessionKey};
pub use provider::CryptoProvider;
pub use symmetric::{CipherSuite, NONCE_LEN, SYMMETRIC_OVERHEAD, SessionCipher, TAG_LEN};

pub use zeroize::Zeroizing;
