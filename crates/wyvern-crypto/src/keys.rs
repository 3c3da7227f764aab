//! Key material: the server's long-lived keypair and per-session keys.
//!
//! Neither type exposes its secret half through `Debug`, and both wipe
//! their bytes when dropped.

use std::fmt;

use rand::Rng;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::CryptoError;

/// Length of X25519 keys and of every symmetric session key.
pub const KEY_LEN: usize = 32;

/// The server's X25519 keypair used during the handshake.
///
/// Clients learn the public half from `HANDSHAKE_INIT` and seal their key
/// proposal to it. The private half never leaves this type.
pub struct ServerKeyPair {
    secret: StaticSecret,
    public: PublicKey,
}

impl ServerKeyPair {
    /// Generates a fresh keypair from the thread-local CSPRNG.
    pub fn generate() -> Self {
        let bytes: Zeroizing<[u8; KEY_LEN]> = Zeroizing::new(rand::rng().random());
        Self::from_secret_bytes(*bytes)
    }

    /// Rebuilds a keypair from stored secret bytes.
    pub fn from_secret_bytes(bytes: [u8; KEY_LEN]) -> Self {
        let secret = StaticSecret::from(bytes);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    pub fn public_key(&self) -> [u8; KEY_LEN] {
        self.public.to_bytes()
    }

    /// X25519 with a peer's public key.
    pub(crate) fn diffie_hellman(
        &self,
        peer_public: &[u8; KEY_LEN],
    ) -> Result<Zeroizing<[u8; KEY_LEN]>, CryptoError> {
        let shared = self.secret.diffie_hellman(&PublicKey::from(*peer_public));
        if !shared.was_contributory() {
            return Err(CryptoError::WeakKeyExchange);
        }
        Ok(Zeroizing::new(shared.to_bytes()))
    }
}

impl fmt::Debug for ServerKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerKeyPair")
            .field("public", &hex_prefix(self.public.as_bytes()))
            .finish_non_exhaustive()
    }
}

/// A symmetric key negotiated for exactly one session.
///
/// Generated by the client, carried to the server inside a sealed
/// proposal, and dropped (and zeroed) when the session ends.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionKey([u8; KEY_LEN]);

impl SessionKey {
    pub fn generate() -> Self {
        Self(rand::rng().random())
    }

    /// # Errors
    /// [`CryptoError::InvalidKeyLength`] unless `bytes` is exactly
    /// [`KEY_LEN`] long.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        let array: [u8; KEY_LEN] =
            bytes.try_into().map_err(|_| CryptoError::InvalidKeyLength {
                expected: KEY_LEN,
                actual: bytes.len(),
            })?;
        Ok(Self(array))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionKey(<redacted>)")
    }
}

fn hex_prefix(bytes: &[u8]) -> String {
    let mut s: String = bytes.iter().take(4).map(|b| format!("{b:02x}")).collect();
    s.push('…');
    s
}
