//! SHA-256 digests, independent of any session cipher.

use sha2::{Digest as _, Sha256};

pub const DIGEST_LEN: usize = 32;

pub type Digest = [u8; DIGEST_LEN];

pub fn hash(data: &[u8]) -> Digest {
    Sha256::digest(data).into()
}

/// Compares two digests without short-circuiting on the first difference.
pub fn digests_equal(a: &Digest, b: &Digest) -> bool {
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
