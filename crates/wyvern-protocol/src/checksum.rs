//! Frame checksums.
//!
//! The algorithm a given game client uses is something you find out by
//! reverse engineering it, so the codec doesn't hard-code one. Anything that
//! implements [`Checksum`] can be plugged into
//! [`FrameCodec`](crate::FrameCodec); [`ChecksumAlgorithm`] covers the
//! common choices and can be picked by name from configuration.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ProtocolError;

/// A 32-bit checksum over a frame.
///
/// The codec feeds the header fields (minus the checksum itself) and the
/// body as separate slices so implementations never need to allocate a
/// contiguous copy of the frame.
pub trait Checksum: Send + Sync + 'static {
    /// Computes the checksum over `parts`, in order.
    fn compute(&self, parts: &[&[u8]]) -> u32;
}

/// Built-in checksum algorithms, selectable by identifier.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumAlgorithm {
    /// CRC-32 (IEEE), the polynomial zlib uses.
    #[default]
    Crc32,
    /// 32-bit FNV-1a.
    Fnv1a,
    /// Wrapping byte sum. Weak, but some older clients use exactly this.
    Additive,
}

impl ChecksumAlgorithm {
    /// The identifier used in configuration files.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Crc32 => "crc32",
            Self::Fnv1a => "fnv1a",
            Self::Additive => "additive",
        }
    }
}

impl Checksum for ChecksumAlgorithm {
    fn compute(&self, parts: &[&[u8]]) -> u32 {
        match self {
            Self::Crc32 => {
                let mut hasher = crc32fast::Hasher::new();
                for part in parts {
                    hasher.update(part);
                }
                hasher.finalize()
            }
            Self::Fnv1a => {
                let mut hash = FNV_OFFSET_BASIS;
                for byte in parts.iter().flat_map(|p| p.iter()) {
                    hash ^= u32::from(*byte);
                    hash = hash.wrapping_mul(FNV_PRIME);
                }
                hash
            }
            Self::Additive => parts
                .iter()
                .flat_map(|p| p.iter())
                .fold(0u32, |acc, b| acc.wrapping_add(u32::from(*b))),
        }
    }
}

const FNV_OFFSET_BASIS: u32 = 0x811C_9DC5;
const FNV_PRIME: u32 = 0x0100_0193;

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChecksumAlgorithm {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "crc32" => Ok(Self::Crc32),
            "fnv1a" => Ok(Self::Fnv1a),
            "additive" => Ok(Self::Additive),
            other => Err(ProtocolError::InvalidMessage(format!(
                "unknown checksum algorithm: {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc32_matches_known_vector() {
        // zlib.crc32(b"123456789") == 0xCBF43926
        let sum = ChecksumAlgorithm::Crc32.compute(&[b"123456789"]);
        assert_eq!(sum, 0xCBF4_3926);
    }

    #[test]
    fn test_fnv1a_matches_known_vectors() {
        assert_eq!(ChecksumAlgorithm::Fnv1a.compute(&[b""]), 0x811C_9DC5);
        assert_eq!(ChecksumAlgorithm::Fnv1a.compute(&[b"a"]), 0xE40C_292C);
        assert_eq!(ChecksumAlgorithm::Fnv1a.compute(&[b"hello"]), 0x4F9F_2CAB);
    }

    #[test]
    fn test_additive_wraps_byte_sum() {
        assert_eq!(ChecksumAlgorithm::Additive.compute(&[&[1, 2, 3]]), 6);
        assert_eq!(ChecksumAlgorithm::Additive.compute(&[&[0xFF; 4]]), 1020);
    }

    #[test]
    fn test_compute_split_parts_equals_contiguous() {
        // The codec hashes header and body as separate slices; that must
        // give the same answer as hashing them back to back.
        for algo in [
            ChecksumAlgorithm::Crc32,
            ChecksumAlgorithm::Fnv1a,
            ChecksumAlgorithm::Additive,
        ] {
            let split = algo.compute(&[b"head", b"er-and-body"]);
            let whole = algo.compute(&[b"header-and-body"]);
            assert_eq!(split, whole, "{algo} differs when split");
        }
    }

    #[test]
    fn test_from_str_known_and_unknown_identifiers() {
        assert_eq!(
            "CRC32".parse::<ChecksumAlgorithm>().unwrap(),
            ChecksumAlgorithm::Crc32
        );
        assert_eq!(
            "additive".parse::<ChecksumAlgorithm>().unwrap(),
            ChecksumAlgorithm::Additive
        );
        assert!("md5".parse::<ChecksumAlgorithm>().is_err());
    }

    #[test]
    fn test_serde_uses_lowercase_identifier() {
        let json = serde_json::to_string(&ChecksumAlgorithm::Fnv1a).unwrap();
        assert_eq!(json, "\"fnv1a\"");
    }
}
