//! The 32-byte block hash type and digest helpers.
//!
//! A `BlockHash` stores bytes in internal (little-endian) order and
//! displays as byte-reversed hex, matching Bitcoin's convention for block
//! hashes and merkle roots.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::error::CoreError;

/// Size of a block hash in bytes.
pub const HASH_SIZE: usize = 32;

/// A 32-byte hash used for block hashes and merkle roots.
///
/// When displayed as a string the bytes are reversed, so the internal
/// bytes `[0x06, 0xe5, ...]` render as `"...e506"`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default, PartialOrd, Ord)]
pub struct BlockHash([u8; HASH_SIZE]);

impl BlockHash {
    /// The all-zero hash, used as the previous-hash of a genesis header.
    pub const ZERO: BlockHash = BlockHash([0u8; HASH_SIZE]);

    /// Create a hash from raw bytes already in internal order.
    pub const fn new(bytes: [u8; HASH_SIZE]) -> Self {
        BlockHash(bytes)
    }

    /// Create a hash from a byte slice in internal order.
    ///
    /// # Returns
    /// `Ok(BlockHash)` if the slice is exactly 32 bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CoreError> {
        if bytes.len() != HASH_SIZE {
            return Err(CoreError::InvalidHash(format!(
                "invalid hash length of {}, want {}",
                bytes.len(),
                HASH_SIZE
            )));
        }
        let mut arr = [0u8; HASH_SIZE];
        arr.copy_from_slice(bytes);
        Ok(BlockHash(arr))
    }

    /// Create a hash from a byte-reversed (display order) hex string.
    ///
    /// Shorter strings are zero-padded on the high end, so stripped
    /// leading zeros still parse to the same hash.
    pub fn from_hex(hex_str: &str) -> Result<Self, CoreError> {
        if hex_str.len() > HASH_SIZE * 2 {
            return Err(CoreError::InvalidHash(format!(
                "max hash string length is {} characters",
                HASH_SIZE * 2
            )));
        }
        let padded = if hex_str.len() % 2 != 0 {
            format!("0{hex_str}")
        } else {
            hex_str.to_string()
        };
        let decoded = hex::decode(&padded)
            .map_err(|e| CoreError::InvalidHash(e.to_string()))?;

        // Right-align in display order, then reverse into internal order.
        let mut display = [0u8; HASH_SIZE];
        display[HASH_SIZE - decoded.len()..].copy_from_slice(&decoded);
        let mut internal = [0u8; HASH_SIZE];
        for i in 0..HASH_SIZE {
            internal[i] = display[HASH_SIZE - 1 - i];
        }
        Ok(BlockHash(internal))
    }

    /// Access the internal byte array.
    pub fn as_bytes(&self) -> &[u8; HASH_SIZE] {
        &self.0
    }

    /// True for the all-zero hash.
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; HASH_SIZE]
    }
}

impl fmt::Display for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut reversed = self.0;
        reversed.reverse();
        write!(f, "{}", hex::encode(reversed))
    }
}

impl FromStr for BlockHash {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BlockHash::from_hex(s)
    }
}

impl Serialize for BlockHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for BlockHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        BlockHash::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Compute SHA-256 of the input data.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Compute double SHA-256, the digest used for block hashes.
pub fn sha256d(data: &[u8]) -> [u8; 32] {
    sha256(&sha256(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Mainnet genesis hash in internal (little-endian) order.
    const GENESIS_HASH: BlockHash = BlockHash([
        0x6f, 0xe2, 0x8c, 0x0a, 0xb6, 0xf1, 0xb3, 0x72,
        0xc1, 0xa6, 0xa2, 0x46, 0xae, 0x63, 0xf7, 0x4f,
        0x93, 0x1e, 0x83, 0x65, 0xe1, 0x5a, 0x08, 0x9c,
        0x68, 0xd6, 0x19, 0x00, 0x00, 0x00, 0x00, 0x00,
    ]);

    #[test]
    fn display_is_byte_reversed() {
        assert_eq!(
            GENESIS_HASH.to_string(),
            "000000000019d6689c085ae165831e934ff763ae46a2a6c172b3f1b60a8ce26f"
        );
    }

    #[test]
    fn from_hex_round_trips() {
        let parsed = BlockHash::from_hex(
            "000000000019d6689c085ae165831e934ff763ae46a2a6c172b3f1b60a8ce26f",
        )
        .unwrap();
        assert_eq!(parsed, GENESIS_HASH);

        // Stripped leading zeros parse to the same hash.
        let short = BlockHash::from_hex("19d6689c085ae165831e934ff763ae46a2a6c172b3f1b60a8ce26f")
            .unwrap();
        assert_eq!(short, GENESIS_HASH);
    }

    #[test]
    fn from_hex_rejects_bad_input() {
        assert!(BlockHash::from_hex(&"0".repeat(65)).is_err());
        assert!(BlockHash::from_hex("xyz").is_err());
        assert!(BlockHash::from_bytes(&[0u8; 31]).is_err());
    }

    #[test]
    fn serde_round_trips_as_hex_string() {
        let json = serde_json::to_string(&GENESIS_HASH).unwrap();
        assert_eq!(
            json,
            r#""000000000019d6689c085ae165831e934ff763ae46a2a6c172b3f1b60a8ce26f""#
        );
        let back: BlockHash = serde_json::from_str(&json).unwrap();
        assert_eq!(back, GENESIS_HASH);
    }

    #[test]
    fn sha256d_is_deterministic() {
        let a = sha256d(b"chaintracks");
        let b = sha256d(b"chaintracks");
        assert_eq!(a, b);
        assert_ne!(a, sha256(b"chaintracks"));
    }
}
