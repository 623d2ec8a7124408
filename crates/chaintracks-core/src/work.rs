//! Compact difficulty decoding and cumulative chain-work arithmetic.
//!
//! Chain work is carried as a 32-byte big-endian unsigned value rendered
//! as 64 hex characters, a representation that survives JSON documents and
//! record stores unchanged. Arithmetic goes through `U256`.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use primitive_types::U256;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::CoreError;

/// Cumulative proof-of-work, a 256-bit unsigned value in big-endian bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
pub struct ChainWork([u8; 32]);

impl ChainWork {
    /// Zero work, the value before any header has been accumulated.
    pub const ZERO: ChainWork = ChainWork([0u8; 32]);

    /// Wrap raw big-endian bytes.
    pub const fn from_be_bytes(bytes: [u8; 32]) -> Self {
        ChainWork(bytes)
    }

    /// The big-endian byte representation.
    pub fn to_be_bytes(&self) -> [u8; 32] {
        self.0
    }

    /// Convert from a `U256`.
    pub fn from_u256(value: U256) -> Self {
        ChainWork(value.to_big_endian())
    }

    /// Convert to a `U256` for arithmetic.
    pub fn to_u256(&self) -> U256 {
        U256::from_big_endian(&self.0)
    }

    /// Add another work value, failing on 256-bit overflow.
    pub fn add_work(&self, other: &ChainWork) -> Result<ChainWork, CoreError> {
        self.to_u256()
            .checked_add(other.to_u256())
            .map(ChainWork::from_u256)
            .ok_or(CoreError::WorkOverflow)
    }

    /// Subtract another work value, failing when it exceeds this one.
    pub fn sub_work(&self, other: &ChainWork) -> Result<ChainWork, CoreError> {
        self.to_u256()
            .checked_sub(other.to_u256())
            .map(ChainWork::from_u256)
            .ok_or(CoreError::WorkUnderflow)
    }

    /// True when this value is strictly greater than `other`.
    ///
    /// Equal work is not "more": ties keep whichever chain tip was seen
    /// first.
    pub fn is_more_work(&self, other: &ChainWork) -> bool {
        self.to_u256() > other.to_u256()
    }
}

impl PartialOrd for ChainWork {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ChainWork {
    fn cmp(&self, other: &Self) -> Ordering {
        // Big-endian bytes compare like the numbers they encode.
        self.0.cmp(&other.0)
    }
}

impl fmt::Display for ChainWork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl FromStr for ChainWork {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() > 64 {
            return Err(CoreError::InvalidHash(format!(
                "chain work hex is {} characters, max 64",
                s.len()
            )));
        }
        let padded = format!("{s:0>64}");
        let decoded = hex::decode(&padded)
            .map_err(|e| CoreError::InvalidHash(e.to_string()))?;
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&decoded);
        Ok(ChainWork(bytes))
    }
}

impl Serialize for ChainWork {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ChainWork {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Decode a compact 4-byte difficulty encoding into a 256-bit target.
///
/// The low 23 bits are a mantissa, bit 23 is a sign flag (always invalid
/// for targets), and the high byte is a base-256 exponent.
pub fn bits_to_target(bits: u32) -> Result<U256, CoreError> {
    let size = bits >> 24;
    let word = bits & 0x007f_ffff;

    if bits & 0x0080_0000 != 0 {
        return Err(CoreError::InvalidBits {
            bits,
            reason: "negative sign bit set",
        });
    }
    if word == 0 {
        return Err(CoreError::InvalidBits {
            bits,
            reason: "zero mantissa",
        });
    }
    let overflow =
        size > 34 || (word > 0xff && size > 33) || (word > 0xffff && size > 32);
    if overflow {
        return Err(CoreError::InvalidBits {
            bits,
            reason: "target overflows 256 bits",
        });
    }

    let target = if size <= 3 {
        U256::from(word >> (8 * (3 - size)))
    } else {
        U256::from(word) << (8 * (size - 3))
    };
    if target.is_zero() {
        return Err(CoreError::InvalidBits {
            bits,
            reason: "zero target",
        });
    }
    Ok(target)
}

/// Convert a compact difficulty encoding into the work one conforming
/// header contributes: `((2^256 - 1 - target) / (target + 1)) + 1`.
pub fn bits_to_work(bits: u32) -> Result<ChainWork, CoreError> {
    let target = bits_to_target(bits)?;
    let work = (!target / (target + U256::one())) + U256::one();
    Ok(ChainWork::from_u256(work))
}
