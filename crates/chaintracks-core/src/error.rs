//! Error types for header primitives.

use crate::hash::BlockHash;
use crate::height_range::HeightRange;

/// Errors raised by the header codec, work arithmetic, and interval algebra.
///
/// Variants split along the taxonomy used throughout the engine: malformed
/// input is rejected immediately, while `BrokenChain`, `DeniedHash`, and
/// `GenesisMismatch` signal data integrity failures that must never be
/// retried.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// A hash string or byte slice could not be parsed.
    #[error("invalid hash: {0}")]
    InvalidHash(String),
    /// A header was not exactly 80 bytes.
    #[error("invalid header length {0}, want {want}", want = crate::header::HEADER_SIZE)]
    InvalidHeaderLength(usize),
    /// A header buffer was not a whole number of 80-byte headers.
    #[error("header buffer length {0} is not a multiple of {want}", want = crate::header::HEADER_SIZE)]
    InvalidBufferLength(usize),
    /// A compact difficulty encoding could not be decoded.
    #[error("compact bits {bits:#010x} invalid: {reason}")]
    InvalidBits {
        /// The offending compact encoding.
        bits: u32,
        /// Why it was rejected.
        reason: &'static str,
    },
    /// Adding chain work exceeded the 256-bit range.
    #[error("chain work overflow")]
    WorkOverflow,
    /// Subtracting chain work went below zero.
    #[error("chain work underflow")]
    WorkUnderflow,
    /// A header's previous-hash field does not match its predecessor.
    #[error("header at height {height} links to {actual}, expected {expected}")]
    BrokenChain {
        /// Height of the offending header.
        height: u32,
        /// Hash the header was required to link to.
        expected: BlockHash,
        /// Hash the header actually links to.
        actual: BlockHash,
    },
    /// A header hash appears on the configured denylist.
    #[error("header hash {hash} at height {height} is denylisted")]
    DeniedHash {
        /// The denylisted hash.
        hash: BlockHash,
        /// Height at which it was encountered.
        height: u32,
    },
    /// A height-zero buffer did not begin with the canonical genesis header.
    #[error("buffer does not begin with the {0} genesis header")]
    GenesisMismatch(crate::chain::Chain),
    /// Two ranges neither touch nor overlap, so their union is not an interval.
    #[error("cannot union {a} with {b}: ranges neither touch nor overlap")]
    RangeGap {
        /// Left operand.
        a: HeightRange,
        /// Right operand.
        b: HeightRange,
    },
    /// Subtraction would leave two disjoint pieces rather than one interval.
    #[error("subtracting {b} from {a} would split the range")]
    RangeSplit {
        /// Range being subtracted from.
        a: HeightRange,
        /// Range being removed.
        b: HeightRange,
    },
    /// An unrecognized chain name.
    #[error("unsupported chain: {0}")]
    UnsupportedChain(String),
}
