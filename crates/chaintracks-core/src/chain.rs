//! Chain selection, genesis constants, and header-buffer validation.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::hash::BlockHash;
use crate::header::{BlockHeader, HEADER_SIZE};
use crate::work::{bits_to_work, ChainWork};

/// The tracked chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Chain {
    /// The main network.
    Main,
    /// The test network.
    Test,
}

impl Chain {
    /// Short lowercase name, as used in file names and JSON documents.
    pub fn as_str(&self) -> &'static str {
        match self {
            Chain::Main => "main",
            Chain::Test => "test",
        }
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Chain {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "main" => Ok(Chain::Main),
            "test" => Ok(Chain::Test),
            other => Err(CoreError::UnsupportedChain(other.to_string())),
        }
    }
}

/// Merkle root shared by both genesis blocks, internal byte order.
const GENESIS_MERKLE_ROOT: [u8; 32] = [
    0x3b, 0xa3, 0xed, 0xfd, 0x7a, 0x7b, 0x12, 0xb2,
    0x7a, 0xc7, 0x2c, 0x3e, 0x67, 0x76, 0x8f, 0x61,
    0x7f, 0xc8, 0x1b, 0xc3, 0x88, 0x8a, 0x51, 0x32,
    0x3a, 0x9f, 0xb8, 0xaa, 0x4b, 0x1e, 0x5e, 0x4a,
];

/// Mainnet genesis block hash, internal byte order.
const GENESIS_HASH_MAIN: [u8; 32] = [
    0x6f, 0xe2, 0x8c, 0x0a, 0xb6, 0xf1, 0xb3, 0x72,
    0xc1, 0xa6, 0xa2, 0x46, 0xae, 0x63, 0xf7, 0x4f,
    0x93, 0x1e, 0x83, 0x65, 0xe1, 0x5a, 0x08, 0x9c,
    0x68, 0xd6, 0x19, 0x00, 0x00, 0x00, 0x00, 0x00,
];

/// Testnet genesis block hash, internal byte order.
const GENESIS_HASH_TEST: [u8; 32] = [
    0x43, 0x49, 0x7f, 0xd7, 0xf8, 0x26, 0x95, 0x71,
    0x08, 0xf4, 0xa3, 0x0f, 0xd9, 0xce, 0xc3, 0xae,
    0xba, 0x79, 0x97, 0x20, 0x84, 0xe9, 0x0e, 0xad,
    0x01, 0xea, 0x33, 0x09, 0x00, 0x00, 0x00, 0x00,
];

/// The canonical genesis header for a chain.
pub fn genesis_header(chain: Chain) -> BlockHeader {
    let (time, nonce) = match chain {
        Chain::Main => (1231006505, 2083236893),
        Chain::Test => (1296688602, 414098458),
    };
    BlockHeader {
        version: 1,
        previous_hash: BlockHash::ZERO,
        merkle_root: BlockHash::new(GENESIS_MERKLE_ROOT),
        time,
        bits: 0x1d00ffff,
        nonce,
    }
}

/// The canonical genesis block hash for a chain.
pub fn genesis_hash(chain: Chain) -> BlockHash {
    match chain {
        Chain::Main => BlockHash::new(GENESIS_HASH_MAIN),
        Chain::Test => BlockHash::new(GENESIS_HASH_TEST),
    }
}

/// The hash and cumulative work at the end of a validated run of headers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChainBoundary {
    /// Hash of the last header before (or at the end of) the run.
    pub hash: BlockHash,
    /// Cumulative chain work through that header.
    pub chain_work: ChainWork,
}

impl ChainBoundary {
    /// The boundary preceding genesis: zero hash, zero work.
    pub fn pre_genesis() -> Self {
        ChainBoundary {
            hash: BlockHash::ZERO,
            chain_work: ChainWork::ZERO,
        }
    }
}

/// Validate a buffer of consecutive serialized headers against the
/// boundary that precedes it.
///
/// Each header must link to the hash of its predecessor (the first to
/// `prev.hash`), must not appear on `denylist`, and contributes
/// `bits_to_work(bits)` to the running total. For a buffer starting at
/// height zero the first header must be the canonical genesis header of
/// `chain`.
///
/// Returns the boundary after the last header. Any failure is a data
/// integrity error; the buffer must be discarded, not retried.
pub fn validate_header_buffer(
    chain: Chain,
    first_height: u32,
    data: &[u8],
    prev: &ChainBoundary,
    denylist: &HashSet<BlockHash>,
) -> Result<ChainBoundary, CoreError> {
    if data.len() % HEADER_SIZE != 0 {
        return Err(CoreError::InvalidBufferLength(data.len()));
    }

    let mut boundary = *prev;
    for (i, raw) in data.chunks_exact(HEADER_SIZE).enumerate() {
        let height = first_height + i as u32;
        let header = BlockHeader::deserialize(raw)?;

        if height == 0 {
            if header != genesis_header(chain) {
                return Err(CoreError::GenesisMismatch(chain));
            }
        } else if header.previous_hash != boundary.hash {
            return Err(CoreError::BrokenChain {
                height,
                expected: boundary.hash,
                actual: header.previous_hash,
            });
        }

        let hash = header.hash();
        if denylist.contains(&hash) {
            return Err(CoreError::DeniedHash { hash, height });
        }

        boundary = ChainBoundary {
            hash,
            chain_work: boundary.chain_work.add_work(&bits_to_work(header.bits)?)?,
        };
    }
    Ok(boundary)
}
