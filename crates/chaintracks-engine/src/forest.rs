//! Candidate-chain selection over a small in-memory forest.
//!
//! A fetch can surface competing branches for the same heights. The
//! forest keys every candidate by `(height, hash)`, accumulates chain
//! work upward from a trusted base boundary, and selects the
//! maximum-work tip deterministically (ties broken by smallest hash) so
//! the result never depends on arrival order.

use std::collections::{BTreeMap, HashMap};

use chaintracks_core::{bits_to_work, BlockHash, ChainBoundary, ChainHeader, ChainWork};

use crate::error::EngineError;

/// Select the maximum-chain-work consistent sub-chain from `candidates`.
///
/// `base` is the trusted boundary the chain must build on and
/// `base_height` the height of the first eligible candidate. Candidates
/// below the base, duplicates, and headers that do not connect to the
/// base through other candidates are discarded. Returns the winning
/// path in ascending height order; empty when nothing connects.
pub fn select_best_chain(
    base: &ChainBoundary,
    base_height: u32,
    candidates: &[ChainHeader],
) -> Result<Vec<ChainHeader>, EngineError> {
    // Deduplicate by (height, hash), dropping anything below the base.
    let mut nodes: HashMap<(u32, BlockHash), ChainHeader> = HashMap::new();
    let mut by_height: BTreeMap<u32, Vec<(u32, BlockHash)>> = BTreeMap::new();
    for candidate in candidates {
        if candidate.height < base_height {
            continue;
        }
        let key = (candidate.height, candidate.header.hash());
        if nodes.insert(key, *candidate).is_none() {
            by_height.entry(key.0).or_default().push(key);
        }
    }

    // Accumulate work upward; unreachable branches never enter `work`.
    let mut work: HashMap<(u32, BlockHash), ChainWork> = HashMap::new();
    for (height, keys) in &by_height {
        for key in keys {
            let node = &nodes[key];
            let parent_work = if *height == base_height {
                if node.header.previous_hash == base.hash {
                    Some(base.chain_work)
                } else {
                    None
                }
            } else {
                work.get(&(height - 1, node.header.previous_hash)).copied()
            };
            if let Some(parent_work) = parent_work {
                let total = parent_work.add_work(&bits_to_work(node.header.bits)?)?;
                work.insert(*key, total);
            }
        }
    }

    // Deterministic best tip: most work, then smallest hash.
    let Some((best_key, _)) = work.iter().max_by(|(ka, wa), (kb, wb)| {
        wa.cmp(wb).then_with(|| kb.1.cmp(&ka.1))
    }) else {
        return Ok(Vec::new());
    };

    // Walk the winning path back down to the base.
    let mut path = Vec::new();
    let mut key = *best_key;
    loop {
        let node = nodes[&key];
        path.push(node);
        if key.0 == base_height {
            break;
        }
        key = (key.0 - 1, node.header.previous_hash);
    }
    path.reverse();
    Ok(path)
}
