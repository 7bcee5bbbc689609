//! Merkle root over a block's transaction hashes
//!
//! Binds a block's hash to the exact ordered transaction list, coinbase first.

use super::{hash_pair, Hash};

/// Compute the merkle root of a list of hashes.
///
/// Empty input gives the zero hash; an odd level pairs its last element
/// with itself.
pub fn compute_merkle_root(hashes: &[Hash]) -> Hash {
    let mut level: Vec<Hash> = hashes.to_vec();
    if level.is_empty() {
        return Hash::zero();
    }

    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| hash_pair(&pair[0], pair.last().unwrap_or(&pair[0])))
            .collect();
    }

    level[0]
}
