//! Merged-mining auxiliary proof-of-work tree construction.
//!
//! Every merge-mined chain's block hash occupies one leaf of a small
//! merkle tree embedded in the primary chain's coinbase, with its leaf
//! index derived from a fixed LCG keyed by the chain's `chain_id` and a
//! tree-wide nonce (conventionally 0). The tree must have no two chains
//! colliding on the same slot; when they do, the tree size is doubled and
//! slots are recomputed until they don't.

use std::collections::HashMap;

use crate::hashing::double_sha256;
use crate::Hash;

/// The `\xfa\xbemm` magic four bytes tagging a merged-mining commitment in
/// a coinbase scriptSig.
pub const MERGED_MINING_TAG: [u8; 4] = [0xfa, 0xbe, b'm', b'm'];

/// Assignment of merge-mined chains to merkle tree leaves.
pub struct AuxPowTree {
    /// Power-of-two leaf count.
    pub size: u32,
    /// The nonce used to derive slot indices (always 0 here; kept as a
    /// field because the wire commitment needs to encode it).
    pub nonce: u32,
    /// chain_id -> leaf index.
    slots: HashMap<u32, u32>,
}

impl AuxPowTree {
    pub fn slot_for(&self, chain_id: u32) -> Option<u32> {
        self.slots.get(&chain_id).copied()
    }
}

/// The LCG used by the merged-mining spec to pick a chain's leaf index
/// within a tree of the given size.
fn expected_index(nonce: u32, chain_id: u32, size: u32) -> u32 {
    let mut rand = nonce as u64;
    rand = rand.wrapping_mul(1_103_515_245).wrapping_add(12_345);
    rand = rand.wrapping_add(chain_id as u64);
    rand = rand.wrapping_mul(1_103_515_245).wrapping_add(12_345);
    (rand % size as u64) as u32
}

/// Builds the smallest power-of-two tree (with nonce fixed at 0 — pools
/// rarely merge-mine enough chains to collide at the smallest size, so a
/// nonce search is unnecessary) that assigns every `chain_id` in
/// `chain_ids` a distinct slot.
///
/// `chain_ids` need not be sorted; iteration order does not affect the
/// resulting tree.
pub fn build_auxpow_tree(chain_ids: &[u32]) -> AuxPowTree {
    let nonce = 0u32;
    let mut size = 1u32;
    loop {
        let mut slots = HashMap::new();
        let mut collision = false;
        for &chain_id in chain_ids {
            let idx = expected_index(nonce, chain_id, size);
            if slots.insert(idx, chain_id).is_some() {
                collision = true;
                break;
            }
        }
        if !collision {
            return AuxPowTree {
                size,
                nonce,
                slots: chain_ids
                    .iter()
                    .map(|&id| (id, expected_index(nonce, id, size)))
                    .collect(),
            };
        }
        size *= 2;
    }
}

/// Builds the `\xfa\xbemm<merkle_root><size><nonce>` commitment bytes
/// embedded in a merge-mining coinbase scriptSig, given each merge-mined
/// chain's current block hash keyed by chain_id.
///
/// `aux_hashes` must contain an entry for every chain_id the tree assigns a
/// slot to; chains with no pending work contribute an all-zero hash at
/// their slot.
pub fn build_mm_commitment(tree: &AuxPowTree, aux_hashes: &HashMap<u32, Hash>) -> Vec<u8> {
    let mut leaves = vec![[0u8; 32]; tree.size as usize];
    for (&chain_id, &slot) in &tree.slots {
        if let Some(hash) = aux_hashes.get(&chain_id) {
            leaves[slot as usize] = *hash;
        }
    }
    let root = aux_merkle_root(&leaves);

    let mut out = Vec::with_capacity(4 + 32 + 4 + 4);
    out.extend_from_slice(&MERGED_MINING_TAG);
    out.extend_from_slice(&root);
    out.extend_from_slice(&tree.size.to_le_bytes());
    out.extend_from_slice(&tree.nonce.to_le_bytes());
    out
}

/// The merkle root over aux chain leaves. Unlike the primary chain's
/// merkle tree, an empty/odd level is padded with zero hashes rather than
/// duplicating the last leaf, matching `bitcoin_data.merkle_hash`'s
/// handling of a single-leaf tree.
fn aux_merkle_root(leaves: &[Hash]) -> Hash {
    if leaves.is_empty() {
        return [0u8; 32];
    }
    let mut level = leaves.to_vec();
    while level.len() > 1 {
        if level.len() % 2 == 1 {
            level.push([0u8; 32]);
        }
        level = level
            .chunks(2)
            .map(|pair| {
                let mut buf = [0u8; 64];
                buf[..32].copy_from_slice(&pair[0]);
                buf[32..].copy_from_slice(&pair[1]);
                double_sha256(&buf)
            })
            .collect();
    }
    level[0]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_chain_gets_a_slot_in_a_size_one_tree() {
        let tree = build_auxpow_tree(&[1]);
        assert_eq!(tree.size, 1);
        assert_eq!(tree.slot_for(1), Some(0));
    }

    #[test]
    fn colliding_chains_double_the_tree_until_distinct() {
        let tree = build_auxpow_tree(&[1, 2, 3, 4]);
        let mut seen = std::collections::HashSet::new();
        for chain_id in [1u32, 2, 3, 4] {
            let slot = tree.slot_for(chain_id).expect("chain has a slot");
            assert!(seen.insert(slot), "slot {slot} assigned twice");
        }
    }

    #[test]
    fn commitment_starts_with_magic_tag() {
        let tree = build_auxpow_tree(&[7]);
        let mut hashes = HashMap::new();
        hashes.insert(7u32, [0xAAu8; 32]);
        let commitment = build_mm_commitment(&tree, &hashes);
        assert_eq!(&commitment[..4], &MERGED_MINING_TAG);
    }

    #[test]
    fn missing_chain_hash_defaults_to_zero_leaf() {
        let tree = build_auxpow_tree(&[1, 2]);
        let hashes = HashMap::new();
        // Should not panic even with no hashes supplied.
        let _ = build_mm_commitment(&tree, &hashes);
    }
}
