//! Double-SHA256 and the merkle tree helpers built on top of it.
//!
//! `getblocktemplate` hands back a flat list of transaction hashes; building
//! a job means turning that list into the fixed merkle *link* (the sibling
//! hashes needed to fold a coinbase hash up to the merkle root) once per
//! template, then letting each stratum session recompute just the root from
//! its own coinbase.

use sha2::{Digest, Sha256};

use crate::Hash;

/// SHA256(SHA256(data)), the hash Bitcoin-family chains use everywhere.
pub fn double_sha256(data: &[u8]) -> Hash {
    let first = Sha256::digest(data);
    let second = Sha256::digest(first);
    let mut out = [0u8; 32];
    out.copy_from_slice(&second);
    out
}

/// Combines two merkle node hashes the way Bitcoin does: concatenate and
/// double-SHA256. Inputs and output are internal (little-endian) byte order.
fn merkle_parent(left: &Hash, right: &Hash) -> Hash {
    let mut buf = [0u8; 64];
    buf[..32].copy_from_slice(left);
    buf[32..].copy_from_slice(right);
    double_sha256(&buf)
}

/// Computes the merkle root over a list of transaction hashes (coinbase
/// first), duplicating the last element of each odd-length level as Bitcoin
/// does.
pub fn merkle_root(hashes: &[Hash]) -> Hash {
    if hashes.is_empty() {
        return [0u8; 32];
    }
    let mut level: Vec<Hash> = hashes.to_vec();
    while level.len() > 1 {
        if level.len() % 2 == 1 {
            let last = *level.last().unwrap();
            level.push(last);
        }
        level = level
            .chunks(2)
            .map(|pair| merkle_parent(&pair[0], &pair[1]))
            .collect();
    }
    level[0]
}

/// The merkle *link*: the sequence of sibling hashes needed to fold a
/// coinbase transaction's hash up to the merkle root, in the order they
/// must be combined. Stratum clients append this to the extranonce'd
/// coinbase hash to get `merkle_root` without re-hashing every other
/// transaction in the block.
///
/// `other_hashes` excludes the coinbase; index 0 in the resulting tree is
/// always a coinbase placeholder.
pub fn calculate_merkle_link(other_hashes: &[Hash]) -> Vec<Hash> {
    let mut level: Vec<Hash> = std::iter::once([0u8; 32])
        .chain(other_hashes.iter().copied())
        .collect();
    let mut link = Vec::new();

    while level.len() > 1 {
        if level.len() % 2 == 1 {
            let last = *level.last().unwrap();
            level.push(last);
        }
        // Our node of interest is always at index 0; record its sibling.
        link.push(level[1]);
        level = level
            .chunks(2)
            .map(|pair| merkle_parent(&pair[0], &pair[1]))
            .collect();
    }
    link
}

/// Folds a coinbase hash up through a merkle link to produce the merkle
/// root, the inverse operation a stratum session performs per share.
pub fn fold_merkle_link(coinbase_hash: Hash, link: &[Hash]) -> Hash {
    let mut acc = coinbase_hash;
    for sibling in link {
        acc = merkle_parent(&acc, sibling);
    }
    acc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn double_sha256_is_32_bytes_and_deterministic() {
        let a = double_sha256(b"hello");
        let b = double_sha256(b"hello");
        assert_eq!(a, b);
        assert_ne!(a, double_sha256(b"world"));
    }

    #[test]
    fn merkle_root_single_hash_is_itself() {
        let h = double_sha256(b"only tx");
        assert_eq!(merkle_root(&[h]), h);
    }

    #[test]
    fn merkle_link_roundtrips_to_root() {
        let coinbase = double_sha256(b"coinbase");
        let tx1 = double_sha256(b"tx1");
        let tx2 = double_sha256(b"tx2");
        let tx3 = double_sha256(b"tx3");

        let expected_root = merkle_root(&[coinbase, tx1, tx2, tx3]);
        let link = calculate_merkle_link(&[tx1, tx2, tx3]);
        assert_eq!(fold_merkle_link(coinbase, &link), expected_root);
    }

    #[test]
    fn merkle_link_handles_odd_counts() {
        let coinbase = double_sha256(b"coinbase");
        let tx1 = double_sha256(b"tx1");
        let tx2 = double_sha256(b"tx2");

        let expected_root = merkle_root(&[coinbase, tx1, tx2]);
        let link = calculate_merkle_link(&[tx1, tx2]);
        assert_eq!(fold_merkle_link(coinbase, &link), expected_root);
    }
}
