//! Coinbase transaction assembly.
//!
//! Stratum mining splits the coinbase into two halves either side of an
//! extranonce field that each connected client fills in independently, so
//! every miner searches a disjoint part of the nonce space without the pool
//! needing to hand out distinct block templates. This builder produces that
//! split (`coinb1` / `coinb2`) once per job; the stratum session is
//! responsible for splicing in its own extranonce1/extranonce2.

use crate::address::Address;
use crate::Hash;

/// The merkle link handed to stratum clients alongside a job: the sibling
/// hashes needed to fold a freshly-built coinbase hash up to the block's
/// merkle root.
pub type MerkleLink = Vec<Hash>;

/// BIP-34 height push: the smallest-encoding push of the block height,
/// required in the coinbase scriptSig of every block at or above the
/// BIP-34 activation height on Bitcoin-family chains.
fn push_height(height: u64) -> Vec<u8> {
    if height == 0 {
        return vec![0x00];
    }
    let mut bytes = Vec::new();
    let mut h = height;
    while h > 0 {
        bytes.push((h & 0xff) as u8);
        h >>= 8;
    }
    // If the high bit of the last byte is set, Script would read it as
    // negative; add a zero byte the way Bitcoin Core's `CScriptNum` does.
    if bytes.last().copied().unwrap_or(0) & 0x80 != 0 {
        bytes.push(0x00);
    }
    let mut script = Vec::with_capacity(bytes.len() + 1);
    script.push(bytes.len() as u8);
    script.extend_from_slice(&bytes);
    script
}

/// Builds a pool coinbase transaction split around the extranonce field.
///
/// Mirrors `MiningJobManager::create_job`'s coinbase assembly, generalized
/// to take a configurable extranonce1/extranonce2 width and an optional
/// auxiliary proof-of-work commitment instead of a fixed layout.
pub struct CoinbaseBuilder<'a> {
    height: u64,
    value: u64,
    payout_address: &'a Address,
    extranonce1_size: usize,
    extranonce2_size: usize,
    pool_signature: Vec<u8>,
    aux_commitment: Option<Vec<u8>>,
    witness_commitment: Option<Vec<u8>>,
}

impl<'a> CoinbaseBuilder<'a> {
    pub fn new(
        height: u64,
        value: u64,
        payout_address: &'a Address,
        extranonce1_size: usize,
        extranonce2_size: usize,
    ) -> Self {
        CoinbaseBuilder {
            height,
            value,
            payout_address,
            extranonce1_size,
            extranonce2_size,
            pool_signature: Vec::new(),
            aux_commitment: None,
            witness_commitment: None,
        }
    }

    /// Arbitrary bytes appended to the coinbase scriptSig after the
    /// extranonce field, conventionally a short pool identifier string.
    pub fn with_pool_signature(mut self, signature: impl Into<Vec<u8>>) -> Self {
        self.pool_signature = signature.into();
        self
    }

    /// The `\xfa\xbemm<root><size><nonce>` merged-mining commitment tag, if
    /// this job is merge-mining one or more auxiliary chains.
    pub fn with_aux_commitment(mut self, tag: Vec<u8>) -> Self {
        self.aux_commitment = Some(tag);
        self
    }

    /// A segwit `OP_RETURN` witness commitment output, if the template
    /// requires one.
    pub fn with_witness_commitment(mut self, commitment: Vec<u8>) -> Self {
        self.witness_commitment = Some(commitment);
        self
    }

    /// Builds the two coinbase halves. Concatenating `coinb1 ++ extranonce1
    /// ++ extranonce2 ++ coinb2` yields a complete, serialized coinbase
    /// transaction.
    pub fn build(self) -> (Vec<u8>, Vec<u8>) {
        let mut coinb1 = Vec::new();
        coinb1.extend_from_slice(&2u32.to_le_bytes()); // version
        coinb1.push(0x01); // input count
        coinb1.extend_from_slice(&[0u8; 32]); // null prevout txid
        coinb1.extend_from_slice(&0xffff_ffffu32.to_le_bytes()); // null prevout index

        let mut script_sig = push_height(self.height);
        if let Some(tag) = &self.aux_commitment {
            script_sig.extend_from_slice(tag);
        }

        let extranonce_total = self.extranonce1_size + self.extranonce2_size;
        let script_sig_len = script_sig.len() + extranonce_total + self.pool_signature.len();
        push_varint(&mut coinb1, script_sig_len as u64);
        coinb1.extend_from_slice(&script_sig);
        // extranonce1 and extranonce2 are spliced in here by the caller.

        let mut coinb2 = Vec::new();
        coinb2.extend_from_slice(&self.pool_signature);
        coinb2.extend_from_slice(&0xffff_ffffu32.to_le_bytes()); // sequence

        let mut outputs = Vec::new();
        outputs.push((self.value, self.payout_address.to_p2pkh_script()));
        if let Some(commitment) = self.witness_commitment {
            outputs.push((0, commitment));
        }
        push_varint(&mut coinb2, outputs.len() as u64);
        for (value, script) in &outputs {
            coinb2.extend_from_slice(&value.to_le_bytes());
            push_varint(&mut coinb2, script.len() as u64);
            coinb2.extend_from_slice(script);
        }
        coinb2.extend_from_slice(&0u32.to_le_bytes()); // locktime

        (coinb1, coinb2)
    }
}

fn push_varint(buf: &mut Vec<u8>, n: u64) {
    if n < 0xfd {
        buf.push(n as u8);
    } else if n <= 0xffff {
        buf.push(0xfd);
        buf.extend_from_slice(&(n as u16).to_le_bytes());
    } else if n <= 0xffff_ffff {
        buf.push(0xfe);
        buf.extend_from_slice(&(n as u32).to_le_bytes());
    } else {
        buf.push(0xff);
        buf.extend_from_slice(&n.to_le_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_address() -> Address {
        Address::parse("1BoatSLRHtKNngkdXEeobR76b53LETtpyT").unwrap()
    }

    #[test]
    fn build_produces_two_nonempty_halves() {
        let addr = test_address();
        let (coinb1, coinb2) = CoinbaseBuilder::new(800_000, 625_000_000, &addr, 4, 4)
            .with_pool_signature(b"/orepool/".to_vec())
            .build();
        assert!(!coinb1.is_empty());
        assert!(!coinb2.is_empty());
        // coinb1 ends right before the extranonce field starts.
        assert_eq!(coinb1[4], 0x01);
    }

    #[test]
    fn aux_commitment_is_embedded_in_script_sig() {
        let addr = test_address();
        let tag = b"\xfa\xbemm".to_vec();
        let (coinb1, _) = CoinbaseBuilder::new(100, 5_000_000_000, &addr, 4, 4)
            .with_aux_commitment(tag.clone())
            .build();
        let haystack = coinb1.as_slice();
        assert!(haystack
            .windows(tag.len())
            .any(|window| window == tag.as_slice()));
    }

    #[test]
    fn witness_commitment_adds_a_second_output() {
        let addr = test_address();
        let (_, coinb2_without) = CoinbaseBuilder::new(100, 5_000_000_000, &addr, 4, 4).build();
        let (_, coinb2_with) = CoinbaseBuilder::new(100, 5_000_000_000, &addr, 4, 4)
            .with_witness_commitment(vec![0u8; 38])
            .build();
        assert!(coinb2_with.len() > coinb2_without.len());
    }
}
