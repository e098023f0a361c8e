//! Typed view over a `getblocktemplate` RPC response.
//!
//! Deliberately narrow: only the fields the job builder actually reads.
//! Unknown fields are ignored by serde rather than rejected, since upstream
//! nodes routinely add template fields (`weightlimit`, `rules`, ...) that
//! this job manager has no use for.

use serde::Deserialize;

use crate::Hash;

/// One transaction as listed in a `getblocktemplate` response's
/// `transactions` array.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RawTransaction {
    /// Raw transaction bytes, hex-encoded by the daemon.
    pub data: String,
    /// Transaction id, hex-encoded, already double-SHA256'd by the daemon.
    pub txid: String,
    /// Fee the transaction pays, in the chain's smallest unit.
    #[serde(default)]
    pub fee: i64,
}

impl RawTransaction {
    /// Decodes [`Self::txid`] into internal byte order (little-endian,
    /// reversed from the hex node operators normally read) for merkle
    /// computation.
    pub fn txid_hash(&self) -> Result<Hash, crate::ChainError> {
        let mut bytes = hex::decode(&self.txid)?;
        if bytes.len() != 32 {
            return Err(crate::ChainError::MalformedTemplate(format!(
                "txid {} is not 32 bytes",
                self.txid
            )));
        }
        bytes.reverse();
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&bytes);
        Ok(hash)
    }
}

/// A `getblocktemplate` response, trimmed to what job building needs.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BlockTemplate {
    pub version: i32,
    #[serde(rename = "previousblockhash")]
    pub previous_block_hash: String,
    pub transactions: Vec<RawTransaction>,
    #[serde(rename = "coinbasevalue")]
    pub coinbase_value: u64,
    pub bits: String,
    #[serde(rename = "curtime")]
    pub cur_time: u32,
    pub height: u64,
    #[serde(default)]
    pub mutable: Vec<String>,
    #[serde(default)]
    pub target: Option<String>,
    /// Non-Bitcoin chains commonly stuff an auxpow commitment requirement
    /// here; not every daemon includes it.
    #[serde(default)]
    pub default_witness_commitment: Option<String>,
}

impl BlockTemplate {
    /// Decodes [`Self::bits`] to its numeric compact-difficulty form.
    pub fn bits_value(&self) -> Result<u32, crate::ChainError> {
        let bytes = hex::decode(&self.bits)?;
        if bytes.len() != 4 {
            return Err(crate::ChainError::MalformedTemplate(
                "bits is not 4 bytes".to_string(),
            ));
        }
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Decodes [`Self::previous_block_hash`] into internal byte order.
    pub fn previous_block_hash_bytes(&self) -> Result<Hash, crate::ChainError> {
        let mut bytes = hex::decode(&self.previous_block_hash)?;
        if bytes.len() != 32 {
            return Err(crate::ChainError::MalformedTemplate(
                "previousblockhash is not 32 bytes".to_string(),
            ));
        }
        bytes.reverse();
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&bytes);
        Ok(hash)
    }

    /// The non-coinbase transaction hashes in template order, in internal
    /// byte order, ready for [`crate::hashing::calculate_merkle_link`].
    pub fn transaction_hashes(&self) -> Result<Vec<Hash>, crate::ChainError> {
        self.transactions.iter().map(|tx| tx.txid_hash()).collect()
    }

    /// Total size in bytes of every non-coinbase transaction, used to
    /// decide whether the coinbase can still grow to add a witness
    /// commitment or aux tag without exceeding block weight limits. We
    /// don't enforce a limit ourselves; this is informational only.
    pub fn transactions_size(&self) -> usize {
        self.transactions.iter().map(|tx| tx.data.len() / 2).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_template() -> BlockTemplate {
        serde_json::from_str(
            r#"{
                "version": 536870912,
                "previousblockhash": "00000000000000000005e3b8a599f6e5e0e1e7c1f3e9b9d4a9a0b9c8d7e6f5ab",
                "transactions": [
                    {"data": "deadbeef", "txid": "0000000000000000000000000000000000000000000000000000000000ab", "fee": 1000}
                ],
                "coinbasevalue": 625000000,
                "bits": "1d00ffff",
                "curtime": 1700000000,
                "height": 800000,
                "mutable": ["time", "transactions", "prevblock"]
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn decodes_bits_value() {
        let tpl = sample_template();
        assert_eq!(tpl.bits_value().unwrap(), 0x1d00ffff);
    }

    #[test]
    fn decodes_previous_block_hash() {
        let tpl = sample_template();
        assert!(tpl.previous_block_hash_bytes().is_ok());
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let tpl: BlockTemplate = serde_json::from_str(
            r#"{
                "version": 1,
                "previousblockhash": "00",
                "transactions": [],
                "coinbasevalue": 0,
                "bits": "1d00ffff",
                "curtime": 0,
                "height": 0,
                "somefieldwedontknow": {"nested": true}
            }"#,
        )
        .unwrap();
        assert_eq!(tpl.transactions.len(), 0);
    }
}
