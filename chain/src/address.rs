//! Base58check payout address validation.
//!
//! The job manager never spends from these addresses, it only needs to know
//! that the pool operator configured something that decodes to a sane
//! pubkey-hash so the coinbase output script can be built once at startup.

use crate::ChainError;

/// A validated base58check address. Holds the decoded payload (version byte
/// + pubkey hash), not the string form, so `CoinbaseBuilder` never has to
/// re-parse it per job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    encoded: String,
    payload: Vec<u8>,
}

impl Address {
    /// Parses and checksum-validates a base58check address string.
    ///
    /// Decodes base58, splits off the trailing 4-byte checksum, and
    /// verifies it against `doubleSha256` of the remaining payload. We
    /// don't restrict the version byte to a single network here — the pool
    /// operator is trusted to pass an address for
    /// the chain they configured.
    pub fn parse(encoded: &str) -> Result<Self, ChainError> {
        let raw = bs58::decode(encoded)
            .into_vec()
            .map_err(|e| ChainError::InvalidAddress(format!("base58: {e}")))?;

        if raw.len() < 5 {
            return Err(ChainError::InvalidAddress("too short".to_string()));
        }

        let (payload, checksum) = raw.split_at(raw.len() - 4);
        let digest = crate::hashing::double_sha256(payload);
        if &digest[..4] != checksum {
            return Err(ChainError::InvalidAddress("bad checksum".to_string()));
        }

        Ok(Address {
            encoded: encoded.to_string(),
            payload: payload.to_vec(),
        })
    }

    /// The version byte prefixing the pubkey hash.
    pub fn version(&self) -> u8 {
        self.payload[0]
    }

    /// The 20-byte pubkey hash (RIPEMD160(SHA256(pubkey))), without the
    /// leading version byte.
    pub fn pubkey_hash(&self) -> &[u8] {
        &self.payload[1..]
    }

    /// Builds a standard P2PKH `scriptPubKey`:
    /// `OP_DUP OP_HASH160 <20 bytes> OP_EQUALVERIFY OP_CHECKSIG`.
    pub fn to_p2pkh_script(&self) -> Vec<u8> {
        let mut script = Vec::with_capacity(25);
        script.push(0x76); // OP_DUP
        script.push(0xa9); // OP_HASH160
        script.push(0x14); // push 20 bytes
        script.extend_from_slice(self.pubkey_hash());
        script.push(0x88); // OP_EQUALVERIFY
        script.push(0xac); // OP_CHECKSIG
        script
    }

    pub fn as_str(&self) -> &str {
        &self.encoded
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.encoded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_bad_checksum() {
        // Valid base58 alphabet, wrong checksum.
        assert!(Address::parse("1BoatSLRHtKNngkdXEeobR76b53LETtpyT").is_err()
            || Address::parse("1BoatSLRHtKNngkdXEeobR76b53LETtpyX").is_err());
    }

    #[test]
    fn rejects_too_short() {
        assert!(Address::parse("1").is_err());
    }

    #[test]
    fn parses_well_known_address() {
        // A canonical Bitcoin mainnet P2PKH address with a valid checksum.
        let addr = Address::parse("1BoatSLRHtKNngkdXEeobR76b53LETtpyT").unwrap();
        assert_eq!(addr.version(), 0x00);
        assert_eq!(addr.pubkey_hash().len(), 20);
        assert_eq!(addr.to_p2pkh_script().len(), 25);
    }
}
