//! Bitcoin-family chain primitives assumed available to the job manager:
//! block templates, coinbase assembly, merkle links, and target/difficulty
//! conversion. None of this validates consensus rules — it only knows how
//! to read a `getblocktemplate` response and build the pieces a stratum
//! session needs to hand out work.

pub mod address;
pub mod auxpow;
pub mod coinbase;
pub mod difficulty;
pub mod hashing;
pub mod template;

pub use address::Address;
pub use auxpow::{build_auxpow_tree, AuxPowTree};
pub use coinbase::{CoinbaseBuilder, MerkleLink};
pub use difficulty::{bits_to_difficulty, bits_to_target, target_to_difficulty};
pub use hashing::{calculate_merkle_link, double_sha256, merkle_root};
pub use template::{BlockTemplate, RawTransaction};

use thiserror::Error;

/// 32-byte hash, used for block hashes, transaction ids and merkle nodes.
pub type Hash = [u8; 32];

/// 256-bit target, stored big-endian to match `getauxblock`'s wire format.
pub type Target = [u8; 32];

/// Compact difficulty encoding as returned by `getblocktemplate`'s `bits`.
pub type CompactBits = u32;

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("malformed block template: {0}")]
    MalformedTemplate(String),

    #[error("hex decoding error: {0}")]
    Hex(#[from] hex::FromHexError),
}

