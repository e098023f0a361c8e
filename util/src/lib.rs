//! Small helpers shared across the orepool crates: hex/base58 conversion,
//! timestamp formatting, and a single place to turn a verbosity count into a
//! `log` level filter.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum UtilError {
    #[error("hex decoding error: {0}")]
    HexError(#[from] hex::FromHexError),

    #[error("base58 decoding error: {0}")]
    Base58Error(#[from] bs58::decode::Error),

    #[error("invalid format: {0}")]
    InvalidFormat(String),
}

/// Converts a hex string to bytes
pub fn hex_to_bytes(hex: &str) -> Result<Vec<u8>, UtilError> {
    Ok(hex::decode(hex)?)
}

/// Converts bytes to a hex string
pub fn bytes_to_hex(bytes: &[u8]) -> String {
    hex::encode(bytes)
}

/// Converts a base58 string to bytes
pub fn base58_to_bytes(b58: &str) -> Result<Vec<u8>, UtilError> {
    Ok(bs58::decode(b58).into_vec()?)
}

/// Converts bytes to a base58 string
pub fn bytes_to_base58(bytes: &[u8]) -> String {
    bs58::encode(bytes).into_string()
}

/// Formats a unix timestamp as an ISO 8601 string
pub fn format_timestamp(timestamp: i64) -> String {
    chrono::DateTime::<chrono::Utc>::from_timestamp(timestamp, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| "invalid timestamp".to_string())
}

/// Maps a `-v` repeat count to a `log::LevelFilter`, the way a CLI's
/// verbosity flag usually does: 0 is quiet, higher is noisier.
pub fn level_filter_for_verbosity(verbosity: u8) -> log::LevelFilter {
    match verbosity {
        0 => log::LevelFilter::Error,
        1 => log::LevelFilter::Warn,
        2 => log::LevelFilter::Info,
        3 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    }
}

/// Initializes `env_logger` at the given verbosity. Call once from `main`.
pub fn init_logging(verbosity: u8) {
    env_logger::Builder::new()
        .filter_level(level_filter_for_verbosity(verbosity))
        .format_timestamp_millis()
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_roundtrip() {
        let bytes = vec![0xde, 0xad, 0xbe, 0xef];
        let s = bytes_to_hex(&bytes);
        assert_eq!(hex_to_bytes(&s).unwrap(), bytes);
    }

    #[test]
    fn base58_roundtrip() {
        let bytes = vec![1, 2, 3, 4, 5];
        let s = bytes_to_base58(&bytes);
        assert_eq!(base58_to_bytes(&s).unwrap(), bytes);
    }

    #[test]
    fn verbosity_mapping() {
        assert_eq!(level_filter_for_verbosity(0), log::LevelFilter::Error);
        assert_eq!(level_filter_for_verbosity(5), log::LevelFilter::Trace);
    }
}