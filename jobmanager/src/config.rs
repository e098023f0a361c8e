//! Job manager configuration schema.
//!
//! Loaded by the binary (via the `config` crate layered under a `clap` CLI)
//! and handed here only for validation — address checksum validation and
//! the "at least one coinserv" check are fatal at startup.

use std::time::Duration;

use orepool_chain::Address;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid pool_address: {0}")]
    InvalidPoolAddress(#[source] orepool_chain::ChainError),

    #[error("invalid donate_address: {0}")]
    InvalidDonateAddress(#[source] orepool_chain::ChainError),

    #[error("at least one entry in main_coinservs is required")]
    NoCoinservers,
}

/// One daemon connection entry, as listed under `main_coinservs` or a
/// merged chain's `coinserv` list.
#[derive(Debug, Clone, Deserialize)]
pub struct CoinservConfig {
    pub address: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub poll_priority: i64,
    #[serde(default = "default_maxsize")]
    pub maxsize: usize,
}

fn default_maxsize() -> usize {
    10
}

/// One merge-mined chain's configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MergedChainConfig {
    pub enabled: bool,
    pub name: String,
    pub coinserv: Vec<CoinservConfig>,
    pub flush: bool,
    #[serde(with = "humantime_serde_seconds")]
    pub work_interval: Duration,
    pub signal: Option<i32>,
}

/// The job manager's full configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct JobManagerConfig {
    pub main_coinservs: Vec<CoinservConfig>,
    #[serde(default)]
    pub merged: Vec<MergedChainConfig>,
    #[serde(default = "default_extranonce_size")]
    pub extranonce_size: usize,
    #[serde(default = "default_extranonce_serv_size")]
    pub extranonce_serv_size: usize,
    /// Wire key is `diff1`, matching spec's `main_coinservs`-adjacent
    /// config enumeration; the field stays `diff1_bits` internally since
    /// every consumer (`bits_to_difficulty`, `JobBuilderConfig`) works in
    /// compact-bits form rather than a raw 256-bit target.
    #[serde(rename = "diff1", default = "default_diff1_bits")]
    pub diff1_bits: u32,
    #[serde(default = "default_block_poll", with = "humantime_serde_seconds")]
    pub block_poll: Duration,
    #[serde(default = "default_job_generate_int")]
    pub job_generate_int: u32,
    #[serde(default = "default_rpc_ping_int", with = "humantime_serde_seconds")]
    pub rpc_ping_int: Duration,
    #[serde(default = "default_term_timeout", with = "humantime_serde_seconds")]
    pub term_timeout: Duration,
    pub pool_address: String,
    pub donate_address: String,
}

fn default_extranonce_size() -> usize {
    4
}
fn default_extranonce_serv_size() -> usize {
    8
}
fn default_diff1_bits() -> u32 {
    orepool_chain::difficulty::DIFF1_BITS
}
fn default_block_poll() -> Duration {
    Duration::from_millis(200)
}
fn default_job_generate_int() -> u32 {
    75
}
fn default_rpc_ping_int() -> Duration {
    Duration::from_secs(2)
}
fn default_term_timeout() -> Duration {
    Duration::from_secs(15)
}

/// Serializes a `Duration` as a plain number of seconds, the simplest
/// round-trippable encoding for a TOML config file.
mod humantime_serde_seconds {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Ok(Duration::from_secs_f64(secs))
    }
}

/// A config that has passed startup validation: addresses parsed, coinserv
/// list non-empty.
pub struct ValidatedConfig {
    pub raw: JobManagerConfig,
    pub pool_address: Address,
    pub donate_address: Address,
}

impl JobManagerConfig {
    pub fn validate(self) -> Result<ValidatedConfig, ConfigError> {
        if self.main_coinservs.is_empty() {
            return Err(ConfigError::NoCoinservers);
        }
        let pool_address =
            Address::parse(&self.pool_address).map_err(ConfigError::InvalidPoolAddress)?;
        let donate_address =
            Address::parse(&self.donate_address).map_err(ConfigError::InvalidDonateAddress)?;
        Ok(ValidatedConfig {
            raw: self,
            pool_address,
            donate_address,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> JobManagerConfig {
        JobManagerConfig {
            main_coinservs: vec![CoinservConfig {
                address: "127.0.0.1".to_string(),
                port: 8332,
                username: "u".to_string(),
                password: "p".to_string(),
                poll_priority: 1,
                maxsize: 10,
            }],
            merged: vec![],
            extranonce_size: 4,
            extranonce_serv_size: 8,
            diff1_bits: default_diff1_bits(),
            block_poll: default_block_poll(),
            job_generate_int: default_job_generate_int(),
            rpc_ping_int: default_rpc_ping_int(),
            term_timeout: default_term_timeout(),
            pool_address: "1BoatSLRHtKNngkdXEeobR76b53LETtpyT".to_string(),
            donate_address: "1BoatSLRHtKNngkdXEeobR76b53LETtpyT".to_string(),
        }
    }

    #[test]
    fn rejects_empty_coinservs() {
        let mut config = base_config();
        config.main_coinservs.clear();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::NoCoinservers)
        ));
    }

    #[test]
    fn rejects_bad_pool_address() {
        let mut config = base_config();
        config.pool_address = "not-an-address".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidPoolAddress(_))
        ));
    }

    #[test]
    fn accepts_well_formed_config() {
        assert!(base_config().validate().is_ok());
    }
}
