//! A typed facade over HTTP JSON-RPC to a single daemon connection.
//!
//! Grounded on `storage::BlockStore`'s `async_trait` service-trait shape,
//! generalized from an in-memory store to an HTTP client: every operation
//! is `async`, returns a typed value, and fails with one of
//! [`crate::RpcClientError`]'s variants rather than propagating
//! `reqwest::Error` directly.

use std::time::Duration;

use orepool_chain::template::BlockTemplate;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::RpcClientError;

/// Static configuration for one daemon connection, as listed under a chain's
/// `coinserv`/`main_coinservs` entry.
#[derive(Debug, Clone)]
pub struct RpcEndpointConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    /// Higher is preferred. Used by `EndpointPool` to pick the active poll
    /// endpoint among several live ones.
    pub pool_priority: i64,
    /// Bounded size of the underlying HTTP connection pool.
    pub max_pool_size: usize,
    /// Per-call timeout.
    pub call_timeout: Duration,
}

impl RpcEndpointConfig {
    pub fn url(&self) -> String {
        format!("http://{}:{}/", self.host, self.port)
    }
}

/// One daemon connection. Cheap to clone the `Arc` wrapper the pool hands
/// out; the underlying `reqwest::Client` itself is already a cheap-to-clone
/// connection-pool handle.
pub struct RpcEndpoint {
    config: RpcEndpointConfig,
    client: reqwest::Client,
}

/// The `getauxblock()` response shape used for merged mining.
#[derive(Debug, Clone, Deserialize)]
pub struct AuxBlock {
    pub hash: String,
    pub target: String,
    #[serde(rename = "chainid")]
    pub chain_id: u32,
}

#[derive(Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcErrorObject>,
}

#[derive(Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

impl RpcEndpoint {
    pub fn new(config: RpcEndpointConfig) -> Self {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(config.max_pool_size)
            .timeout(config.call_timeout)
            .build()
            .expect("reqwest client configuration is static and always valid");
        RpcEndpoint { config, client }
    }

    pub fn pool_priority(&self) -> i64 {
        self.config.pool_priority
    }

    pub fn host(&self) -> &str {
        &self.config.host
    }

    pub fn port(&self) -> u16 {
        self.config.port
    }

    async fn call(&self, method: &'static str, params: Value) -> Result<Value, RpcClientError> {
        let body = json!({
            "jsonrpc": "1.0",
            "id": "orepool",
            "method": method,
            "params": params,
        });

        let response = self
            .client
            .post(self.config.url())
            .basic_auth(&self.config.username, Some(&self.config.password))
            .json(&body)
            .send()
            .await
            .map_err(|source| RpcClientError::Transport { method, source })?;

        let parsed: RpcResponse<Value> = response
            .json()
            .await
            .map_err(|source| RpcClientError::Transport { method, source })?;

        if let Some(err) = parsed.error {
            return Err(RpcClientError::Rpc {
                method,
                code: err.code,
                message: err.message,
            });
        }

        parsed.result.ok_or(RpcClientError::MalformedResponse {
            method,
            reason: "missing result field".to_string(),
        })
    }

    /// `getinfo()`, used only as a liveness probe by `EndpointPool`.
    pub async fn get_info(&self) -> Result<(), RpcClientError> {
        self.call("getinfo", json!([])).await?;
        Ok(())
    }

    pub async fn get_block_count(&self) -> Result<u64, RpcClientError> {
        let value = self.call("getblockcount", json!([])).await?;
        serde_json::from_value(value).map_err(|e| RpcClientError::MalformedResponse {
            method: "getblockcount",
            reason: e.to_string(),
        })
    }

    pub async fn get_block_template(
        &self,
        capabilities: &[&str],
    ) -> Result<BlockTemplate, RpcClientError> {
        let params = json!([{ "capabilities": capabilities }]);
        let value = self.call("getblocktemplate", params).await?;
        serde_json::from_value(value).map_err(|e| RpcClientError::MalformedResponse {
            method: "getblocktemplate",
            reason: e.to_string(),
        })
    }

    pub async fn get_aux_block(&self) -> Result<AuxBlock, RpcClientError> {
        let value = self.call("getauxblock", json!([])).await?;
        serde_json::from_value(value).map_err(|e| RpcClientError::MalformedResponse {
            method: "getauxblock",
            reason: e.to_string(),
        })
    }

    pub async fn submit_block(&self, block_hex: &str) -> Result<(), RpcClientError> {
        self.call("submitblock", json!([block_hex])).await?;
        Ok(())
    }

    pub async fn submit_aux_block(
        &self,
        hash: &str,
        aux_pow: &str,
    ) -> Result<bool, RpcClientError> {
        let value = self
            .call("submitauxblock", json!([hash, aux_pow]))
            .await?;
        serde_json::from_value(value).map_err(|e| RpcClientError::MalformedResponse {
            method: "submitauxblock",
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_url_is_well_formed() {
        let config = RpcEndpointConfig {
            host: "127.0.0.1".to_string(),
            port: 8332,
            username: "user".to_string(),
            password: "pass".to_string(),
            pool_priority: 1,
            max_pool_size: 10,
            call_timeout: Duration::from_secs(5),
        };
        assert_eq!(config.url(), "http://127.0.0.1:8332/");
    }
}
