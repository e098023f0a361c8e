//! JSON-RPC client for Bitcoin-family coin daemons, with health-probed
//! connection pooling and priority-based failover across multiple
//! configured endpoints for the same chain.

pub mod endpoint;
pub mod pool;

pub use endpoint::{AuxBlock, RpcEndpoint, RpcEndpointConfig};
pub use pool::EndpointPool;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RpcClientError {
    #[error("transport error calling {method}: {source}")]
    Transport {
        method: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("daemon returned an RPC error calling {method}: {code} {message}")]
    Rpc {
        method: &'static str,
        code: i64,
        message: String,
    },

    #[error("malformed response calling {method}: {reason}")]
    MalformedResponse {
        method: &'static str,
        reason: String,
    },
}
