//! Live/down partitioning and priority-based poll election across every
//! endpoint configured for one chain.
//!
//! `poll` is always the highest-`pool_priority` member of `live`, or
//! absent when `live` is empty, and a probe promotion never downgrades an
//! already higher-priority poll.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::endpoint::RpcEndpoint;

/// An endpoint's position within the pool, used only to give every
/// endpoint a stable identity distinct from its `Arc` pointer (so it can
/// sit in a `HashSet` key).
type EndpointId = usize;

struct PoolState {
    endpoints: Vec<Arc<RpcEndpoint>>,
    live: HashSet<EndpointId>,
    poll: Option<EndpointId>,
}

impl PoolState {
    fn elect_poll(&mut self) {
        self.poll = self
            .live
            .iter()
            .copied()
            .max_by_key(|&id| self.endpoints[id].pool_priority())
    }
}

/// Holds every `RpcEndpoint` configured for one chain and tracks which are
/// currently reachable. All endpoints start `down`; the probe loop is what
/// promotes them to `live`.
pub struct EndpointPool {
    state: Mutex<PoolState>,
}

impl EndpointPool {
    pub fn new(endpoints: Vec<RpcEndpoint>) -> Arc<Self> {
        let endpoints: Vec<Arc<RpcEndpoint>> = endpoints.into_iter().map(Arc::new).collect();
        Arc::new(EndpointPool {
            state: Mutex::new(PoolState {
                endpoints,
                live: HashSet::new(),
                poll: None,
            }),
        })
    }

    /// The current pick, or `None` if no endpoint is live.
    pub async fn poll_endpoint(&self) -> Option<Arc<RpcEndpoint>> {
        let state = self.state.lock().await;
        state.poll.map(|id| state.endpoints[id].clone())
    }

    /// Moves `endpoint` from `live` to `down`; re-elects `poll` if it was
    /// the one marked down.
    pub async fn mark_down(&self, endpoint: &Arc<RpcEndpoint>) {
        let mut state = self.state.lock().await;
        let Some(id) = state
            .endpoints
            .iter()
            .position(|e| Arc::ptr_eq(e, endpoint))
        else {
            return;
        };
        if state.live.remove(&id) {
            warn!(
                "endpoint {}:{} marked down",
                endpoint.host(),
                endpoint.port()
            );
        }
        if state.poll == Some(id) {
            state.elect_poll();
            match state.poll {
                Some(new_id) => info!(
                    "poll endpoint switched to {}:{}",
                    state.endpoints[new_id].host(),
                    state.endpoints[new_id].port()
                ),
                None => warn!("no RPC connections available"),
            }
        }
    }

    /// Spawns the periodic reachability probe: every `period`, issues
    /// `getinfo()` against every currently-down endpoint, promoting any
    /// that respond. Promotion never downgrades the current poll unless
    /// the newly-live endpoint outranks it (or there was no poll at all).
    pub fn spawn_probe_loop(
        self: Arc<Self>,
        period: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {}
                }
                self.probe_once().await;
            }
        })
    }

    async fn probe_once(&self) {
        let down_endpoints: Vec<(EndpointId, Arc<RpcEndpoint>)> = {
            let state = self.state.lock().await;
            (0..state.endpoints.len())
                .filter(|id| !state.live.contains(id))
                .map(|id| (id, state.endpoints[id].clone()))
                .collect()
        };

        for (id, endpoint) in down_endpoints {
            match endpoint.get_info().await {
                Ok(()) => self.promote(id, &endpoint).await,
                Err(e) => {
                    warn!(
                        "probe failed for {}:{}: {e}",
                        endpoint.host(),
                        endpoint.port()
                    );
                }
            }
        }
    }

    async fn promote(&self, id: EndpointId, endpoint: &Arc<RpcEndpoint>) {
        let mut state = self.state.lock().await;
        let newly_live = state.live.insert(id);
        if newly_live {
            info!("endpoint {}:{} is live", endpoint.host(), endpoint.port());
        }

        match state.poll {
            None => {
                state.poll = Some(id);
                info!(
                    "poll endpoint elected: {}:{}",
                    endpoint.host(),
                    endpoint.port()
                );
            }
            Some(current) => {
                if endpoint.pool_priority() > state.endpoints[current].pool_priority() {
                    state.poll = Some(id);
                    info!(
                        "poll endpoint upgraded to {}:{} (priority {})",
                        endpoint.host(),
                        endpoint.port(),
                        endpoint.pool_priority()
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::RpcEndpointConfig;

    fn endpoint(priority: i64, port: u16) -> RpcEndpoint {
        RpcEndpoint::new(RpcEndpointConfig {
            host: "127.0.0.1".to_string(),
            port,
            username: "u".to_string(),
            password: "p".to_string(),
            pool_priority: priority,
            max_pool_size: 4,
            call_timeout: Duration::from_secs(1),
        })
    }

    #[tokio::test]
    async fn starts_with_no_poll_and_nothing_live() {
        let pool = EndpointPool::new(vec![endpoint(1, 1001), endpoint(2, 1002)]);
        assert!(pool.poll_endpoint().await.is_none());
    }

    #[tokio::test]
    async fn promote_picks_highest_priority_as_poll() {
        let pool = EndpointPool::new(vec![endpoint(1, 1001), endpoint(2, 1002)]);
        let low = {
            let state = pool.state.lock().await;
            state.endpoints[0].clone()
        };
        let high = {
            let state = pool.state.lock().await;
            state.endpoints[1].clone()
        };
        pool.promote(0, &low).await;
        assert!(pool.poll_endpoint().await.is_some());
        pool.promote(1, &high).await;
        let current = pool.poll_endpoint().await.unwrap();
        assert_eq!(current.pool_priority(), 2);
    }

    #[tokio::test]
    async fn mark_down_clears_poll_when_no_other_live() {
        let pool = EndpointPool::new(vec![endpoint(1, 1001)]);
        let only = {
            let state = pool.state.lock().await;
            state.endpoints[0].clone()
        };
        pool.promote(0, &only).await;
        assert!(pool.poll_endpoint().await.is_some());
        pool.mark_down(&only).await;
        assert!(pool.poll_endpoint().await.is_none());
    }

    #[tokio::test]
    async fn promote_never_downgrades_existing_higher_priority_poll() {
        let pool = EndpointPool::new(vec![endpoint(5, 1001), endpoint(1, 1002)]);
        let high = {
            let state = pool.state.lock().await;
            state.endpoints[0].clone()
        };
        let low = {
            let state = pool.state.lock().await;
            state.endpoints[1].clone()
        };
        pool.promote(0, &high).await;
        pool.promote(1, &low).await;
        let current = pool.poll_endpoint().await.unwrap();
        assert_eq!(current.pool_priority(), 5);
    }
}
