//! Polls a single merge-mined auxiliary chain for new work, and reacts to
//! an out-of-band wake (an OS signal translated upstream, or the network
//! monitor noticing a primary-chain block) without waiting for the next
//! tick.
//!
//! Wakes are delivered through a single-slot [`tokio::sync::Notify`]: any
//! number of wake requests that arrive before the monitor gets around to
//! them collapse into one `update()` call, with no risk of a race on
//! shared state the way a bare OS signal handler touching async state
//! would have.

use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use orepool_chain::Address;
use orepool_rpc::{AuxBlock, EndpointPool, RpcEndpoint};
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;

use crate::job::MergedWorkEntry;
use crate::job_builder::RefreshRequest;
use crate::stats::AuxMonitorStats;

/// How long to wait before retrying when the primary chain has no poll
/// endpoint yet: aux work is useless without a primary template to attach
/// it to.
const NO_PRIMARY_ENDPOINT_BACKOFF: Duration = Duration::from_secs(1);

/// Back-off after a `getauxblock` transport/RPC failure.
const AUX_RPC_FAILURE_BACKOFF: Duration = Duration::from_secs(2);

/// One merge-mined chain's monitor. Unlike `NetworkMonitor`, this talks to
/// exactly one `RpcEndpoint` rather than a pooled/failover set — merged
/// chains are a secondary revenue stream, not pool-critical, so they don't
/// need the same failover machinery as `main_coinservs`.
pub struct AuxMonitor {
    name: String,
    endpoint: RpcEndpoint,
    flush: bool,
    work_interval: Duration,
    stats: Arc<AuxMonitorStats>,
    refresh_tx: mpsc::Sender<RefreshRequest>,
    wake: Arc<Notify>,
}

/// State carried across ticks so `update` can detect both "no change at
/// all" (publish nothing) and "height changed" (which of the two
/// publication policies applies).
#[derive(Default)]
struct AuxTickState {
    last_entry: Option<MergedWorkEntry>,
    last_height: Option<u64>,
}

impl AuxMonitor {
    pub fn new(
        name: impl Into<String>,
        endpoint: RpcEndpoint,
        flush: bool,
        work_interval: Duration,
        stats: Arc<AuxMonitorStats>,
        refresh_tx: mpsc::Sender<RefreshRequest>,
    ) -> Self {
        AuxMonitor {
            name: name.into(),
            endpoint,
            flush,
            work_interval,
            stats,
            refresh_tx,
            wake: Arc::new(Notify::new()),
        }
    }

    /// A handle other tasks (the supervisor's signal dispatcher, or the
    /// network monitor on a fresh primary block) can call to coalesce a
    /// wake without blocking on this monitor's own loop.
    pub fn waker(&self) -> Arc<Notify> {
        self.wake.clone()
    }

    pub fn spawn(
        self,
        primary_pool: Arc<EndpointPool>,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.work_interval);
            let mut state = AuxTickState::default();

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {}
                    _ = self.wake.notified() => {}
                }

                // Wait on the primary chain before doing anything useful
                // with aux work.
                while primary_pool.poll_endpoint().await.is_none() {
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = tokio::time::sleep(NO_PRIMARY_ENDPOINT_BACKOFF) => {}
                    }
                }

                self.update(&mut state).await;
            }
        })
    }

    /// One update pass: fetch `getauxblock`, no-op if it's unchanged from
    /// the last value seen, otherwise fetch the aux chain's height and
    /// publish merged work with the push/flush policy that distinguishes a
    /// same-height work change from a new aux block.
    async fn update(&self, state: &mut AuxTickState) {
        let aux_block = match self.endpoint.get_aux_block().await {
            Ok(aux_block) => aux_block,
            Err(e) => {
                warn!("{}: getauxblock failed: {e}", self.name);
                tokio::time::sleep(AUX_RPC_FAILURE_BACKOFF).await;
                return;
            }
        };

        let Some(entry) = decode_aux_block(&aux_block) else {
            warn!(
                "{}: malformed getauxblock response (hash/target not valid hex)",
                self.name
            );
            return;
        };

        if state.last_entry.as_ref() == Some(&entry) {
            // An unchanged response publishes nothing.
            return;
        }

        let height = match self.endpoint.get_block_count().await {
            Ok(height) => height,
            Err(e) => {
                warn!("{}: getblockcount failed: {e}", self.name);
                tokio::time::sleep(AUX_RPC_FAILURE_BACKOFF).await;
                return;
            }
        };

        state.last_entry = Some(entry.clone());
        let height_changed = state.last_height != Some(height);
        state.last_height = Some(height);

        let (push, flush) = if height_changed {
            self.stats.set_height(height);
            self.stats.incr_work_restarts();
            info!(
                "{}: new block at height {height}, chain_id {}",
                self.name, entry.chain_id
            );
            (true, self.flush)
        } else {
            self.stats.incr_new_jobs();
            info!(
                "{}: new merged work at unchanged height {height}, chain_id {}",
                self.name, entry.chain_id
            );
            (false, false)
        };

        let request = RefreshRequest::MergedWork { entry, push, flush };
        if self.refresh_tx.send(request).await.is_err() {
            warn!(
                "{}: job builder channel closed; aux monitor cannot publish work",
                self.name
            );
        }
    }
}

fn decode_aux_block(aux_block: &AuxBlock) -> Option<MergedWorkEntry> {
    let hash_bytes = hex::decode(&aux_block.hash).ok()?;
    let target_bytes = hex::decode(&aux_block.target).ok()?;
    if hash_bytes.len() != 32 || target_bytes.len() != 32 {
        return None;
    }
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&hash_bytes);
    let mut target = [0u8; 32];
    target.copy_from_slice(&target_bytes);
    Some(MergedWorkEntry {
        chain_id: aux_block.chain_id,
        hash,
        target,
    })
}

/// Resolves a merged chain's payout address at construction time so a
/// malformed `merged[].coinserv` address fails the same way a malformed
/// `pool_address` does: loudly, before any monitor starts polling.
pub fn validate_merged_payout_address(encoded: &str) -> Result<Address, orepool_chain::ChainError> {
    Address::parse(encoded)
}
