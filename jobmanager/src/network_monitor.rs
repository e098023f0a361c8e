//! Polls the primary chain's poll endpoint for new blocks and fresh
//! templates, feeding both into the `JobBuilder`'s channel.
//!
//! A tight loop that checks `getblockcount` every tick, and either on a
//! height change or every `job_generate_int` ticks pulls `getblocktemplate`
//! and republishes if it differs from what's cached.

use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use orepool_chain::BlockTemplate;
use orepool_rpc::EndpointPool;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::job_builder::RefreshRequest;
use crate::stats::NetworkStats;

/// getblocktemplate capability list sent on every call. `coinbasevalue`
/// (not `coinbasetxn`) tells the daemon this client builds its own
/// coinbase and only needs the subsidy total — `BlockTemplate::coinbase_value`
/// is a required field the job builder reads directly.
const TEMPLATE_CAPABILITIES: &[&str] = &[
    "coinbasevalue",
    "coinbase/append",
    "coinbase",
    "generation",
    "time",
    "transactions/remove",
    "prevblock",
];

/// How long to sleep a tick when no poll endpoint is available at all.
/// Independent of `poll_period` so a fast `block_poll` doesn't turn into a
/// busy loop while every endpoint is down.
const NO_ENDPOINT_BACKOFF: Duration = Duration::from_secs(1);

pub struct NetworkMonitor {
    pool: Arc<EndpointPool>,
    stats: Arc<NetworkStats>,
    poll_period: Duration,
    job_generate_int: u32,
    refresh_tx: mpsc::Sender<RefreshRequest>,
}

/// State carried across ticks: the last template a refresh actually
/// fetched (for dedup) and the count of ticks since the last refresh.
struct TickState {
    last_template: Option<BlockTemplate>,
    refresh_counter: u32,
}

impl NetworkMonitor {
    pub fn new(
        pool: Arc<EndpointPool>,
        stats: Arc<NetworkStats>,
        poll_period: Duration,
        job_generate_int: u32,
        refresh_tx: mpsc::Sender<RefreshRequest>,
    ) -> Self {
        NetworkMonitor {
            pool,
            stats,
            poll_period,
            job_generate_int,
            refresh_tx,
        }
    }

    /// Spawns the monitor's tick loop. Exits once `cancel` fires.
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.poll_period);
            let mut state = TickState {
                last_template: None,
                refresh_counter: 0,
            };

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {}
                }
                self.tick(&mut state).await;
            }
        })
    }

    /// One poll iteration. Fetches a fresh template only on a height
    /// change or once every `job_generate_int` ticks; otherwise it's just
    /// a height check.
    async fn tick(&self, state: &mut TickState) {
        let Some(endpoint) = self.pool.poll_endpoint().await else {
            tokio::time::sleep(NO_ENDPOINT_BACKOFF).await;
            return;
        };

        let height = match endpoint.get_block_count().await {
            Ok(height) => height,
            Err(e) => {
                warn!("getblockcount failed against poll endpoint: {e}");
                self.pool.mark_down(&endpoint).await;
                return;
            }
        };

        let new_block = height != self.stats.height();
        if new_block {
            self.stats.set_height(height);
        }

        let should_refresh = if new_block {
            state.refresh_counter = 0;
            true
        } else {
            state.refresh_counter += 1;
            if state.refresh_counter >= self.job_generate_int {
                state.refresh_counter = 0;
                true
            } else {
                false
            }
        };

        if !should_refresh {
            return;
        }

        let template = match endpoint.get_block_template(TEMPLATE_CAPABILITIES).await {
            Ok(template) => template,
            Err(e) => {
                warn!("getblocktemplate failed against poll endpoint: {e}");
                self.pool.mark_down(&endpoint).await;
                return;
            }
        };

        let dirty = match &state.last_template {
            Some(prev) => !templates_equivalent(prev, &template),
            None => true,
        };

        if !new_block && !dirty {
            // Clean periodic refresh: cache the (equivalent) template and
            // skip regeneration entirely.
            return;
        }

        if new_block {
            self.stats.set_subsidy(template.coinbase_value);
            info!(
                "new block detected at height {height}, {} transactions in template",
                template.transactions.len()
            );
        } else {
            info!("template refreshed without a height change (mempool drift)");
        }

        state.last_template = Some(template.clone());

        let request = RefreshRequest::Template {
            template: Box::new(template),
            push: new_block,
            flush: new_block,
            new_block,
        };
        if self.refresh_tx.send(request).await.is_err() {
            warn!("job builder channel closed; network monitor cannot publish work");
        }
    }
}

/// Two templates are equivalent for republishing purposes when they're
/// byte-equal in full, `curtime` included: a `curtime`-only change still
/// means a fresh job so miners' `ntime` advances, per the dedup law in
/// spec §8 ("two successive responses with byte-equal content produce no
/// new job").
fn templates_equivalent(a: &BlockTemplate, b: &BlockTemplate) -> bool {
    a == b
}

#[cfg(test)]
mod tests {
    use super::*;
    use orepool_chain::template::RawTransaction;

    fn template(prev: &str, height: u64, n_tx: usize) -> BlockTemplate {
        BlockTemplate {
            version: 536870912,
            previous_block_hash: prev.to_string(),
            transactions: (0..n_tx)
                .map(|i| RawTransaction {
                    data: "deadbeef".to_string(),
                    txid: format!("{:064x}", i),
                    fee: 0,
                })
                .collect(),
            coinbase_value: 5_000_000_000,
            bits: "1d00ffff".to_string(),
            cur_time: 1_700_000_000 + height as u32,
            height,
            mutable: vec![],
            target: None,
            default_witness_commitment: None,
        }
    }

    #[test]
    fn identical_templates_are_equal() {
        let a = template("00".repeat(32).as_str(), 100, 2);
        let b = a.clone();
        assert!(templates_equivalent(&a, &b));
    }

    #[test]
    fn a_curtime_only_change_is_not_equivalent() {
        let mut a = template("00".repeat(32).as_str(), 100, 2);
        let mut b = a.clone();
        a.cur_time += 5;
        b.cur_time += 50;
        assert!(!templates_equivalent(&a, &b));
    }

    #[test]
    fn a_new_transaction_makes_templates_different() {
        let a = template("00".repeat(32).as_str(), 100, 2);
        let b = template("00".repeat(32).as_str(), 100, 3);
        assert!(!templates_equivalent(&a, &b));
    }

    #[test]
    fn a_new_previous_block_hash_makes_templates_different() {
        let a = template("00".repeat(32).as_str(), 100, 2);
        let b = template("11".repeat(32).as_str(), 101, 2);
        assert!(!templates_equivalent(&a, &b));
    }
}
