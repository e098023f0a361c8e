//! Owns startup and shutdown ordering for every moving part of the job
//! manager: the job builder task, the primary network monitor, every
//! configured aux monitor, and each chain's endpoint-pool probe loop.
//!
//! Brings up every endpoint pool before any monitor starts ticking, then
//! spawns the job builder, the primary monitor, and one task pair per
//! configured aux chain. OS signal delivery is translated into
//! per-aux-monitor `Notify` wakes via `tokio::signal::unix::signal`.

use std::sync::Arc;
use std::time::Duration;

use log::info;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;

use crate::aux_monitor::AuxMonitor;
use crate::config::ValidatedConfig;
use crate::event_sink::SinkRegistry;
use crate::job::JobTableHandle;
use crate::job_builder::{self, JobBuilderConfig, RefreshRequest};
use crate::network_monitor::NetworkMonitor;
use crate::stats::{AuxMonitorStats, NetworkStats};
use orepool_rpc::EndpointPool;

/// Bundles one merged chain's running task handles together with the
/// `Notify` its configured OS signal (if any) should wake.
struct AuxChainHandle {
    name: String,
    signal: Option<i32>,
    waker: Arc<Notify>,
    join: tokio::task::JoinHandle<()>,
}

/// The fully wired, running job manager. Dropping this does not stop
/// anything — call [`Supervisor::shutdown`] for an orderly stop.
pub struct Supervisor {
    cancel: CancellationToken,
    job_builder_join: tokio::task::JoinHandle<()>,
    network_monitor_join: tokio::task::JoinHandle<()>,
    aux_chains: Vec<AuxChainHandle>,
    term_timeout: Duration,
    pub sinks: Arc<SinkRegistry>,
    pub network_stats: Arc<NetworkStats>,
    /// What the stratum layer reads to find the current job: `latest_job_id`
    /// plus `JobTable[id]`.
    pub job_table: Arc<JobTableHandle>,
}

impl Supervisor {
    /// Builds every endpoint pool, spawns every task, and returns once
    /// the whole pipeline is running. Primary coinservs and merged
    /// coinservs are both resolved into `EndpointPool`s before any monitor
    /// starts ticking, so a monitor never races its own pool's first probe.
    pub async fn start(config: ValidatedConfig) -> Supervisor {
        let cancel = CancellationToken::new();
        let sinks = Arc::new(SinkRegistry::new());
        let network_stats = Arc::new(NetworkStats::default());
        let job_table = Arc::new(JobTableHandle::new());

        let (refresh_tx, refresh_rx) = mpsc::channel(256);

        let job_builder_join = job_builder::spawn(
            JobBuilderConfig {
                extranonce_size: config.raw.extranonce_size,
                extranonce_serv_size: config.raw.extranonce_serv_size,
                diff1_bits: config.raw.diff1_bits,
                pool_address: config.pool_address.clone(),
            },
            refresh_rx,
            network_stats.clone(),
            sinks.clone(),
            job_table.clone(),
        );

        let main_pool = build_endpoint_pool(&config.raw.main_coinservs, config.raw.rpc_ping_int);
        main_pool
            .clone()
            .spawn_probe_loop(config.raw.rpc_ping_int, cancel.clone());

        let main_pool_for_aux = main_pool.clone();
        let network_monitor_join = Arc::new(NetworkMonitor::new(
            main_pool,
            network_stats.clone(),
            config.raw.block_poll,
            config.raw.job_generate_int,
            refresh_tx.clone(),
        ))
        .spawn(cancel.clone());

        let mut aux_chains = Vec::new();
        for chain in config.raw.merged.iter().filter(|c| c.enabled) {
            let pool = build_endpoint_pool(&chain.coinserv, config.raw.rpc_ping_int);
            pool.clone()
                .spawn_probe_loop(config.raw.rpc_ping_int, cancel.clone());

            // Merged chains use a single endpoint directly (no pooled
            // failover); the probe loop above still keeps it live-checked
            // for consistency
            // with the primary chain's observability, but the monitor
            // itself calls the endpoint directly so a new merged chain
            // doesn't need to wait on a `poll_endpoint()` election that
            // a single-entry pool would resolve trivially anyway.
            let endpoint_config = chain
                .coinserv
                .first()
                .expect("merged chain config requires at least one coinserv")
                .clone();
            let endpoint = orepool_rpc::RpcEndpoint::new(orepool_rpc::RpcEndpointConfig {
                host: endpoint_config.address.clone(),
                port: endpoint_config.port,
                username: endpoint_config.username.clone(),
                password: endpoint_config.password.clone(),
                pool_priority: endpoint_config.poll_priority,
                max_pool_size: endpoint_config.maxsize,
                call_timeout: config.raw.rpc_ping_int,
            });

            let stats = Arc::new(AuxMonitorStats::default());
            let monitor = AuxMonitor::new(
                chain.name.clone(),
                endpoint,
                chain.flush,
                chain.work_interval,
                stats,
                refresh_tx.clone(),
            );
            let waker = monitor.waker();
            let join = monitor.spawn(main_pool_for_aux.clone(), cancel.clone());

            aux_chains.push(AuxChainHandle {
                name: chain.name.clone(),
                signal: chain.signal,
                waker,
                join,
            });
        }

        info!(
            "job manager started: {} merged chain(s) configured",
            aux_chains.len()
        );

        Supervisor {
            cancel,
            job_builder_join,
            network_monitor_join,
            aux_chains,
            term_timeout: config.raw.term_timeout,
            sinks,
            network_stats,
            job_table,
        }
    }

    /// Registers a `SIGUSR1`-style OS signal that, when received, wakes
    /// every aux monitor configured with that signal number. One task per
    /// distinct signal; exits when `cancel` fires.
    pub fn spawn_signal_dispatch(&self, signum: i32) -> Option<tokio::task::JoinHandle<()>> {
        let kind = SignalKind::from_raw(signum);
        let mut stream = signal(kind).ok()?;
        let wakers: Vec<Arc<Notify>> = self
            .aux_chains
            .iter()
            .filter(|chain| chain.signal == Some(signum))
            .map(|chain| chain.waker.clone())
            .collect();
        if wakers.is_empty() {
            return None;
        }
        let cancel = self.cancel.clone();
        Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    received = stream.recv() => {
                        if received.is_none() {
                            break;
                        }
                        for waker in &wakers {
                            waker.notify_one();
                        }
                    }
                }
            }
        }))
    }

    /// Orderly shutdown: stop accepting new ticks, then wait up to
    /// `term_timeout` for every task to notice and exit before returning.
    pub async fn shutdown(self) {
        info!("job manager shutting down");
        self.cancel.cancel();

        let deadline = tokio::time::sleep(self.term_timeout);
        tokio::pin!(deadline);

        let mut joins = vec![self.job_builder_join, self.network_monitor_join];
        joins.extend(self.aux_chains.into_iter().map(|chain| {
            info!("stopping aux monitor {}", chain.name);
            chain.join
        }));

        let all_joined = futures_join_all(joins);
        tokio::select! {
            _ = all_joined => {}
            _ = &mut deadline => {
                log::warn!("shutdown timed out waiting for tasks to exit");
            }
        }
    }
}

/// Resolves each `CoinservConfig` entry into a running, health-probed
/// `EndpointPool`. All endpoints start down; the pool's own probe loop
/// (spawned separately by the caller) is what promotes them.
fn build_endpoint_pool(
    coinservs: &[crate::config::CoinservConfig],
    call_timeout: Duration,
) -> Arc<EndpointPool> {
    let endpoints = coinservs
        .iter()
        .map(|c| {
            orepool_rpc::RpcEndpoint::new(orepool_rpc::RpcEndpointConfig {
                host: c.address.clone(),
                port: c.port,
                username: c.username.clone(),
                password: c.password.clone(),
                pool_priority: c.poll_priority,
                max_pool_size: c.maxsize,
                call_timeout,
            })
        })
        .collect();
    EndpointPool::new(endpoints)
}

/// A minimal join-all helper so this module doesn't need to pull in
/// `futures` solely for `join_all` over a short, fixed-at-construction
/// `Vec<JoinHandle<()>>`.
async fn futures_join_all(handles: Vec<tokio::task::JoinHandle<()>>) {
    for handle in handles {
        let _ = handle.await;
    }
}
