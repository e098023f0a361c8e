//! The single consumer that owns the `JobTable`, the job counter, and the
//! merged-work map, and turns `RefreshRequest`s into installed jobs.
//!
//! Routing every job-affecting event through one channel-fed task —
//! instead of a mutex shared between `NetworkMonitor` and every
//! `AuxMonitor` — serializes job generation for free: there is never more
//! than one `generate()` in flight, so job-table/latest-id consistency and
//! counter monotonicity hold without any of this module taking a lock
//! itself.

use std::collections::HashMap;
use std::sync::Arc;

use log::info;
use orepool_chain::{
    auxpow::{build_auxpow_tree, build_mm_commitment},
    coinbase::CoinbaseBuilder,
    difficulty::bits_to_difficulty,
    hashing::calculate_merkle_link,
    Address, Hash,
};
use tokio::sync::mpsc;

use crate::event_sink::SinkRegistry;
use crate::job::{Job, JobTable, JobTableHandle, MergedLaterEntry, MergedWorkEntry};
use crate::stats::NetworkStats;

/// Pool signature appended to every coinbase's scriptSig, after the
/// extranonce placeholder. Purely informational; a block explorer or a
/// curious miner is the only audience.
const POOL_SIGNATURE: &[u8] = b"/orepool/";

/// The maximum spread between a job's `min_time` and `max_time`, matching
/// the two-hour window Bitcoin Core itself allows between a block's
/// timestamp and the network-adjusted time.
const MAX_TIME_DRIFT_SECS: u32 = 7200;

/// A request to regenerate the current job, sent by `NetworkMonitor` (a
/// fresh or dirty primary template) or by any `AuxMonitor` (a merged-work
/// change). The `JobBuilder` task is the sole consumer.
pub enum RefreshRequest {
    Template {
        template: Box<orepool_chain::BlockTemplate>,
        push: bool,
        flush: bool,
        new_block: bool,
    },
    MergedWork {
        entry: MergedWorkEntry,
        push: bool,
        flush: bool,
    },
}

pub struct JobBuilderConfig {
    pub extranonce_size: usize,
    pub extranonce_serv_size: usize,
    pub diff1_bits: u32,
    pub pool_address: Address,
}

/// Owns every piece of state `generate()` touches. Lives entirely inside
/// the task spawned by [`run`] — nothing outside this module ever locks
/// it, because nothing outside this module ever sees it.
struct BuilderState {
    config: JobBuilderConfig,
    latest_template: Option<orepool_chain::BlockTemplate>,
    merged_work: HashMap<u32, MergedWorkEntry>,
    job_table: JobTable,
    job_counter: u32,
}

impl BuilderState {
    /// Merged-work assembly, coinbase construction, job finalization, and
    /// the push/flush publication policy, in one pass.
    fn generate(
        &mut self,
        push: bool,
        flush: bool,
        new_block: bool,
        stats: &NetworkStats,
        sinks: &SinkRegistry,
        table_handle: &JobTableHandle,
    ) {
        let Some(template) = self.latest_template.clone() else {
            // Aux monitors routinely call this before the primary loop has
            // seeded a template; silently doing nothing is correct.
            return;
        };

        let (aux_commitment, merged_later) = self.build_merged_work();

        let bits = match template.bits_value() {
            Ok(bits) => bits,
            Err(e) => {
                log::warn!("malformed bits in cached template: {e}");
                return;
            }
        };
        let prev_hash = match template.previous_block_hash_bytes() {
            Ok(hash) => hash,
            Err(e) => {
                log::warn!("malformed previousblockhash in cached template: {e}");
                return;
            }
        };
        let tx_hashes = match template.transaction_hashes() {
            Ok(hashes) => hashes,
            Err(e) => {
                log::warn!("malformed transaction list in cached template: {e}");
                return;
            }
        };

        let extranonce1_size = self.config.extranonce_serv_size;
        let extranonce2_size = self.config.extranonce_size;

        let mut builder = CoinbaseBuilder::new(
            template.height,
            template.coinbase_value,
            &self.config.pool_address,
            extranonce1_size,
            extranonce2_size,
        )
        .with_pool_signature(POOL_SIGNATURE.to_vec());
        if let Some(commitment) = aux_commitment {
            builder = builder.with_aux_commitment(commitment);
        }
        let (coinbase_prefix, coinbase_suffix) = builder.build();

        let merkle_link = calculate_merkle_link(&tx_hashes);
        let raw_transactions: Vec<Vec<u8>> = template
            .transactions
            .iter()
            .filter_map(|tx| hex::decode(&tx.data).ok())
            .collect();

        let id = format!("{:08x}", self.job_counter);
        self.job_counter = self.job_counter.wrapping_add(1);

        info!(
            "generating job {id} with {} transactions, diff {:.4}, subsidy {}",
            template.transactions.len(),
            bits_to_difficulty(bits, self.config.diff1_bits),
            template.coinbase_value
        );

        let job = Job {
            id: id.clone(),
            height: template.height,
            coinbase_prefix,
            coinbase_suffix,
            merkle_link,
            transactions: raw_transactions,
            merged_later,
            bits,
            prev_hash,
            version: template.version,
            min_time: template.cur_time,
            max_time: template.cur_time.saturating_add(MAX_TIME_DRIFT_SECS),
            target: orepool_chain::difficulty::bits_to_target(bits),
            acc_shares: Default::default(),
        };

        if push && flush {
            info!("new work announced! wiping previous jobs...");
            self.job_table.clear();
            self.job_table.install(job);
            table_handle.publish(self.job_table.clone());
            sinks.fan_out_new_block();
        } else if push {
            info!("new work announced!");
            self.job_table.install(job);
            table_handle.publish(self.job_table.clone());
            sinks.fan_out_new_work();
        } else {
            self.job_table.install(job);
            table_handle.publish(self.job_table.clone());
        }

        if new_block {
            stats.set_difficulty(bits_to_difficulty(bits, self.config.diff1_bits));
        }
    }

    /// Builds the `\xfa\xbemm...` commitment and the `merged_later`
    /// snapshot from the current `merged_work` map. Returns `(None, [])`
    /// when there's no merged work, so a pool with zero aux chains
    /// configured produces ordinary non-merged jobs.
    fn build_merged_work(&self) -> (Option<Vec<u8>>, Vec<MergedLaterEntry>) {
        if self.merged_work.is_empty() {
            return (None, Vec::new());
        }

        let chain_ids: Vec<u32> = self.merged_work.keys().copied().collect();
        let tree = build_auxpow_tree(&chain_ids);

        let mut mm_hashes = vec![[0u8; 32]; tree.size as usize];
        for (&chain_id, entry) in &self.merged_work {
            if let Some(slot) = tree.slot_for(chain_id) {
                mm_hashes[slot as usize] = entry.hash;
            }
        }

        let mut aux_hashes_by_chain: HashMap<u32, Hash> = HashMap::new();
        for (&chain_id, entry) in &self.merged_work {
            aux_hashes_by_chain.insert(chain_id, entry.hash);
        }
        let commitment = build_mm_commitment(&tree, &aux_hashes_by_chain);

        let merged_later = self
            .merged_work
            .values()
            .filter_map(|entry| {
                tree.slot_for(entry.chain_id).map(|slot| MergedLaterEntry {
                    work: entry.clone(),
                    coinbase_branch_index: slot as usize,
                    all_mm_hashes: mm_hashes.clone(),
                })
            })
            .collect();

        (Some(commitment), merged_later)
    }
}

/// Spawns the `JobBuilder` consumer task. Returns immediately; the task
/// runs until `requests` is dropped (every sender side gone) or the
/// channel is explicitly closed during shutdown.
pub fn spawn(
    config: JobBuilderConfig,
    mut requests: mpsc::Receiver<RefreshRequest>,
    stats: Arc<NetworkStats>,
    sinks: Arc<SinkRegistry>,
    table_handle: Arc<JobTableHandle>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut state = BuilderState {
            config,
            latest_template: None,
            merged_work: HashMap::new(),
            job_table: JobTable::new(),
            job_counter: 0,
        };

        while let Some(request) = requests.recv().await {
            match request {
                RefreshRequest::Template {
                    template,
                    push,
                    flush,
                    new_block,
                } => {
                    state.latest_template = Some(*template);
                    state.generate(push, flush, new_block, &stats, &sinks, &table_handle);
                }
                RefreshRequest::MergedWork { entry, push, flush } => {
                    state.merged_work.insert(entry.chain_id, entry);
                    state.generate(push, flush, false, &stats, &sinks, &table_handle);
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use orepool_chain::template::{BlockTemplate, RawTransaction};

    fn test_config() -> JobBuilderConfig {
        JobBuilderConfig {
            extranonce_size: 4,
            extranonce_serv_size: 8,
            diff1_bits: orepool_chain::difficulty::DIFF1_BITS,
            pool_address: Address::parse("1BoatSLRHtKNngkdXEeobR76b53LETtpyT").unwrap(),
        }
    }

    fn sample_template(height: u64) -> BlockTemplate {
        BlockTemplate {
            version: 536870912,
            previous_block_hash: "00".repeat(32),
            transactions: vec![RawTransaction {
                data: "deadbeef".to_string(),
                txid: "11".repeat(32),
                fee: 100,
            }],
            coinbase_value: 5_000_000_000,
            bits: "1d00ffff".to_string(),
            cur_time: 1_700_000_000,
            height,
            mutable: vec![],
            target: None,
            default_witness_commitment: None,
        }
    }

    fn new_state() -> BuilderState {
        BuilderState {
            config: test_config(),
            latest_template: None,
            merged_work: HashMap::new(),
            job_table: JobTable::new(),
            job_counter: 0,
        }
    }

    #[test]
    fn generate_before_any_template_is_a_silent_no_op() {
        let mut state = new_state();
        let stats = NetworkStats::default();
        let sinks = SinkRegistry::new();
        let table_handle = JobTableHandle::new();
        state.generate(true, true, true, &stats, &sinks, &table_handle);
        assert!(state.job_table.is_empty());
        assert_eq!(table_handle.latest_job_id(), None);
    }

    #[test]
    fn generate_installs_a_job_once_a_template_is_cached() {
        let mut state = new_state();
        state.latest_template = Some(sample_template(100));
        let stats = NetworkStats::default();
        let sinks = SinkRegistry::new();
        let table_handle = JobTableHandle::new();

        state.generate(true, true, true, &stats, &sinks, &table_handle);

        assert_eq!(state.job_table.len(), 1);
        assert_eq!(state.job_table.latest_job_id(), Some("00000000"));
        assert!(stats.difficulty().is_some());
        assert_eq!(table_handle.latest_job_id(), Some("00000000".to_string()));
    }

    #[test]
    fn flush_clears_prior_jobs_before_installing() {
        let mut state = new_state();
        state.latest_template = Some(sample_template(100));
        let stats = NetworkStats::default();
        let sinks = SinkRegistry::new();
        let table_handle = JobTableHandle::new();

        state.generate(true, false, false, &stats, &sinks, &table_handle);
        assert_eq!(state.job_table.len(), 1);

        state.latest_template = Some(sample_template(101));
        state.generate(true, true, true, &stats, &sinks, &table_handle);
        assert_eq!(state.job_table.len(), 1);
        assert_eq!(state.job_table.latest_job_id(), Some("00000001"));
        assert_eq!(table_handle.snapshot().len(), 1);
        assert_eq!(table_handle.latest_job_id(), Some("00000001".to_string()));
    }

    #[test]
    fn no_push_installs_without_clearing_or_notifying() {
        let mut state = new_state();
        state.latest_template = Some(sample_template(100));
        let stats = NetworkStats::default();
        let sinks = SinkRegistry::new();
        let table_handle = JobTableHandle::new();

        state.generate(true, true, true, &stats, &sinks, &table_handle);
        state.generate(false, false, false, &stats, &sinks, &table_handle);

        assert_eq!(state.job_table.len(), 2);
        assert_eq!(table_handle.snapshot().len(), 2);
    }

    #[test]
    fn empty_merged_work_yields_no_aux_commitment() {
        let mut state = new_state();
        state.latest_template = Some(sample_template(100));
        let stats = NetworkStats::default();
        let sinks = SinkRegistry::new();
        let table_handle = JobTableHandle::new();
        state.generate(true, true, true, &stats, &sinks, &table_handle);

        let job = state
            .job_table
            .get(state.job_table.latest_job_id().unwrap())
            .unwrap();
        assert!(job.merged_later.is_empty());
    }

    #[test]
    fn merged_work_produces_a_commitment_and_merged_later_entries() {
        let mut state = new_state();
        state.latest_template = Some(sample_template(100));
        state.merged_work.insert(
            7,
            MergedWorkEntry {
                chain_id: 7,
                hash: [0xAB; 32],
                target: [0xFF; 32],
            },
        );
        let stats = NetworkStats::default();
        let sinks = SinkRegistry::new();
        let table_handle = JobTableHandle::new();
        state.generate(true, true, true, &stats, &sinks, &table_handle);

        let job = state
            .job_table
            .get(state.job_table.latest_job_id().unwrap())
            .unwrap();
        assert_eq!(job.merged_later.len(), 1);
        assert_eq!(job.merged_later[0].work.chain_id, 7);
    }
}
