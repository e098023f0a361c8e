//! The job data model: a prepared block skeleton handed to mining clients,
//! and the table it lives in while it's current.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use orepool_chain::{Hash, Target};

/// One entry in the merged-work map, keyed by `chain_id` in the table that
/// owns it rather than embedding a back-reference to its `AuxMonitor` —
/// submission routing is resolved through [`AuxRegistry`] instead of a
/// pointer cycle between a monitor and its own published work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedWorkEntry {
    pub chain_id: u32,
    pub hash: Hash,
    pub target: Target,
}

/// Maps a `chain_id` back to the human-readable name of the aux chain that
/// owns it, so submission routing and logging don't need a pointer back
/// into the `AuxMonitor` task itself.
#[derive(Debug, Default, Clone)]
pub struct AuxRegistry {
    names: HashMap<u32, String>,
}

impl AuxRegistry {
    pub fn register(&mut self, chain_id: u32, name: impl Into<String>) {
        self.names.insert(chain_id, name.into());
    }

    pub fn name_for(&self, chain_id: u32) -> Option<&str> {
        self.names.get(&chain_id).map(String::as_str)
    }
}

/// One entry of `merged_later`: an aux work entry as it existed at job
/// creation time, the index of its hash within the aux merkle tree's leaf
/// list, and the full leaf list (needed to rebuild the aux merkle branch on
/// submission).
#[derive(Debug, Clone)]
pub struct MergedLaterEntry {
    pub work: MergedWorkEntry,
    pub coinbase_branch_index: usize,
    pub all_mm_hashes: Vec<Hash>,
}

/// A prepared block skeleton. Immutable once installed in the
/// [`JobTable`] — a new template or merged-work change produces a new
/// `Job`, it never mutates an existing one.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: String,
    pub height: u64,
    pub coinbase_prefix: Vec<u8>,
    pub coinbase_suffix: Vec<u8>,
    pub merkle_link: Vec<Hash>,
    pub transactions: Vec<Vec<u8>>,
    pub merged_later: Vec<MergedLaterEntry>,
    pub bits: u32,
    pub prev_hash: Hash,
    pub version: i32,
    pub min_time: u32,
    pub max_time: u32,
    pub target: Target,
    pub acc_shares: HashSet<String>,
}

/// `id -> Job`, plus the id of the most recently created job.
#[derive(Debug, Default, Clone)]
pub struct JobTable {
    jobs: HashMap<String, Job>,
    latest_job_id: Option<String>,
}

impl JobTable {
    pub fn new() -> Self {
        JobTable::default()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn latest_job_id(&self) -> Option<&str> {
        self.latest_job_id.as_deref()
    }

    pub fn get(&self, id: &str) -> Option<&Job> {
        self.jobs.get(id)
    }

    /// Installs `job`, making it `latest_job_id`. Never clears existing
    /// jobs — callers wanting a flush must call [`Self::clear`] first.
    pub fn install(&mut self, job: Job) {
        self.latest_job_id = Some(job.id.clone());
        self.jobs.insert(job.id.clone(), job);
    }

    /// Drops every job and `latest_job_id` together, atomically from the
    /// caller's point of view (the table lives behind one lock upstream).
    pub fn clear(&mut self) {
        self.jobs.clear();
        self.latest_job_id = None;
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }
}

/// A read-only handle onto the job builder's `JobTable`, published by
/// `JobBuilder` after every `generate()` call.
///
/// A single atomic pointer to an immutable `{table, latest}` snapshot: the
/// stratum layer reads `latest_job_id()` and `get()` through this handle
/// without ever observing a table that's been cleared but not yet had its
/// new job installed, or vice versa — each `publish` swaps in one
/// complete, internally-consistent `JobTable` at once.
#[derive(Default)]
pub struct JobTableHandle {
    current: RwLock<Arc<JobTable>>,
}

impl JobTableHandle {
    pub fn new() -> Self {
        JobTableHandle::default()
    }

    /// Swaps in a freshly-built table. Called by `JobBuilder` only.
    pub fn publish(&self, table: JobTable) {
        *self.current.write().expect("job table handle lock poisoned") = Arc::new(table);
    }

    /// An immutable, consistent snapshot of the table as of the last
    /// `publish`.
    pub fn snapshot(&self) -> Arc<JobTable> {
        self.current.read().expect("job table handle lock poisoned").clone()
    }

    pub fn latest_job_id(&self) -> Option<String> {
        self.snapshot().latest_job_id().map(str::to_string)
    }

    pub fn get(&self, id: &str) -> Option<Job> {
        self.snapshot().get(id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_job(id: &str, height: u64) -> Job {
        Job {
            id: id.to_string(),
            height,
            coinbase_prefix: vec![],
            coinbase_suffix: vec![],
            merkle_link: vec![],
            transactions: vec![],
            merged_later: vec![],
            bits: 0x1d00ffff,
            prev_hash: [0u8; 32],
            version: 2,
            min_time: 0,
            max_time: 0,
            target: [0u8; 32],
            acc_shares: HashSet::new(),
        }
    }

    #[test]
    fn empty_table_has_no_latest_id() {
        let table = JobTable::new();
        assert!(table.is_empty());
        assert_eq!(table.latest_job_id(), None);
    }

    #[test]
    fn install_sets_latest_and_keeps_prior_jobs() {
        let mut table = JobTable::new();
        table.install(sample_job("00000001", 100));
        table.install(sample_job("00000002", 100));
        assert_eq!(table.latest_job_id(), Some("00000002"));
        assert_eq!(table.len(), 2);
        assert!(table.get("00000001").is_some());
    }

    #[test]
    fn clear_empties_table_and_latest_together() {
        let mut table = JobTable::new();
        table.install(sample_job("00000001", 100));
        table.clear();
        assert!(table.is_empty());
        assert_eq!(table.latest_job_id(), None);
    }

    #[test]
    fn aux_registry_looks_up_by_chain_id() {
        let mut registry = AuxRegistry::default();
        registry.register(1, "namecoin");
        assert_eq!(registry.name_for(1), Some("namecoin"));
        assert_eq!(registry.name_for(2), None);
    }

    #[test]
    fn handle_starts_empty_and_reflects_each_publish() {
        let handle = JobTableHandle::new();
        assert_eq!(handle.latest_job_id(), None);

        let mut table = JobTable::new();
        table.install(sample_job("00000001", 100));
        handle.publish(table);

        assert_eq!(handle.latest_job_id(), Some("00000001".to_string()));
        assert_eq!(handle.get("00000001").map(|j| j.height), Some(100));
        assert!(handle.get("nonexistent").is_none());
    }

    #[test]
    fn handle_never_exposes_a_half_installed_flush() {
        let handle = JobTableHandle::new();
        let mut table = JobTable::new();
        table.install(sample_job("00000001", 100));
        handle.publish(table);

        let mut flushed = JobTable::new();
        flushed.clear();
        flushed.install(sample_job("00000002", 101));
        handle.publish(flushed);

        let snapshot = handle.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.latest_job_id(), Some("00000002"));
    }
}
