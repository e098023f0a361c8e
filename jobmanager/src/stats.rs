//! Observable counters read by operators and (eventually) the share
//! accounting layer. None of this is read by the job manager itself to
//! make decisions — it's exposed state only.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

/// Primary-chain stats derived from the current template, plus block
/// accounting fields (`block_stats`, `recent_blocks`) that are cheap to
/// keep here and read by the (out-of-scope) share-accounting layer.
#[derive(Default)]
pub struct NetworkStats {
    height: AtomicU64,
    // difficulty and subsidy change rarely enough, and are read often
    // enough from other tasks, that a lock-free bit-pattern store isn't
    // worth it; a small lock is simpler and these fields are never hot.
    inner: RwLock<NetworkStatsInner>,
}

#[derive(Default, Clone)]
struct NetworkStatsInner {
    difficulty: Option<f64>,
    subsidy: Option<u64>,
    block_stats: BlockStats,
    recent_blocks: VecDeque<u64>,
}

#[derive(Default, Clone, Copy)]
pub struct BlockStats {
    pub accepts: u64,
    pub rejects: u64,
    pub solves: u64,
    pub last_solve_height: Option<u64>,
    pub last_solve_time: Option<u64>,
}

const RECENT_BLOCKS_CAPACITY: usize = 15;

impl NetworkStats {
    pub fn height(&self) -> u64 {
        self.height.load(Ordering::Relaxed)
    }

    pub fn set_height(&self, height: u64) {
        self.height.store(height, Ordering::Relaxed);
    }

    pub fn difficulty(&self) -> Option<f64> {
        self.inner.read().expect("stats lock poisoned").difficulty
    }

    pub fn set_difficulty(&self, difficulty: f64) {
        self.inner.write().expect("stats lock poisoned").difficulty = Some(difficulty);
    }

    pub fn subsidy(&self) -> Option<u64> {
        self.inner.read().expect("stats lock poisoned").subsidy
    }

    pub fn set_subsidy(&self, subsidy: u64) {
        self.inner.write().expect("stats lock poisoned").subsidy = Some(subsidy);
    }

    pub fn block_stats(&self) -> BlockStats {
        self.inner.read().expect("stats lock poisoned").block_stats
    }

    pub fn record_solve(&self, height: u64, time: u64) {
        let mut inner = self.inner.write().expect("stats lock poisoned");
        inner.block_stats.solves += 1;
        inner.block_stats.last_solve_height = Some(height);
        inner.block_stats.last_solve_time = Some(time);
        inner.recent_blocks.push_back(height);
        if inner.recent_blocks.len() > RECENT_BLOCKS_CAPACITY {
            inner.recent_blocks.pop_front();
        }
    }

    pub fn recent_blocks(&self) -> Vec<u64> {
        self.inner
            .read()
            .expect("stats lock poisoned")
            .recent_blocks
            .iter()
            .copied()
            .collect()
    }
}

/// Per-aux-chain counters.
#[derive(Default)]
pub struct AuxMonitorStats {
    work_restarts: AtomicU64,
    new_jobs: AtomicU64,
    height: AtomicU64,
    inner: RwLock<f64>,
}

impl AuxMonitorStats {
    pub fn work_restarts(&self) -> u64 {
        self.work_restarts.load(Ordering::Relaxed)
    }

    pub fn incr_work_restarts(&self) {
        self.work_restarts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn new_jobs(&self) -> u64 {
        self.new_jobs.load(Ordering::Relaxed)
    }

    pub fn incr_new_jobs(&self) {
        self.new_jobs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn height(&self) -> u64 {
        self.height.load(Ordering::Relaxed)
    }

    pub fn set_height(&self, height: u64) {
        self.height.store(height, Ordering::Relaxed);
    }

    pub fn difficulty(&self) -> f64 {
        *self.inner.read().expect("stats lock poisoned")
    }

    pub fn set_difficulty(&self, difficulty: f64) {
        *self.inner.write().expect("stats lock poisoned") = difficulty;
    }
}
