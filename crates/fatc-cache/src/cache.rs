//! The per-file run cache: lookup, merge-on-insert, LRU eviction and
//! epoch-based invalidation.

use crate::{CacheConfig, Run, RunEntry, RunPool};
use fatc_types::{ClusterNumber, Epoch, FileCluster};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, trace, warn};

/// A run discovered (or being discovered) by a chain walk, stamped with the
/// cache epoch observed when the walk started.
///
/// `run == None` means nothing has been walked yet; merging such a token is
/// a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunToken {
    epoch: Epoch,
    run: Option<Run>,
}

impl RunToken {
    #[must_use]
    pub fn empty(epoch: Epoch) -> Self {
        Self { epoch, run: None }
    }

    #[must_use]
    pub fn new(epoch: Epoch, run: Run) -> Self {
        Self {
            epoch,
            run: Some(run),
        }
    }

    /// A token that survives any number of invalidations. Only for runs the
    /// caller knows to be authoritative, e.g. clusters it just allocated.
    #[must_use]
    pub fn always_valid(run: Run) -> Self {
        Self::new(Epoch::ALWAYS_VALID, run)
    }

    #[must_use]
    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    #[must_use]
    pub fn run(&self) -> Option<Run> {
        self.run
    }

    /// Start a fresh single-cluster run at `(file_cluster, disk_cluster)`.
    pub fn restart(&mut self, file_cluster: FileCluster, disk_cluster: ClusterNumber) {
        self.run = Some(Run::new(file_cluster, disk_cluster));
    }

    /// Append `next` if it directly follows the run on disk.
    ///
    /// Returns `false` and leaves the token untouched otherwise.
    pub fn try_extend(&mut self, next: ClusterNumber) -> bool {
        let Some(run) = self.run.as_mut() else {
            return false;
        };
        let contiguous = run
            .disk_cluster
            .checked_add(run.run_length)
            .is_some_and(|last| last.is_followed_by(next));
        if contiguous {
            run.run_length += 1;
            true
        } else {
            false
        }
    }
}

/// Outcome of [`RunCache::lookup`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheLookup {
    /// No cached run starts at or before the target.
    Miss { epoch: Epoch },
    /// `run` is the closest cached run starting at or before the target.
    ///
    /// If the target lies inside the run, `offset` is its distance from the
    /// run start. Otherwise `offset == run.run_length`: the run's last
    /// cluster, where the caller should resume walking.
    Hit { epoch: Epoch, run: Run, offset: u64 },
}

impl CacheLookup {
    /// Position the lookup resolved to, if any.
    #[must_use]
    pub fn position(&self) -> Option<(FileCluster, ClusterNumber)> {
        match self {
            Self::Miss { .. } => None,
            Self::Hit { run, offset, .. } => Some(run.at(*offset)),
        }
    }

    #[must_use]
    pub fn is_hit(&self) -> bool {
        matches!(self, Self::Hit { .. })
    }

    /// Token the walker extends and later hands to `merge_or_insert`.
    #[must_use]
    pub fn into_token(self) -> RunToken {
        match self {
            Self::Miss { epoch } => RunToken::empty(epoch),
            Self::Hit { epoch, run, .. } => RunToken::new(epoch, run),
        }
    }
}

/// Counters describing cache effectiveness since creation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub inserts: u64,
    pub merges: u64,
    pub evictions: u64,
    pub stale_drops: u64,
    pub exhausted: u64,
    pub invalidations: u64,
}

#[derive(Debug, Default)]
struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    inserts: AtomicU64,
    merges: AtomicU64,
    evictions: AtomicU64,
    stale_drops: AtomicU64,
    exhausted: AtomicU64,
    invalidations: AtomicU64,
}

impl CacheCounters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            inserts: self.inserts.load(Ordering::Relaxed),
            merges: self.merges.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            stale_drops: self.stale_drops.load(Ordering::Relaxed),
            exhausted: self.exhausted.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug)]
struct CacheState {
    /// Most recently used first.
    lru: VecDeque<RunEntry>,
    /// Live entries plus slots reserved by inserts that are allocating.
    nr_runs: usize,
    valid_epoch: Epoch,
}

impl CacheState {
    fn promote(&mut self, idx: usize) {
        if idx == 0 {
            return;
        }
        if let Some(entry) = self.lru.remove(idx) {
            self.lru.push_front(entry);
        }
    }

    /// Extend the entry starting at `run.file_cluster`, if there is one, and
    /// move it to the front.
    fn merge(&mut self, run: &Run) -> bool {
        let Some(idx) = self
            .lru
            .iter()
            .position(|entry| entry.run().file_cluster == run.file_cluster)
        else {
            return false;
        };
        let entry = &mut self.lru[idx];
        let existing = entry.run();
        assert_eq!(
            existing.disk_cluster, run.disk_cluster,
            "run cache: file cluster {} cached at disk cluster {} but merged run claims {}",
            run.file_cluster, existing.disk_cluster, run.disk_cluster
        );
        entry.extend_to(run.run_length);
        self.promote(idx);
        true
    }
}

/// LRU cache of contiguous runs for one open file.
///
/// All operations take the internal mutex only for list manipulation; the
/// pool is called with it released.
#[derive(Debug)]
pub struct RunCache {
    pool: Arc<RunPool>,
    max_runs: usize,
    state: Mutex<CacheState>,
    counters: CacheCounters,
}

impl RunCache {
    /// A cache holding at most `max_runs` runs (at least one).
    #[must_use]
    pub fn new(pool: Arc<RunPool>, max_runs: usize) -> Self {
        Self {
            pool,
            max_runs: max_runs.max(1),
            state: Mutex::new(CacheState {
                lru: VecDeque::new(),
                nr_runs: 0,
                valid_epoch: Epoch::INITIAL,
            }),
            counters: CacheCounters::default(),
        }
    }

    #[must_use]
    pub fn from_config(pool: Arc<RunPool>, config: &CacheConfig) -> Self {
        Self::new(pool, config.max_runs_per_file)
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.max_runs
    }

    /// Number of live runs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().lru.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn epoch(&self) -> Epoch {
        self.state.lock().valid_epoch
    }

    /// Live runs, most recently used first.
    #[must_use]
    pub fn runs(&self) -> Vec<Run> {
        self.state.lock().lru.iter().map(RunEntry::run).collect()
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.counters.snapshot()
    }

    #[must_use]
    pub fn pool(&self) -> &Arc<RunPool> {
        &self.pool
    }

    /// Find the cached run closest to `target` from below.
    ///
    /// A hit is promoted to most recently used. Never allocates.
    pub fn lookup(&self, target: FileCluster) -> CacheLookup {
        let mut state = self.state.lock();
        let epoch = state.valid_epoch;

        let mut best: Option<(usize, Run, u64)> = None;
        for (idx, entry) in state.lru.iter().enumerate() {
            let run = entry.run();
            if run.file_cluster > target {
                continue;
            }
            if best.is_some_and(|(_, b, _)| b.file_cluster >= run.file_cluster) {
                continue;
            }
            if run.contains(target) {
                best = Some((idx, run, target.0 - run.file_cluster.0));
                break;
            }
            best = Some((idx, run, run.run_length));
        }

        let Some((idx, run, offset)) = best else {
            drop(state);
            CacheCounters::bump(&self.counters.misses);
            trace!(target = target.0, epoch = epoch.get(), "run_cache_miss");
            return CacheLookup::Miss { epoch };
        };
        state.promote(idx);
        drop(state);

        CacheCounters::bump(&self.counters.hits);
        trace!(
            target = target.0,
            file_cluster = run.file_cluster.0,
            disk_cluster = run.disk_cluster.0,
            run_length = run.run_length,
            offset,
            "run_cache_hit"
        );
        CacheLookup::Hit { epoch, run, offset }
    }

    /// Record the run carried by `token`.
    ///
    /// Dropped silently if the token is empty, its epoch is stale, or the
    /// pool is exhausted. A run with a known start is extended in place; a
    /// new run takes a fresh entry while under capacity and otherwise
    /// overwrites the least recently used one.
    ///
    /// # Panics
    ///
    /// Panics if a cached run with the same file cluster maps to a different
    /// disk cluster within the same epoch.
    pub fn merge_or_insert(&self, token: &RunToken) {
        let Some(run) = token.run() else {
            return;
        };

        let mut state = self.state.lock();
        if !token.epoch().admits(state.valid_epoch) {
            let current = state.valid_epoch;
            drop(state);
            self.note_stale(token, current);
            return;
        }
        if state.merge(&run) {
            drop(state);
            CacheCounters::bump(&self.counters.merges);
            return;
        }

        if state.nr_runs < self.max_runs {
            state.nr_runs += 1;
            drop(state);
            self.insert_new(token, run);
            return;
        }

        let Some(mut victim) = state.lru.pop_back() else {
            // Every slot is reserved by an insert still allocating.
            return;
        };
        let evicted = victim.run();
        victim.assign(run);
        state.lru.push_front(victim);
        drop(state);

        CacheCounters::bump(&self.counters.evictions);
        debug!(
            evicted_file_cluster = evicted.file_cluster.0,
            evicted_disk_cluster = evicted.disk_cluster.0,
            file_cluster = run.file_cluster.0,
            disk_cluster = run.disk_cluster.0,
            run_length = run.run_length,
            "run_cache_evict"
        );
    }

    /// Second half of an insert under capacity. The caller has reserved a
    /// slot in `nr_runs` and released the lock.
    fn insert_new(&self, token: &RunToken, run: Run) {
        let mut entry = match self.pool.allocate() {
            Ok(entry) => entry,
            Err(err) => {
                self.state.lock().nr_runs -= 1;
                CacheCounters::bump(&self.counters.exhausted);
                warn!(
                    file_cluster = run.file_cluster.0,
                    limit = err.limit,
                    "run_cache_pool_exhausted"
                );
                return;
            }
        };

        let mut state = self.state.lock();
        if !token.epoch().admits(state.valid_epoch) {
            state.nr_runs -= 1;
            let current = state.valid_epoch;
            drop(state);
            self.pool.release(entry);
            self.note_stale(token, current);
            return;
        }
        // Someone may have inserted the same run while the lock was dropped.
        if state.merge(&run) {
            state.nr_runs -= 1;
            drop(state);
            self.pool.release(entry);
            CacheCounters::bump(&self.counters.merges);
            return;
        }

        entry.assign(run);
        entry.attach();
        state.lru.push_front(entry);
        drop(state);

        CacheCounters::bump(&self.counters.inserts);
        trace!(
            file_cluster = run.file_cluster.0,
            disk_cluster = run.disk_cluster.0,
            run_length = run.run_length,
            "run_cache_insert"
        );
    }

    fn note_stale(&self, token: &RunToken, current: Epoch) {
        CacheCounters::bump(&self.counters.stale_drops);
        debug!(
            token_epoch = token.epoch().get(),
            current_epoch = current.get(),
            "run_cache_stale_token"
        );
    }

    /// Drop every cached run and advance the epoch so that tokens handed out
    /// before this call can no longer be merged.
    pub fn invalidate(&self) {
        let mut state = self.state.lock();
        let drained: Vec<RunEntry> = state.lru.drain(..).collect();
        state.nr_runs -= drained.len();
        state.valid_epoch = state.valid_epoch.next();
        let epoch = state.valid_epoch;
        drop(state);

        let released = drained.len();
        for mut entry in drained {
            entry.detach();
            self.pool.release(entry);
        }
        CacheCounters::bump(&self.counters.invalidations);
        debug!(released, epoch = epoch.get(), "run_cache_invalidate");
    }
}

impl Drop for RunCache {
    fn drop(&mut self) {
        let pool = &self.pool;
        let state = self.state.get_mut();
        for mut entry in state.lru.drain(..) {
            entry.detach();
            pool.release(entry);
        }
        state.nr_runs = 0;
    }
}
