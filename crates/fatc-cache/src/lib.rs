#![forbid(unsafe_code)]
//! Per-file cache of contiguous cluster runs.
//!
//! Walking a FAT chain costs one table read per cluster. The run cache
//! remembers stretches of a file's chain where logical and physical cluster
//! numbers advance in lockstep, so a later lookup can jump straight to (or
//! close to) the wanted cluster.
//!
//! ## Design
//!
//! 1. **Run**: one known-contiguous stretch: `file_cluster..=file_cluster +
//!    run_length` maps linearly onto `disk_cluster..`.
//! 2. **RunPool**: shared recycler of run entries with an optional bound on
//!    how many may be outstanding.
//! 3. **RunCache**: one per open file. An MRU-first list of entries guarded
//!    by a short mutex, a live count bounded by the configured capacity, and
//!    an invalidation [`Epoch`](fatc_types::Epoch).
//!
//! Lookups hand out a [`RunToken`] stamped with the epoch they observed.
//! The chain walker extends that token while it reads the FAT and hands it
//! back through [`RunCache::merge_or_insert`]; tokens from an older epoch are
//! dropped, so a truncate racing with a walk never leaves stale runs behind.

mod cache;
mod config;
mod pool;

pub use cache::{CacheLookup, CacheStats, RunCache, RunToken};
pub use config::{CacheConfig, DEFAULT_MAX_RUNS};
pub use pool::{PoolExhausted, RunEntry, RunPool};

use fatc_types::{ClusterNumber, FileCluster};
use serde::{Deserialize, Serialize};

/// One contiguous stretch of a file's cluster chain.
///
/// `run_length` counts the clusters *after* the first, so a single isolated
/// cluster has `run_length == 0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Run {
    pub file_cluster: FileCluster,
    pub disk_cluster: ClusterNumber,
    pub run_length: u64,
}

impl Run {
    pub(crate) const EMPTY: Self = Self {
        file_cluster: FileCluster(0),
        disk_cluster: ClusterNumber(0),
        run_length: 0,
    };

    /// A run consisting of the single cluster pair `(file_cluster, disk_cluster)`.
    #[must_use]
    pub fn new(file_cluster: FileCluster, disk_cluster: ClusterNumber) -> Self {
        Self {
            file_cluster,
            disk_cluster,
            run_length: 0,
        }
    }

    /// Last logical cluster covered by this run.
    #[must_use]
    pub fn last_file_cluster(&self) -> FileCluster {
        FileCluster(self.file_cluster.0.saturating_add(self.run_length))
    }

    #[must_use]
    pub fn contains(&self, target: FileCluster) -> bool {
        self.file_cluster <= target && target <= self.last_file_cluster()
    }

    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        self.file_cluster <= other.last_file_cluster()
            && other.file_cluster <= self.last_file_cluster()
    }

    /// Position `offset` clusters into the run, in both address spaces.
    #[must_use]
    pub fn at(&self, offset: u64) -> (FileCluster, ClusterNumber) {
        (
            FileCluster(self.file_cluster.0 + offset),
            ClusterNumber(self.disk_cluster.0 + offset),
        )
    }
}
