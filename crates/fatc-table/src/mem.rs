use crate::{FatTable, check_cluster};
use fatc_error::{FatError, Result};
use fatc_types::{ClusterNumber, FAT_START_ENT, FatEntry, FatKind};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};

/// In-memory FAT.
///
/// Entries are stored decoded. Every `read_entry` call is counted so callers
/// can assert how many FAT reads a resolution cost, and a single cluster can
/// be armed to fail with an I/O error.
#[derive(Debug)]
pub struct MemFatTable {
    kind: FatKind,
    entries: RwLock<Vec<FatEntry>>,
    reads: AtomicU64,
    io_fault: Mutex<Option<ClusterNumber>>,
}

impl MemFatTable {
    /// An all-free table covering clusters below `max_cluster`.
    #[must_use]
    pub fn new(kind: FatKind, max_cluster: u64) -> Self {
        let len = usize::try_from(max_cluster.max(FAT_START_ENT)).unwrap_or(usize::MAX);
        Self {
            kind,
            entries: RwLock::new(vec![FatEntry::Free; len]),
            reads: AtomicU64::new(0),
            io_fault: Mutex::new(None),
        }
    }

    /// Overwrite the entry for `cluster`. Out-of-range clusters are ignored.
    pub fn set(&self, cluster: u64, entry: FatEntry) {
        let mut entries = self.entries.write();
        if let Some(slot) = usize::try_from(cluster)
            .ok()
            .and_then(|idx| entries.get_mut(idx))
        {
            *slot = entry;
        }
    }

    /// Link `clusters` into one chain terminated by an end-of-chain marker.
    pub fn link(&self, clusters: &[u64]) {
        let mut entries = self.entries.write();
        for (idx, &cluster) in clusters.iter().enumerate() {
            let entry = clusters
                .get(idx + 1)
                .map_or(FatEntry::EndOfChain, |&next| {
                    FatEntry::Next(ClusterNumber(next))
                });
            if let Some(slot) = usize::try_from(cluster)
                .ok()
                .and_then(|i| entries.get_mut(i))
            {
                *slot = entry;
            }
        }
    }

    /// Current entry for `cluster` without counting a read.
    #[must_use]
    pub fn get(&self, cluster: u64) -> Option<FatEntry> {
        let idx = usize::try_from(cluster).ok()?;
        self.entries.read().get(idx).copied()
    }

    /// Number of `read_entry` calls since creation or the last reset.
    #[must_use]
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    pub fn reset_reads(&self) {
        self.reads.store(0, Ordering::Relaxed);
    }

    /// Make reads of `cluster` fail with an I/O error (`None` disarms).
    pub fn fail_reads_at(&self, cluster: Option<ClusterNumber>) {
        *self.io_fault.lock() = cluster;
    }
}

impl FatTable for MemFatTable {
    fn read_entry(&self, cluster: ClusterNumber) -> Result<FatEntry> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        check_cluster(cluster, self.max_cluster())?;
        if *self.io_fault.lock() == Some(cluster) {
            return Err(FatError::Io(std::io::Error::other(format!(
                "injected read fault at cluster {cluster}"
            ))));
        }
        let idx = usize::try_from(cluster.0)
            .map_err(|_| FatError::Format("cluster index does not fit usize".to_owned()))?;
        self.entries
            .read()
            .get(idx)
            .copied()
            .ok_or_else(|| FatError::Corruption {
                cluster: cluster.0,
                detail: "entry outside table".to_owned(),
            })
    }

    fn kind(&self) -> FatKind {
        self.kind
    }

    fn max_cluster(&self) -> u64 {
        u64::try_from(self.entries.read().len()).unwrap_or(u64::MAX)
    }
}
