use fatc_cache::RunCache;
use fatc_types::{ClusterNumber, InodeNumber};
use parking_lot::{RwLock, RwLockReadGuard};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Identity and initial state of a file being opened on a volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileAttrs {
    pub ino: InodeNumber,
    /// Position of the file's directory entry, used in error reports.
    pub i_pos: u64,
    /// First cluster of the chain; `None` for a file with no clusters.
    pub start: Option<ClusterNumber>,
    /// File size in bytes.
    pub size: u64,
}

/// Chain head guarded by the file's chain lock.
#[derive(Debug)]
pub(crate) struct ChainHead {
    pub(crate) start: Option<ClusterNumber>,
}

/// An open file: its chain head, sizes, and private run cache.
///
/// Chain walks hold the chain lock shared for their whole duration.
/// [`FatFile::rewrite_chain`] holds it exclusively while the FAT is changed
/// and the cache invalidated, so a walk never mixes entries from before and
/// after a rewrite.
#[derive(Debug)]
pub struct FatFile {
    ino: InodeNumber,
    i_pos: u64,
    chain: RwLock<ChainHead>,
    size: AtomicU64,
    mmu_private: AtomicU64,
    cache: RunCache,
}

impl FatFile {
    pub(crate) fn new(attrs: FileAttrs, cache: RunCache) -> Self {
        Self {
            ino: attrs.ino,
            i_pos: attrs.i_pos,
            chain: RwLock::new(ChainHead { start: attrs.start }),
            size: AtomicU64::new(attrs.size),
            mmu_private: AtomicU64::new(attrs.size),
            cache,
        }
    }

    #[must_use]
    pub fn ino(&self) -> InodeNumber {
        self.ino
    }

    #[must_use]
    pub fn i_pos(&self) -> u64 {
        self.i_pos
    }

    #[must_use]
    pub fn is_root(&self) -> bool {
        self.ino == InodeNumber::ROOT
    }

    #[must_use]
    pub fn start(&self) -> Option<ClusterNumber> {
        self.chain.read().start
    }

    #[must_use]
    pub fn size(&self) -> u64 {
        self.size.load(Ordering::Acquire)
    }

    pub fn set_size(&self, size: u64) {
        self.size.store(size, Ordering::Release);
    }

    /// Bytes backed by allocated clusters, which may run ahead of `size`
    /// while a write is extending the file.
    #[must_use]
    pub fn mmu_private(&self) -> u64 {
        self.mmu_private.load(Ordering::Acquire)
    }

    pub fn set_mmu_private(&self, bytes: u64) {
        self.mmu_private.store(bytes, Ordering::Release);
    }

    #[must_use]
    pub fn cache(&self) -> &RunCache {
        &self.cache
    }

    /// Replace the file's cluster chain.
    ///
    /// `mutate` performs the FAT update while no walk is in progress. The new
    /// chain head and size are installed and the run cache is invalidated
    /// before any walker can resume.
    pub fn rewrite_chain<R>(
        &self,
        start: Option<ClusterNumber>,
        size: u64,
        mutate: impl FnOnce() -> R,
    ) -> R {
        let mut head = self.chain.write();
        let out = mutate();
        head.start = start;
        self.size.store(size, Ordering::Release);
        self.mmu_private.store(size, Ordering::Release);
        self.cache.invalidate();
        debug!(
            ino = self.ino.0,
            start = start.map_or(0, |c| c.0),
            size,
            "chain_rewritten"
        );
        out
    }

    pub(crate) fn read_chain(&self) -> RwLockReadGuard<'_, ChainHead> {
        self.chain.read()
    }
}
