use crate::file::{FatFile, FileAttrs};
use crate::geometry::Geometry;
use crate::report::{ErrorReporter, TracingReporter};
use fatc_cache::{CacheConfig, RunCache, RunPool};
use fatc_error::{FatError, Result};
use fatc_table::FatTable;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// A mounted FAT volume: geometry, allocation table, and the run-entry pool
/// shared by every open file's cache.
pub struct FatVolume<T: FatTable> {
    geometry: Geometry,
    table: T,
    pool: Arc<RunPool>,
    cache_config: CacheConfig,
    reporter: Arc<dyn ErrorReporter>,
}

impl<T: FatTable> fmt::Debug for FatVolume<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FatVolume")
            .field("geometry", &self.geometry)
            .field("cache_config", &self.cache_config)
            .field("pool_outstanding", &self.pool.outstanding())
            .finish_non_exhaustive()
    }
}

impl<T: FatTable> FatVolume<T> {
    /// Validate `geometry` and `cache_config` against each other and the
    /// table, and set up the shared pool.
    pub fn new(geometry: Geometry, table: T, cache_config: CacheConfig) -> Result<Self> {
        geometry.validate()?;
        cache_config.validate()?;
        if table.kind() != geometry.kind {
            return Err(FatError::InvalidGeometry(format!(
                "table is {} but geometry says {}",
                table.kind(),
                geometry.kind
            )));
        }
        if table.max_cluster() < geometry.max_cluster {
            return Err(FatError::InvalidGeometry(format!(
                "table covers {} clusters, geometry needs {}",
                table.max_cluster(),
                geometry.max_cluster
            )));
        }

        let pool = Arc::new(cache_config.build_pool());
        info!(
            kind = %geometry.kind,
            block_size = geometry.block_size,
            sec_per_clus = geometry.sec_per_clus,
            max_cluster = geometry.max_cluster,
            max_runs_per_file = cache_config.max_runs_per_file,
            "volume_ready"
        );
        Ok(Self {
            geometry,
            table,
            pool,
            cache_config,
            reporter: Arc::new(TracingReporter::default()),
        })
    }

    #[must_use]
    pub fn with_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    #[must_use]
    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    #[must_use]
    pub fn table(&self) -> &T {
        &self.table
    }

    #[must_use]
    pub fn pool(&self) -> &Arc<RunPool> {
        &self.pool
    }

    #[must_use]
    pub fn cache_config(&self) -> &CacheConfig {
        &self.cache_config
    }

    pub(crate) fn reporter(&self) -> &dyn ErrorReporter {
        self.reporter.as_ref()
    }

    /// Open a file with an empty run cache drawing from the volume's pool.
    #[must_use]
    pub fn open_file(&self, attrs: FileAttrs) -> FatFile {
        let cache = RunCache::from_config(Arc::clone(&self.pool), &self.cache_config);
        debug!(ino = attrs.ino.0, i_pos = attrs.i_pos, "file_opened");
        FatFile::new(attrs, cache)
    }

    /// Drop every cached run of `file`.
    ///
    /// Walks already in progress finish with the answer they computed, but
    /// their runs are discarded. Use [`FatFile::rewrite_chain`] when the FAT
    /// itself changes.
    pub fn invalidate(&self, file: &FatFile) {
        file.cache().invalidate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fatc_table::MemFatTable;
    use fatc_types::{ClusterNumber, FatKind, InodeNumber};

    fn geometry(kind: FatKind) -> Geometry {
        Geometry {
            kind,
            block_size: 512,
            sec_per_clus: 1,
            data_start: 40,
            dir_start: 8,
            dir_entries: 512,
            max_cluster: 128,
            max_bytes: 1 << 32,
        }
    }

    #[test]
    fn rejects_kind_mismatch() {
        let table = MemFatTable::new(FatKind::Fat16, 128);
        let err = FatVolume::new(geometry(FatKind::Fat32), table, CacheConfig::default())
            .expect_err("mismatch");
        assert!(matches!(err, FatError::InvalidGeometry(_)));
    }

    #[test]
    fn rejects_short_table() {
        let table = MemFatTable::new(FatKind::Fat32, 64);
        let err = FatVolume::new(geometry(FatKind::Fat32), table, CacheConfig::default())
            .expect_err("short table");
        assert!(matches!(err, FatError::InvalidGeometry(_)));
    }

    #[test]
    fn rejects_bad_cache_config() {
        let table = MemFatTable::new(FatKind::Fat32, 128);
        let config = CacheConfig {
            max_runs_per_file: 0,
            pool_limit: None,
        };
        assert!(FatVolume::new(geometry(FatKind::Fat32), table, config).is_err());
    }

    #[test]
    fn open_files_share_the_pool() {
        let table = MemFatTable::new(FatKind::Fat32, 128);
        let config = CacheConfig {
            max_runs_per_file: 3,
            pool_limit: Some(16),
        };
        let volume = FatVolume::new(geometry(FatKind::Fat32), table, config).expect("volume");
        let a = volume.open_file(FileAttrs {
            ino: InodeNumber(10),
            i_pos: 1,
            start: Some(ClusterNumber(5)),
            size: 512,
        });
        let b = volume.open_file(FileAttrs {
            ino: InodeNumber(11),
            i_pos: 2,
            start: None,
            size: 0,
        });
        assert_eq!(a.cache().capacity(), 3);
        assert!(Arc::ptr_eq(a.cache().pool(), volume.pool()));
        assert!(Arc::ptr_eq(b.cache().pool(), volume.pool()));
        assert_eq!(volume.pool().limit(), Some(16));
        assert!(format!("{volume:?}").contains("FatVolume"));
    }
}
