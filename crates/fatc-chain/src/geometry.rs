use fatc_error::{FatError, Result};
use fatc_table::check_cluster;
use fatc_types::{BlockNumber, BlockSize, ClusterNumber, FAT_START_ENT, FatKind, MSDOS_DIR_ENTRY_SIZE};
use serde::{Deserialize, Serialize};

/// Volume layout the mapper needs, computed once at mount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Geometry {
    pub kind: FatKind,
    /// Sector size in bytes.
    pub block_size: u32,
    /// Sectors per cluster (power of two).
    pub sec_per_clus: u32,
    /// First sector of cluster [`FAT_START_ENT`].
    pub data_start: u64,
    /// First sector of the fixed root directory (FAT12/16 only).
    pub dir_start: u64,
    /// Entries in the fixed root directory (FAT12/16 only).
    pub dir_entries: u32,
    /// One past the highest valid cluster number.
    pub max_cluster: u64,
    /// Largest file size the volume supports, in bytes.
    pub max_bytes: u64,
}

impl Geometry {
    pub fn validate(&self) -> Result<()> {
        BlockSize::new(self.block_size)
            .map_err(|err| FatError::InvalidGeometry(err.to_string()))?;
        if self.sec_per_clus == 0 || !self.sec_per_clus.is_power_of_two() {
            return Err(FatError::InvalidGeometry(format!(
                "sec_per_clus={} (must be a power of two)",
                self.sec_per_clus
            )));
        }
        if self.cluster_bits() >= 64 {
            return Err(FatError::InvalidGeometry(format!(
                "cluster size 2^{} overflows u64",
                self.cluster_bits()
            )));
        }
        if self.max_cluster <= FAT_START_ENT {
            return Err(FatError::InvalidGeometry(format!(
                "max_cluster={} leaves no data clusters",
                self.max_cluster
            )));
        }
        let data_blocks = (self.max_cluster - FAT_START_ENT)
            .checked_mul(u64::from(self.sec_per_clus))
            .and_then(|n| n.checked_add(self.data_start));
        if data_blocks.is_none() {
            return Err(FatError::InvalidGeometry(
                "data area overflows the sector address space".to_owned(),
            ));
        }
        if self.max_bytes < self.cluster_size() {
            return Err(FatError::InvalidGeometry(format!(
                "max_bytes={} is smaller than one cluster",
                self.max_bytes
            )));
        }
        Ok(())
    }

    #[must_use]
    pub fn block_bits(&self) -> u32 {
        self.block_size.trailing_zeros()
    }

    #[must_use]
    pub fn cluster_bits(&self) -> u32 {
        self.block_bits() + self.sec_per_clus.trailing_zeros()
    }

    #[must_use]
    pub fn cluster_size(&self) -> u64 {
        1_u64 << self.cluster_bits()
    }

    /// Directory entries per sector in the fixed root region.
    #[must_use]
    pub fn dirs_per_block(&self) -> u64 {
        u64::from(self.block_size / MSDOS_DIR_ENTRY_SIZE)
    }

    /// Sectors occupied by the fixed root directory.
    #[must_use]
    pub fn root_dir_blocks(&self) -> u64 {
        u64::from(self.dir_entries) / self.dirs_per_block().max(1)
    }

    /// Longest chain a walk may follow before it is treated as a loop.
    ///
    /// A legitimate chain can neither exceed the volume's maximum file size
    /// nor visit more clusters than the volume has.
    #[must_use]
    pub fn chain_limit(&self) -> u64 {
        let by_size = self.max_bytes >> self.cluster_bits();
        let by_clusters = self.max_cluster.saturating_sub(FAT_START_ENT);
        by_size.min(by_clusters)
    }

    /// First sector of `cluster`.
    ///
    /// # Errors
    ///
    /// [`FatError::Corruption`] if `cluster` is not a data cluster of this
    /// volume.
    pub fn cluster_to_block(&self, cluster: ClusterNumber) -> Result<BlockNumber> {
        check_cluster(cluster, self.max_cluster)?;
        (cluster.0 - FAT_START_ENT)
            .checked_mul(u64::from(self.sec_per_clus))
            .and_then(|offset| offset.checked_add(self.data_start))
            .map(BlockNumber)
            .ok_or_else(|| FatError::Corruption {
                cluster: cluster.0,
                detail: "cluster lies beyond the sector address space".to_owned(),
            })
    }

    /// Sectors needed to hold `bytes`, rounded up.
    #[must_use]
    pub fn blocks_for_bytes(&self, bytes: u64) -> u64 {
        bytes.div_ceil(u64::from(self.block_size))
    }
}
