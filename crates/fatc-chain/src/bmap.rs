use crate::chain::ChainPosition;
use crate::file::FatFile;
use crate::volume::FatVolume;
use fatc_error::{FatError, Result};
use fatc_table::FatTable;
use fatc_types::{BlockNumber, ClusterNumber, FileCluster};
use serde::{Deserialize, Serialize};
use tracing::trace;

/// Physical location of a file sector and how many sectors follow it
/// contiguously on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockMapping {
    pub phys: BlockNumber,
    /// At least 1. Never crosses the end of the containing cluster or the
    /// file's last sector.
    pub mapped_blocks: u64,
}

impl<T: FatTable> FatVolume<T> {
    /// Disk cluster holding logical cluster `cluster` of `file`.
    ///
    /// Returns `Ok(None)` for a file with no clusters.
    ///
    /// # Errors
    ///
    /// [`FatError::BeyondEof`] if the chain ends before `cluster`, plus
    /// anything [`FatVolume::get_cluster`] can return.
    pub fn bmap_cluster(&self, file: &FatFile, cluster: FileCluster) -> Result<Option<ClusterNumber>> {
        match self.get_cluster(file, cluster) {
            Ok(ChainPosition::Reached { disk_cluster, .. }) => Ok(Some(disk_cluster)),
            Ok(ChainPosition::EndOfChain { .. }) => {
                self.reporter().fs_error(
                    file.i_pos(),
                    &format!("request beyond EOF (i_pos {})", file.i_pos()),
                );
                Err(FatError::BeyondEof {
                    i_pos: file.i_pos(),
                    cluster: cluster.0,
                })
            }
            Err(FatError::NotAllocated { .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Map file-relative sector `sector` to a volume sector.
    ///
    /// `Ok(None)` means there is nothing to map: the sector lies past the end
    /// of the file (or past the preallocated tail when `create` is set), or
    /// the file has no clusters. Sectors of the fixed root directory on
    /// FAT12/16 map straight into the root region, one at a time.
    pub fn bmap(&self, file: &FatFile, sector: u64, create: bool) -> Result<Option<BlockMapping>> {
        let geometry = self.geometry();

        if geometry.kind.has_fixed_root() && file.is_root() {
            if sector < geometry.root_dir_blocks() {
                return Ok(Some(BlockMapping {
                    phys: BlockNumber(geometry.dir_start + sector),
                    mapped_blocks: 1,
                }));
            }
            return Ok(None);
        }

        let mut last_block = geometry.blocks_for_bytes(file.size());
        if sector >= last_block {
            if !create {
                return Ok(None);
            }
            // the writer may have allocated ahead of i_size
            last_block = geometry.blocks_for_bytes(file.mmu_private());
            if sector >= last_block {
                return Ok(None);
            }
        }

        let sec_per_clus = u64::from(geometry.sec_per_clus);
        let cluster = FileCluster(sector >> geometry.sec_per_clus.trailing_zeros());
        let offset = sector & (sec_per_clus - 1);
        let Some(disk) = self.bmap_cluster(file, cluster)? else {
            return Ok(None);
        };

        let phys = geometry
            .cluster_to_block(disk)
            .inspect_err(|err| self.reporter().fs_error_ratelimit(file.i_pos(), &err.to_string()))?;
        let phys = BlockNumber(phys.0 + offset);
        let mapped_blocks = (sec_per_clus - offset).min(last_block - sector);
        trace!(
            ino = file.ino().0,
            sector,
            phys = phys.0,
            mapped_blocks,
            "bmap"
        );
        Ok(Some(BlockMapping {
            phys,
            mapped_blocks,
        }))
    }
}
