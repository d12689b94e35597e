use crate::file::FatFile;
use crate::volume::FatVolume;
use fatc_cache::{Run, RunToken};
use fatc_error::{FatError, Result};
use fatc_table::{FatTable, check_cluster};
use fatc_types::{ClusterNumber, FatEntry, FileCluster};
use tracing::trace;

/// Where a walk toward a logical cluster stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainPosition {
    /// The requested logical cluster and the disk cluster backing it.
    Reached {
        file_cluster: FileCluster,
        disk_cluster: ClusterNumber,
    },
    /// The chain ended first; this is its last cluster.
    EndOfChain {
        file_cluster: FileCluster,
        disk_cluster: ClusterNumber,
    },
}

impl ChainPosition {
    #[must_use]
    pub fn file_cluster(&self) -> FileCluster {
        match *self {
            Self::Reached { file_cluster, .. } | Self::EndOfChain { file_cluster, .. } => {
                file_cluster
            }
        }
    }

    #[must_use]
    pub fn disk_cluster(&self) -> ClusterNumber {
        match *self {
            Self::Reached { disk_cluster, .. } | Self::EndOfChain { disk_cluster, .. } => {
                disk_cluster
            }
        }
    }

    #[must_use]
    pub fn is_reached(&self) -> bool {
        matches!(self, Self::Reached { .. })
    }
}

impl<T: FatTable> FatVolume<T> {
    /// Resolve logical cluster `cluster` of `file`.
    ///
    /// Starts from the closest run cached at or below `cluster` (or the chain
    /// head) and follows FAT entries, recording every contiguous run it
    /// crosses. Returns [`ChainPosition::EndOfChain`] if the chain is shorter
    /// than `cluster + 1` clusters.
    ///
    /// # Errors
    ///
    /// * [`FatError::NotAllocated`] if the file has no clusters.
    /// * [`FatError::ChainLoop`] if the walk exceeds the longest chain the
    ///   volume can hold.
    /// * [`FatError::Corruption`] for a free or bad entry inside the chain,
    ///   or a link to a cluster outside the volume.
    /// * [`FatError::Io`] if a FAT read fails.
    pub fn get_cluster(&self, file: &FatFile, cluster: FileCluster) -> Result<ChainPosition> {
        let head = file.read_chain();
        let Some(start) = head.start else {
            return Err(FatError::NotAllocated { ino: file.ino().0 });
        };
        self.check_link(file, start)?;
        if cluster == FileCluster::ZERO {
            return Ok(ChainPosition::Reached {
                file_cluster: FileCluster::ZERO,
                disk_cluster: start,
            });
        }

        let cache = file.cache();
        let lookup = cache.lookup(cluster);
        let resume = lookup.position();
        let mut token = lookup.into_token();
        let (mut fclus, mut dclus) = match resume {
            Some(position) => position,
            None => {
                token.restart(FileCluster::ZERO, start);
                (FileCluster::ZERO, start)
            }
        };
        if fclus == cluster {
            return Ok(ChainPosition::Reached {
                file_cluster: fclus,
                disk_cluster: dclus,
            });
        }

        let limit = self.geometry().chain_limit();
        trace!(
            ino = file.ino().0,
            target = cluster.0,
            from = fclus.0,
            "chain_walk_start"
        );
        while fclus < cluster {
            if fclus.0 > limit {
                self.reporter().fs_error_ratelimit(
                    file.i_pos(),
                    &format!("detected the cluster chain loop (i_pos {})", file.i_pos()),
                );
                return Err(FatError::ChainLoop {
                    i_pos: file.i_pos(),
                    limit,
                });
            }

            let entry = self.table().read_entry(dclus).inspect_err(|err| {
                if err.is_structural() {
                    self.reporter().fs_error_ratelimit(file.i_pos(), &err.to_string());
                }
            })?;
            match entry {
                FatEntry::Next(next) => {
                    self.check_link(file, next)?;
                    fclus = fclus.next();
                    dclus = next;
                    if !token.try_extend(next) {
                        cache.merge_or_insert(&token);
                        token.restart(fclus, dclus);
                    }
                }
                FatEntry::EndOfChain => {
                    cache.merge_or_insert(&token);
                    trace!(
                        ino = file.ino().0,
                        target = cluster.0,
                        last = fclus.0,
                        "chain_walk_eof"
                    );
                    return Ok(ChainPosition::EndOfChain {
                        file_cluster: fclus,
                        disk_cluster: dclus,
                    });
                }
                FatEntry::Free | FatEntry::Bad => {
                    let what = if entry == FatEntry::Free { "free" } else { "bad" };
                    self.reporter().fs_error_ratelimit(
                        file.i_pos(),
                        &format!(
                            "invalid cluster chain (i_pos {}, {what} entry at cluster {})",
                            file.i_pos(),
                            dclus
                        ),
                    );
                    return Err(FatError::Corruption {
                        cluster: dclus.0,
                        detail: format!("{what} entry inside cluster chain"),
                    });
                }
            }
        }

        cache.merge_or_insert(&token);
        trace!(
            ino = file.ino().0,
            target = cluster.0,
            disk_cluster = dclus.0,
            "chain_walk_done"
        );
        Ok(ChainPosition::Reached {
            file_cluster: fclus,
            disk_cluster: dclus,
        })
    }

    /// A chain may only name clusters inside the data area.
    fn check_link(&self, file: &FatFile, cluster: ClusterNumber) -> Result<()> {
        check_cluster(cluster, self.geometry().max_cluster).inspect_err(|_| {
            self.reporter().fs_error_ratelimit(
                file.i_pos(),
                &format!(
                    "invalid cluster chain (i_pos {}, link to cluster {cluster})",
                    file.i_pos()
                ),
            );
        })
    }

    /// Seed `file`'s cache with a run the caller knows to be authoritative,
    /// such as clusters it has just allocated and linked.
    ///
    /// # Errors
    ///
    /// [`FatError::Corruption`] if the run reaches outside the data area.
    pub fn record_run(&self, file: &FatFile, run: Run) -> Result<()> {
        let last = run
            .disk_cluster
            .checked_add(run.run_length)
            .ok_or_else(|| FatError::Corruption {
                cluster: run.disk_cluster.0,
                detail: format!("run of {} clusters overflows", run.run_length),
            })?;
        check_cluster(run.disk_cluster, self.geometry().max_cluster)?;
        check_cluster(last, self.geometry().max_cluster)?;
        let token = RunToken::new(file.cache().epoch(), run);
        file.cache().merge_or_insert(&token);
        Ok(())
    }
}
