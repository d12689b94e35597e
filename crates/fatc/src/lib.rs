#![forbid(unsafe_code)]
//! FAT cluster-chain resolution public API facade.
//!
//! Re-exports the chain walker, block mapper, and run cache from
//! `fatc-chain` through one stable entry point. Downstream consumers depend
//! on this crate rather than the individual layers.
//!
//! ```
//! use fatc::{CacheConfig, ClusterNumber, FatKind, FatVolume, FileAttrs, FileCluster};
//! use fatc::{Geometry, InodeNumber, MemFatTable};
//!
//! let geometry = Geometry {
//!     kind: FatKind::Fat32,
//!     block_size: 512,
//!     sec_per_clus: 1,
//!     data_start: 32,
//!     dir_start: 0,
//!     dir_entries: 0,
//!     max_cluster: 16,
//!     max_bytes: 1 << 32,
//! };
//! let table = MemFatTable::new(FatKind::Fat32, 16);
//! table.link(&[5, 6, 7, 8]);
//! let volume = FatVolume::new(geometry, table, CacheConfig::default())?;
//! let file = volume.open_file(FileAttrs {
//!     ino: InodeNumber(3),
//!     i_pos: 0,
//!     start: Some(ClusterNumber(5)),
//!     size: 2048,
//! });
//! let pos = volume.get_cluster(&file, FileCluster(3))?;
//! assert_eq!(pos.disk_cluster(), ClusterNumber(8));
//! # Ok::<(), fatc::FatError>(())
//! ```

pub use fatc_chain::*;
