#![forbid(unsafe_code)]
//! Cluster chain resolution: logical cluster to disk cluster, logical
//! sector to physical sector.
//!
//! [`FatVolume::get_cluster`] walks a file's FAT chain starting from the
//! closest run its [`RunCache`](fatc_cache::RunCache) remembers, feeding the
//! runs it discovers back into the cache. [`FatVolume::bmap`] builds on it to
//! map a file-relative sector to a volume sector plus the number of sectors
//! that follow contiguously.
//!
//! Structural damage (a free or bad entry inside a chain, a chain longer than
//! the volume could hold) is reported through the volume's
//! [`ErrorReporter`] and returned as a structural [`FatError`]. I/O errors
//! from the FAT read pass through untouched.
//!
//! [`FatError`]: fatc_error::FatError

mod bmap;
mod chain;
mod file;
mod geometry;
mod report;
mod volume;

pub use bmap::BlockMapping;
pub use chain::ChainPosition;
pub use file::{FatFile, FileAttrs};
pub use geometry::Geometry;
pub use report::{ErrorReporter, ReporterConfig, TracingReporter};
pub use volume::FatVolume;

pub use fatc_cache::{CacheConfig, CacheLookup, CacheStats, Run, RunCache, RunPool, RunToken};
pub use fatc_error::{FatError, Result};
pub use fatc_table::{
    ByteDevice, DeviceFatTable, FatTable, FileByteDevice, MemFatTable, check_cluster,
};
pub use fatc_types::{
    BlockNumber, ClusterNumber, Epoch, FAT_ENT_FREE, FAT_START_ENT, FatEntry, FatKind,
    FileCluster, InodeNumber,
};
