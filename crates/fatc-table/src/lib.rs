#![forbid(unsafe_code)]
//! FAT entry reads.
//!
//! Provides the `FatTable` trait consumed by the chain walker, the
//! `ByteDevice` trait for fixed-offset reads, and two tables:
//!
//! - [`DeviceFatTable`] decodes bit-packed FAT12/16/32/64 entries straight
//!   from a byte device;
//! - [`MemFatTable`] keeps decoded entries in memory, counts reads, and can
//!   inject I/O faults. Tests and benchmarks build chains with it.

mod mem;

pub use mem::MemFatTable;

use fatc_error::{FatError, Result};
use fatc_types::{
    ClusterNumber, FAT_START_ENT, FatEntry, FatKind, ParseError, read_le_u16, read_le_u32,
    read_le_u64,
};
use std::fs::File;
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::sync::Arc;
use tracing::trace;

fn parse_error(err: ParseError) -> FatError {
    FatError::Format(err.to_string())
}

/// Single-entry FAT lookup.
///
/// Implementations perform whatever caching or I/O the table layer needs.
/// Errors from the backing store are returned unchanged; the walker never
/// retries.
pub trait FatTable: Send + Sync {
    /// Read and classify the entry for `cluster`.
    fn read_entry(&self, cluster: ClusterNumber) -> Result<FatEntry>;

    /// FAT flavor of this table.
    fn kind(&self) -> FatKind;

    /// One past the highest valid cluster number.
    fn max_cluster(&self) -> u64;
}

/// Reject FAT accesses outside `[FAT_START_ENT, max_cluster)`.
pub fn check_cluster(cluster: ClusterNumber, max_cluster: u64) -> Result<()> {
    if cluster.0 < FAT_START_ENT || cluster.0 >= max_cluster {
        return Err(FatError::Corruption {
            cluster: cluster.0,
            detail: format!("invalid access to FAT (entry {:#x})", cluster.0),
        });
    }
    Ok(())
}

/// Byte-addressed device for fixed-offset reads (pread semantics).
pub trait ByteDevice: Send + Sync {
    /// Total length in bytes.
    fn len_bytes(&self) -> u64;

    /// Read exactly `buf.len()` bytes from `offset` into `buf`.
    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()>;
}

/// File-backed byte device using Linux `pread` style I/O.
///
/// This uses `std::os::unix::fs::FileExt`, which is thread-safe and does not
/// require a shared seek position.
#[derive(Debug, Clone)]
pub struct FileByteDevice {
    file: Arc<File>,
    len: u64,
}

impl FileByteDevice {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let len = file.metadata()?.len();
        Ok(Self {
            file: Arc::new(file),
            len,
        })
    }

    #[must_use]
    pub fn file(&self) -> &Arc<File> {
        &self.file
    }
}

impl ByteDevice for FileByteDevice {
    fn len_bytes(&self) -> u64 {
        self.len
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let end = offset
            .checked_add(
                u64::try_from(buf.len())
                    .map_err(|_| FatError::Format("read length overflows u64".to_owned()))?,
            )
            .ok_or_else(|| FatError::Format("read range overflows u64".to_owned()))?;
        if end > self.len {
            return Err(FatError::Format(format!(
                "read out of bounds: offset={offset} len={} file_len={}",
                buf.len(),
                self.len
            )));
        }

        self.file.read_exact_at(buf, offset)?;
        Ok(())
    }
}

impl<D: ByteDevice + ?Sized> ByteDevice for Arc<D> {
    fn len_bytes(&self) -> u64 {
        (**self).len_bytes()
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        (**self).read_exact_at(offset, buf)
    }
}

/// Byte offset of `cluster`'s entry relative to the start of the FAT, and
/// the number of bytes that must be read to decode it.
#[must_use]
pub fn entry_location(kind: FatKind, cluster: u64) -> (u64, usize) {
    match kind {
        // 1.5 bytes per entry; an entry straddles a byte boundary.
        FatKind::Fat12 => (cluster + cluster / 2, 2),
        FatKind::Fat16 => (cluster * 2, 2),
        FatKind::Fat32 => (cluster * 4, 4),
        FatKind::Fat64 => (cluster * 8, 8),
    }
}

/// FAT decoded directly from the bytes of one on-disk table copy.
#[derive(Debug)]
pub struct DeviceFatTable<D: ByteDevice> {
    dev: D,
    kind: FatKind,
    fat_offset: u64,
    max_cluster: u64,
}

impl<D: ByteDevice> DeviceFatTable<D> {
    /// Wrap `dev`, whose FAT starts at byte `fat_offset` and covers clusters
    /// below `max_cluster`.
    pub fn new(dev: D, kind: FatKind, fat_offset: u64, max_cluster: u64) -> Result<Self> {
        if max_cluster <= FAT_START_ENT {
            return Err(FatError::Format(format!(
                "max_cluster={max_cluster} leaves no data clusters"
            )));
        }
        let (last_off, width) = entry_location(kind, max_cluster - 1);
        let needed = fat_offset
            .checked_add(last_off)
            .and_then(|end| end.checked_add(width as u64))
            .ok_or_else(|| FatError::Format("FAT extent overflows u64".to_owned()))?;
        if needed > dev.len_bytes() {
            return Err(FatError::Format(format!(
                "device too small for {kind} table: need {needed} bytes, have {}",
                dev.len_bytes()
            )));
        }
        Ok(Self {
            dev,
            kind,
            fat_offset,
            max_cluster,
        })
    }

    #[must_use]
    pub fn device(&self) -> &D {
        &self.dev
    }

    fn read_raw(&self, cluster: u64) -> Result<u64> {
        let (rel, width) = entry_location(self.kind, cluster);
        let mut buf = [0_u8; 8];
        self.dev.read_exact_at(self.fat_offset + rel, &mut buf[..width])?;
        let raw = match self.kind {
            FatKind::Fat12 => {
                let pair = read_le_u16(&buf, 0).map_err(parse_error)?;
                if cluster & 1 == 1 {
                    u64::from(pair >> 4)
                } else {
                    u64::from(pair & 0x0FFF)
                }
            }
            FatKind::Fat16 => u64::from(read_le_u16(&buf, 0).map_err(parse_error)?),
            FatKind::Fat32 => u64::from(read_le_u32(&buf, 0).map_err(parse_error)?),
            FatKind::Fat64 => read_le_u64(&buf, 0).map_err(parse_error)?,
        };
        Ok(raw)
    }
}

impl<D: ByteDevice> FatTable for DeviceFatTable<D> {
    fn read_entry(&self, cluster: ClusterNumber) -> Result<FatEntry> {
        check_cluster(cluster, self.max_cluster)?;
        let raw = self.read_raw(cluster.0)?;
        let entry = self.kind.decode(raw);
        trace!(cluster = cluster.0, raw, ?entry, "fat_entry_read");
        Ok(entry)
    }

    fn kind(&self) -> FatKind {
        self.kind
    }

    fn max_cluster(&self) -> u64 {
        self.max_cluster
    }
}
