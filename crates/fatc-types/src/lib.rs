#![forbid(unsafe_code)]
//! Unit-carrying newtypes and on-disk constants shared by every fatc crate.
//!
//! Two cluster address spaces meet in the chain walker and must never be
//! mixed up: [`FileCluster`] counts clusters from the start of one file,
//! [`ClusterNumber`] addresses the volume's FAT. Both are `u64` so FAT64
//! volumes fit without narrowing.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// FAT entry value marking an unallocated cluster.
pub const FAT_ENT_FREE: u64 = 0;

/// First usable data cluster. Entries 0 and 1 are reserved.
pub const FAT_START_ENT: u64 = 2;

/// Size of a classic (FAT12/16/32) directory entry in bytes.
pub const MSDOS_DIR_ENTRY_SIZE: u32 = 32;

/// Physical cluster number in the volume's FAT address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClusterNumber(pub u64);

/// Logical cluster index within one file's chain, counted from 0.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct FileCluster(pub u64);

/// Physical block (sector) number on the volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockNumber(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InodeNumber(pub u64);

impl InodeNumber {
    /// The root directory inode.
    pub const ROOT: Self = Self(1);
}

impl ClusterNumber {
    /// Add `n` clusters, returning `None` on overflow.
    #[must_use]
    pub fn checked_add(self, n: u64) -> Option<Self> {
        self.0.checked_add(n).map(Self)
    }

    /// Whether `next` directly follows `self` on disk.
    #[must_use]
    pub fn is_followed_by(self, next: Self) -> bool {
        self.0.checked_add(1) == Some(next.0)
    }
}

impl FileCluster {
    pub const ZERO: Self = Self(0);

    #[must_use]
    pub fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

/// Validated block size (must be a power of two in 512..=65536).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockSize(u32);

impl BlockSize {
    /// Create a `BlockSize` if `value` is a power of two in [512, 65536].
    pub fn new(value: u32) -> Result<Self, ParseError> {
        if !value.is_power_of_two() || !(512..=65536).contains(&value) {
            return Err(ParseError::InvalidField {
                field: "block_size",
                reason: "must be power of two in 512..=65536",
            });
        }
        Ok(Self(value))
    }

    #[must_use]
    pub fn get(self) -> u32 {
        self.0
    }
}

/// Invalidation generation of one file's run cache.
///
/// The counter wraps around but never lands on [`Epoch::ALWAYS_VALID`],
/// which is reserved for tokens that must be accepted regardless of how
/// many invalidations happened since they were produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Epoch(u32);

impl Epoch {
    pub const ALWAYS_VALID: Self = Self(0);
    pub const INITIAL: Self = Self(1);

    #[must_use]
    pub fn get(self) -> u32 {
        self.0
    }

    /// The generation following `self`, skipping the reserved value.
    #[must_use]
    pub fn next(self) -> Self {
        let next = self.0.wrapping_add(1);
        if next == Self::ALWAYS_VALID.0 {
            Self(next.wrapping_add(1))
        } else {
            Self(next)
        }
    }

    /// Whether a token stamped with `self` may be merged into a cache whose
    /// current generation is `current`.
    #[must_use]
    pub fn admits(self, current: Self) -> bool {
        self == Self::ALWAYS_VALID || self == current
    }
}

impl Default for Epoch {
    fn default() -> Self {
        Self::INITIAL
    }
}

/// FAT flavor, which fixes the entry width and the marker values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FatKind {
    Fat12,
    Fat16,
    Fat32,
    Fat64,
}

impl FatKind {
    /// Significant bits per entry. FAT32 entries occupy 32 bits on disk but
    /// only the low 28 carry the cluster number.
    #[must_use]
    pub fn entry_bits(self) -> u32 {
        match self {
            Self::Fat12 => 12,
            Self::Fat16 => 16,
            Self::Fat32 => 28,
            Self::Fat64 => 64,
        }
    }

    #[must_use]
    pub fn entry_mask(self) -> u64 {
        match self {
            Self::Fat64 => u64::MAX,
            other => (1_u64 << other.entry_bits()) - 1,
        }
    }

    /// End-of-chain marker: all ones within the entry width.
    #[must_use]
    pub fn eof_marker(self) -> u64 {
        self.entry_mask()
    }

    /// Bad-cluster marker: `0xFF7`, `0xFFF7`, `0x0FFF_FFF7`, or
    /// `0xFFFF_FFFF_FFFF_FFF7`.
    #[must_use]
    pub fn bad_marker(self) -> u64 {
        self.entry_mask() - 8
    }

    /// Whether the root directory lives in a fixed region ahead of the data
    /// area instead of in an ordinary cluster chain.
    #[must_use]
    pub fn has_fixed_root(self) -> bool {
        matches!(self, Self::Fat12 | Self::Fat16)
    }

    /// Classify a raw on-disk entry value.
    ///
    /// Values above the bad marker (the reserved end-of-chain range) all
    /// decode as [`FatEntry::EndOfChain`].
    #[must_use]
    pub fn decode(self, raw: u64) -> FatEntry {
        let value = raw & self.entry_mask();
        if value == FAT_ENT_FREE {
            FatEntry::Free
        } else if value == self.bad_marker() {
            FatEntry::Bad
        } else if value > self.bad_marker() {
            FatEntry::EndOfChain
        } else {
            FatEntry::Next(ClusterNumber(value))
        }
    }

    /// Raw value for `entry`, as written by formatting and test tooling.
    #[must_use]
    pub fn encode(self, entry: FatEntry) -> u64 {
        match entry {
            FatEntry::Free => FAT_ENT_FREE,
            FatEntry::Bad => self.bad_marker(),
            FatEntry::EndOfChain => self.eof_marker(),
            FatEntry::Next(next) => next.0 & self.entry_mask(),
        }
    }
}

/// Decoded FAT entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FatEntry {
    Free,
    Next(ClusterNumber),
    Bad,
    EndOfChain,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("insufficient data: need {needed} bytes at offset {offset}, got {actual}")]
    InsufficientData {
        needed: usize,
        offset: usize,
        actual: usize,
    },
    #[error("invalid field: {field} ({reason})")]
    InvalidField {
        field: &'static str,
        reason: &'static str,
    },
}

#[inline]
pub fn ensure_slice(data: &[u8], offset: usize, len: usize) -> Result<&[u8], ParseError> {
    let Some(end) = offset.checked_add(len) else {
        return Err(ParseError::InvalidField {
            field: "offset",
            reason: "overflow",
        });
    };

    if end > data.len() {
        return Err(ParseError::InsufficientData {
            needed: len,
            offset,
            actual: data.len().saturating_sub(offset),
        });
    }

    Ok(&data[offset..end])
}

#[inline]
pub fn read_le_u16(data: &[u8], offset: usize) -> Result<u16, ParseError> {
    let bytes = ensure_slice(data, offset, 2)?;
    Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
}

#[inline]
pub fn read_le_u32(data: &[u8], offset: usize) -> Result<u32, ParseError> {
    let bytes = ensure_slice(data, offset, 4)?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

#[inline]
pub fn read_le_u64(data: &[u8], offset: usize) -> Result<u64, ParseError> {
    let bytes = ensure_slice(data, offset, 8)?;
    Ok(u64::from_le_bytes([
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
    ]))
}

impl fmt::Display for ClusterNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for FileCluster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for BlockNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for InodeNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for Epoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for FatKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Fat12 => "FAT12",
            Self::Fat16 => "FAT16",
            Self::Fat32 => "FAT32",
            Self::Fat64 => "FAT64",
        };
        f.write_str(name)
    }
}
