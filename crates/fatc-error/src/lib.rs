#![forbid(unsafe_code)]
//! Error types for fatc.
//!
//! # Error Taxonomy
//!
//! | Class | Variants | errno | Caller policy |
//! |-------|----------|-------|---------------|
//! | I/O | `Io` | raw OS error or `EIO` | retry or fail the request |
//! | Structural | `Corruption`, `ChainLoop`, `BeyondEof` | `EIO` | escalate: mark the volume as needing a check |
//! | Layout | `Format`, `InvalidGeometry` | `EINVAL` | refuse to mount |
//! | Caller bug | `NotAllocated` | `EINVAL` | fix the caller |
//!
//! I/O errors from a FAT read are propagated verbatim. Structural errors are
//! kept distinct so that [`FatError::is_structural`] can drive the decision
//! to remount read-only rather than simply retrying.
//!
//! Two conditions are deliberately *not* errors:
//!
//! - run-cache pool exhaustion degrades to the uncached walk and never leaves
//!   `fatc-cache`;
//! - invariant violations inside the run cache (releasing an entry that is
//!   still linked, two runs claiming the same file cluster with different
//!   disk clusters) are assertions, since they mean the cache itself is
//!   broken.
//!
//! ## Design Constraints
//!
//! - `fatc-error` MUST NOT depend on `fatc-types` (no cyclic deps). Cluster
//!   and inode positions are carried as plain `u64`.
//! - All string payloads are owned.

use thiserror::Error;

/// Unified error type for all fatc operations.
#[derive(Debug, Error)]
pub enum FatError {
    /// Operating system I/O error while reading the FAT.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Chain corruption detected at a known disk cluster.
    ///
    /// Used for a free or bad entry linked into a live chain and for FAT
    /// accesses outside the valid cluster range.
    #[error("corrupt cluster chain at cluster {cluster}: {detail}")]
    Corruption { cluster: u64, detail: String },

    /// The walk exceeded the longest chain the volume can address.
    #[error("cluster chain loop detected (i_pos {i_pos}, limit {limit} clusters)")]
    ChainLoop { i_pos: u64, limit: u64 },

    /// The file's size says a cluster exists but its chain ends earlier.
    #[error("request beyond end of chain (i_pos {i_pos}, cluster {cluster})")]
    BeyondEof { i_pos: u64, cluster: u64 },

    /// FAT table or backing device layout is inconsistent.
    #[error("invalid FAT layout: {0}")]
    Format(String),

    /// Volume geometry or cache configuration is out of range.
    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),

    /// Chain resolution was requested for a file with no clusters.
    #[error("inode {ino} has no allocated clusters")]
    NotAllocated { ino: u64 },
}

impl FatError {
    /// Whether this error indicates on-disk chain damage.
    ///
    /// Callers typically respond by marking the volume as needing a check
    /// and refusing further writes.
    #[must_use]
    pub fn is_structural(&self) -> bool {
        match self {
            Self::Corruption { .. } | Self::ChainLoop { .. } | Self::BeyondEof { .. } => true,
            Self::Io(_)
            | Self::Format(_)
            | Self::InvalidGeometry(_)
            | Self::NotAllocated { .. } => false,
        }
    }

    /// Convert this error into a POSIX errno.
    ///
    /// The mapping is exhaustive; adding a variant is a compile error until
    /// its errno is assigned.
    #[must_use]
    pub fn to_errno(&self) -> libc::c_int {
        match self {
            Self::Io(err) => err.raw_os_error().unwrap_or(libc::EIO),
            Self::Corruption { .. } | Self::ChainLoop { .. } | Self::BeyondEof { .. } => {
                libc::EIO
            }
            Self::Format(_) | Self::InvalidGeometry(_) | Self::NotAllocated { .. } => {
                libc::EINVAL
            }
        }
    }
}

/// Result alias using `FatError`.
pub type Result<T> = std::result::Result<T, FatError>;
