use crate::RunPool;
use fatc_error::{FatError, Result};
use serde::{Deserialize, Serialize};

/// Runs kept per open file unless configured otherwise.
pub const DEFAULT_MAX_RUNS: usize = 8;

/// Run-cache tuning shared by every file on a volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Upper bound on live runs per file. Must be at least 1.
    pub max_runs_per_file: usize,
    /// Upper bound on run entries outstanding across the whole volume.
    /// `None` means unbounded.
    pub pool_limit: Option<usize>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_runs_per_file: DEFAULT_MAX_RUNS,
            pool_limit: None,
        }
    }
}

impl CacheConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_runs_per_file == 0 {
            return Err(FatError::InvalidGeometry(
                "cache max_runs_per_file must be > 0".to_owned(),
            ));
        }
        if self.pool_limit == Some(0) {
            return Err(FatError::InvalidGeometry(
                "cache pool_limit must be > 0 when set".to_owned(),
            ));
        }
        Ok(())
    }

    /// Pool sized according to `pool_limit`.
    #[must_use]
    pub fn build_pool(&self) -> RunPool {
        self.pool_limit.map_or_else(RunPool::new, RunPool::with_limit)
    }
}
