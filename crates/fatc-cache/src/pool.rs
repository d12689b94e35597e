//! Recycler for run-cache entries.

use crate::Run;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;

/// The pool refused to hand out another entry.
///
/// Never fatal: the cache skips the insert and the caller keeps the answer
/// it already computed.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("run entry pool exhausted ({limit} entries outstanding)")]
pub struct PoolExhausted {
    pub limit: usize,
}

/// A run slot checked out of a [`RunPool`].
///
/// An entry is either free (held by the caller between `allocate` and
/// insertion, or back in the pool) or attached to exactly one cache list.
#[derive(Debug)]
pub struct RunEntry {
    slot: Box<Run>,
    attached: bool,
}

impl RunEntry {
    #[must_use]
    pub fn run(&self) -> Run {
        *self.slot
    }

    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.attached
    }

    /// Repoint the slot at a different run start.
    pub(crate) fn assign(&mut self, run: Run) {
        *self.slot = run;
    }

    /// Grow the run; a shorter `run_length` leaves it unchanged.
    pub(crate) fn extend_to(&mut self, run_length: u64) {
        if run_length > self.slot.run_length {
            self.slot.run_length = run_length;
        }
    }

    pub(crate) fn attach(&mut self) {
        self.attached = true;
    }

    pub(crate) fn detach(&mut self) {
        self.attached = false;
    }
}

/// Shared allocator of [`RunEntry`] slots.
///
/// Released slots go on a free list and are handed out again before any new
/// allocation. With a `limit`, at most that many entries are outstanding at
/// once across every cache drawing from the pool.
#[derive(Debug, Default)]
pub struct RunPool {
    free: Mutex<Vec<Box<Run>>>,
    outstanding: AtomicUsize,
    limit: Option<usize>,
}

impl RunPool {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    pub fn allocate(&self) -> Result<RunEntry, PoolExhausted> {
        let limit = self.limit;
        self.outstanding
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| match limit {
                Some(max) if n >= max => None,
                _ => Some(n + 1),
            })
            .map_err(|_| PoolExhausted {
                limit: limit.unwrap_or(usize::MAX),
            })?;

        let slot = self
            .free
            .lock()
            .pop()
            .unwrap_or_else(|| Box::new(Run::EMPTY));
        Ok(RunEntry {
            slot,
            attached: false,
        })
    }

    /// Return an entry to the pool.
    ///
    /// # Panics
    ///
    /// Panics if the entry is still linked into a cache list. That is a
    /// bookkeeping bug in the caller, not a recoverable condition.
    pub fn release(&self, entry: RunEntry) {
        assert!(
            !entry.attached,
            "run entry released while still linked into a cache: {:?}",
            *entry.slot
        );
        self.outstanding.fetch_sub(1, Ordering::AcqRel);
        self.free.lock().push(entry.slot);
    }

    /// Entries currently checked out.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    /// Recycled slots waiting on the free list.
    #[must_use]
    pub fn free_len(&self) -> usize {
        self.free.lock().len()
    }
}
