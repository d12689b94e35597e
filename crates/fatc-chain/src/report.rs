//! Filesystem error reporting.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{error, warn};

/// Sink for on-disk inconsistencies found while walking chains.
///
/// `i_pos` identifies the directory entry of the file involved so the
/// message can be traced back to something fsck understands.
pub trait ErrorReporter: Send + Sync {
    /// Report unconditionally.
    fn fs_error(&self, i_pos: u64, message: &str);

    /// Report unless too many messages were emitted recently. Used on paths
    /// a damaged chain can hit once per lookup.
    fn fs_error_ratelimit(&self, i_pos: u64, message: &str);
}

/// Rate limiting for [`TracingReporter`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReporterConfig {
    /// Messages allowed per interval.
    pub burst: u32,
    pub interval_ms: u64,
}

impl Default for ReporterConfig {
    fn default() -> Self {
        Self {
            burst: 10,
            interval_ms: 5_000,
        }
    }
}

#[derive(Debug, Default)]
struct RateWindow {
    started: Option<Instant>,
    emitted: u32,
    suppressed: u64,
}

/// Reporter that logs through `tracing` and latches a "needs check" flag.
#[derive(Debug)]
pub struct TracingReporter {
    config: ReporterConfig,
    window: Mutex<RateWindow>,
    needs_check: AtomicBool,
    reported: AtomicU64,
    suppressed: AtomicU64,
}

impl Default for TracingReporter {
    fn default() -> Self {
        Self::new(ReporterConfig::default())
    }
}

impl TracingReporter {
    #[must_use]
    pub fn new(config: ReporterConfig) -> Self {
        Self {
            config,
            window: Mutex::new(RateWindow::default()),
            needs_check: AtomicBool::new(false),
            reported: AtomicU64::new(0),
            suppressed: AtomicU64::new(0),
        }
    }

    /// Set once any error has been reported; the volume should be checked
    /// before it is trusted again.
    #[must_use]
    pub fn needs_check(&self) -> bool {
        self.needs_check.load(Ordering::Acquire)
    }

    /// Messages actually logged.
    #[must_use]
    pub fn reported(&self) -> u64 {
        self.reported.load(Ordering::Relaxed)
    }

    /// Messages dropped by the rate limiter.
    #[must_use]
    pub fn suppressed(&self) -> u64 {
        self.suppressed.load(Ordering::Relaxed)
    }

    fn admit(&self) -> bool {
        let interval = Duration::from_millis(self.config.interval_ms);
        let now = Instant::now();
        let mut window = self.window.lock();
        let expired = window
            .started
            .is_none_or(|started| now.duration_since(started) >= interval);
        if expired {
            if window.suppressed > 0 {
                warn!(suppressed = window.suppressed, "fs_error_callbacks_suppressed");
            }
            *window = RateWindow {
                started: Some(now),
                emitted: 0,
                suppressed: 0,
            };
        }
        if window.emitted < self.config.burst {
            window.emitted += 1;
            true
        } else {
            window.suppressed += 1;
            false
        }
    }

    fn emit(&self, i_pos: u64, message: &str) {
        self.reported.fetch_add(1, Ordering::Relaxed);
        error!(i_pos, detail = message, "fs_error");
    }
}

impl ErrorReporter for TracingReporter {
    fn fs_error(&self, i_pos: u64, message: &str) {
        self.needs_check.store(true, Ordering::Release);
        self.emit(i_pos, message);
    }

    fn fs_error_ratelimit(&self, i_pos: u64, message: &str) {
        self.needs_check.store(true, Ordering::Release);
        if self.admit() {
            self.emit(i_pos, message);
        } else {
            self.suppressed.fetch_add(1, Ordering::Relaxed);
        }
    }
}
