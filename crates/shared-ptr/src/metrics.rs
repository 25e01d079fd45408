//! Control block metrics.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Process-level cumulative control block statistics.
///
/// These counters are diagnostics only: ownership is decided by each block's
/// own reference count, never by anything recorded here.
///
/// # Example
///
/// ```
/// use shared_ptr::{global_metrics, SharedPtr};
///
/// let before = global_metrics().blocks_created();
/// let sp = SharedPtr::new(1_u32);
/// assert!(global_metrics().blocks_created() > before);
/// drop(sp);
/// ```
#[derive(Debug)]
pub struct GlobalMetrics {
    blocks_created: AtomicUsize,
    blocks_destroyed: AtomicUsize,
}

impl Default for GlobalMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl GlobalMetrics {
    /// Create a new `GlobalMetrics` with all counters initialized to zero.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            blocks_created: AtomicUsize::new(0),
            blocks_destroyed: AtomicUsize::new(0),
        }
    }

    /// Total control blocks allocated since process start.
    #[must_use]
    pub fn blocks_created(&self) -> usize {
        self.blocks_created.load(Ordering::Relaxed)
    }

    /// Total control blocks destroyed since process start.
    #[must_use]
    pub fn blocks_destroyed(&self) -> usize {
        self.blocks_destroyed.load(Ordering::Relaxed)
    }

    /// Control blocks currently alive.
    ///
    /// Both counters are read independently, so under concurrent churn the
    /// result is approximate.
    #[must_use]
    pub fn live_blocks(&self) -> usize {
        let destroyed = self.blocks_destroyed();
        self.blocks_created().saturating_sub(destroyed)
    }

    pub(crate) fn record_created(&self) {
        self.blocks_created.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_destroyed(&self) {
        self.blocks_destroyed.fetch_add(1, Ordering::Relaxed);
    }
}

static GLOBAL_METRICS: GlobalMetrics = GlobalMetrics::new();

/// Get the process-level control block metrics.
#[must_use]
pub fn global_metrics() -> &'static GlobalMetrics {
    &GLOBAL_METRICS
}
