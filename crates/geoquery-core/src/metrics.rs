//! Process-wide atomic counters.
//!
//! Counters are bumped at the call site; [`Metrics::flush`] emits all of
//! them as one `info!` event, typically after a run.

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

pub struct Metrics {
    queries: AtomicU64,
    tiles_dispatched: AtomicU64,
    tiles_failed: AtomicU64,
    fallbacks_invoked: AtomicU64,
    tasks_failed: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of every counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
pub struct MetricsSnapshot {
    pub queries: u64,
    pub tiles_dispatched: u64,
    pub tiles_failed: u64,
    pub fallbacks_invoked: u64,
    pub tasks_failed: u64,
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            queries: AtomicU64::new(0),
            tiles_dispatched: AtomicU64::new(0),
            tiles_failed: AtomicU64::new(0),
            fallbacks_invoked: AtomicU64::new(0),
            tasks_failed: AtomicU64::new(0),
        }
    }

    pub fn inc_queries(&self) {
        self.queries.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "queries", "counter incremented");
    }

    /// One compute call issued (retries count separately).
    pub fn inc_tiles_dispatched(&self) {
        self.tiles_dispatched.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "tiles_dispatched", "counter incremented");
    }

    pub fn inc_tiles_failed(&self) {
        self.tiles_failed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "tiles_failed", "counter incremented");
    }

    pub fn inc_fallbacks(&self) {
        self.fallbacks_invoked.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "fallbacks_invoked", "counter incremented");
    }

    pub fn inc_tasks_failed(&self) {
        self.tasks_failed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "tasks_failed", "counter incremented");
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            queries: self.queries.load(Ordering::Relaxed),
            tiles_dispatched: self.tiles_dispatched.load(Ordering::Relaxed),
            tiles_failed: self.tiles_failed.load(Ordering::Relaxed),
            fallbacks_invoked: self.fallbacks_invoked.load(Ordering::Relaxed),
            tasks_failed: self.tasks_failed.load(Ordering::Relaxed),
        }
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        let s = self.snapshot();
        tracing::info!(
            metric = "flush",
            queries = s.queries,
            tiles_dispatched = s.tiles_dispatched,
            tiles_failed = s.tiles_failed,
            fallbacks_invoked = s.fallbacks_invoked,
            tasks_failed = s.tasks_failed,
        );
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.queries.store(0, Ordering::Relaxed);
        self.tiles_dispatched.store(0, Ordering::Relaxed);
        self.tiles_failed.store(0, Ordering::Relaxed);
        self.fallbacks_invoked.store(0, Ordering::Relaxed);
        self.tasks_failed.store(0, Ordering::Relaxed);
    }
}
