//! Consumer counters.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared by a consumer and all its ingesters.
#[derive(Debug, Default)]
pub struct ConsumerMetrics {
    spans_accepted: AtomicU64,
    batches_failed: AtomicU64,
    writes_dispatched: AtomicU64,
    writes_failed: AtomicU64,
    writes_rejected: AtomicU64,
    dimension_writes_skipped: AtomicU64,
}

/// Point-in-time copy of [`ConsumerMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    /// Spans handed to `accept`
    pub spans_accepted: u64,
    /// Batches whose outcome was a failure
    pub batches_failed: u64,
    /// Statements sent to the store
    pub writes_dispatched: u64,
    /// Statements the store failed
    pub writes_failed: u64,
    /// Writes refused before dispatch (validation, oversized key, encoding)
    pub writes_rejected: u64,
    /// Dimension writes skipped by the dedup cache
    pub dimension_writes_skipped: u64,
}

impl ConsumerMetrics {
    /// Zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub(crate) fn record_spans(&self, n: usize) {
        self.spans_accepted.fetch_add(n as u64, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_batch_failed(&self) {
        self.batches_failed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_dispatch(&self) {
        self.writes_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_failure(&self) {
        self.writes_failed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_rejected(&self) {
        self.writes_rejected.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_skip(&self) {
        self.dimension_writes_skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy the current values.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            spans_accepted: self.spans_accepted.load(Ordering::Relaxed),
            batches_failed: self.batches_failed.load(Ordering::Relaxed),
            writes_dispatched: self.writes_dispatched.load(Ordering::Relaxed),
            writes_failed: self.writes_failed.load(Ordering::Relaxed),
            writes_rejected: self.writes_rejected.load(Ordering::Relaxed),
            dimension_writes_skipped: self.dimension_writes_skipped.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_counters() {
        let metrics = ConsumerMetrics::new();
        metrics.record_spans(3);
        metrics.record_dispatch();
        metrics.record_dispatch();
        metrics.record_failure();
        metrics.record_skip();

        let snap = metrics.snapshot();
        assert_eq!(snap.spans_accepted, 3);
        assert_eq!(snap.writes_dispatched, 2);
        assert_eq!(snap.writes_failed, 1);
        assert_eq!(snap.dimension_writes_skipped, 1);
        assert_eq!(snap.writes_rejected, 0);
    }
}
