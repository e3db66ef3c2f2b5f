//! Processor Metrics
//!
//! Lock-free counters describing what a processor has done so far. Handler
//! failures and skipped flushes are never raised to callers, so these
//! counters (together with the logs) are how they become observable.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters of a periodic batch processor
#[derive(Debug, Default)]
pub struct BatchMetrics {
    published: AtomicU64,
    publish_failures: AtomicU64,
    batches_dispatched: AtomicU64,
    items_dispatched: AtomicU64,
    batches_failed: AtomicU64,
    items_dropped: AtomicU64,
    handler_attempts: AtomicU64,
    flushes_skipped: AtomicU64,
    last_flush_at: Mutex<Option<DateTime<Utc>>>,
}

/// Point-in-time copy of [`BatchMetrics`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Items accepted by the ingestion channel
    pub published: u64,
    /// Items rejected because the channel was closed
    pub publish_failures: u64,
    /// Batches the handler accepted
    pub batches_dispatched: u64,
    /// Items contained in accepted batches
    pub items_dispatched: u64,
    /// Batches dropped after their last failed attempt
    pub batches_failed: u64,
    /// Items contained in dropped batches
    pub items_dropped: u64,
    /// Handler invocations, retries included
    pub handler_attempts: u64,
    /// Flush attempts skipped because another flush held the lock
    pub flushes_skipped: u64,
    /// Completion time of the last flush round
    pub last_flush_at: Option<DateTime<Utc>>,
}

impl BatchMetrics {
    /// Create zeroed metrics
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_published(&self) {
        self.published.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_publish_failure(&self) {
        self.publish_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_attempt(&self) {
        self.handler_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dispatched(&self, items: usize) {
        self.batches_dispatched.fetch_add(1, Ordering::Relaxed);
        self.items_dispatched
            .fetch_add(items as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_failed(&self, items: usize) {
        self.batches_failed.fetch_add(1, Ordering::Relaxed);
        self.items_dropped.fetch_add(items as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_skipped(&self) {
        self.flushes_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_flush_completed(&self) {
        *self.last_flush_at.lock() = Some(Utc::now());
    }

    /// Take a consistent-enough copy of the counters
    ///
    /// Each counter is read atomically, but the snapshot as a whole is not
    /// taken under a lock.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            published: self.published.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
            batches_dispatched: self.batches_dispatched.load(Ordering::Relaxed),
            items_dispatched: self.items_dispatched.load(Ordering::Relaxed),
            batches_failed: self.batches_failed.load(Ordering::Relaxed),
            items_dropped: self.items_dropped.load(Ordering::Relaxed),
            handler_attempts: self.handler_attempts.load(Ordering::Relaxed),
            flushes_skipped: self.flushes_skipped.load(Ordering::Relaxed),
            last_flush_at: *self.last_flush_at.lock(),
        }
    }
}
