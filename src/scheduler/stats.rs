//! Run statistics.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters describing a run so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpotCheckStats {
    /// Sensors enqueued from the directory listing.
    pub enqueued: u64,
    /// Sensors dropped by the platform or tag filter.
    pub filtered: u64,
    /// Check invocations.
    pub checks_started: u64,
    /// Checks that reported the sensor as done.
    pub checks_done: u64,
    /// Checks that failed.
    pub check_errors: u64,
    /// Times a sensor was found offline (or unreachable) and parked.
    pub offline: u64,
    /// Times a check asked to be retried later.
    pub retries: u64,
}

impl SpotCheckStats {
    /// Returns the number of sensors that reached a final outcome.
    pub fn finished(&self) -> u64 {
        self.checks_done + self.check_errors + self.filtered
    }
}

#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    enqueued: AtomicU64,
    filtered: AtomicU64,
    checks_started: AtomicU64,
    checks_done: AtomicU64,
    check_errors: AtomicU64,
    offline: AtomicU64,
    retries: AtomicU64,
}

impl StatsCounters {
    pub(crate) fn record_enqueued(&self, count: u64) {
        self.enqueued.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn record_filtered(&self) {
        self.filtered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_check_started(&self) {
        self.checks_started.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_done(&self) {
        self.checks_done.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_error(&self) {
        self.check_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_offline(&self) {
        self.offline.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> SpotCheckStats {
        SpotCheckStats {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            filtered: self.filtered.load(Ordering::Relaxed),
            checks_started: self.checks_started.load(Ordering::Relaxed),
            checks_done: self.checks_done.load(Ordering::Relaxed),
            check_errors: self.check_errors.load(Ordering::Relaxed),
            offline: self.offline.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
        }
    }
}
