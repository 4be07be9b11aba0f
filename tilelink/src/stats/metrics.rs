//! Lock-free request counters.

use super::snapshot::StatsSnapshot;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Thread-safe request statistics.
///
/// Updated from correlator operations and response handling; read by
/// applications through [`SourceMetrics::snapshot`]. Callers never mutate
/// counters directly.
#[derive(Debug, Default)]
pub struct SourceMetrics {
    /// Requests registered since construction
    total_requests: AtomicU64,
    /// Requests that finished with a decoded raster
    success_count: AtomicU64,
    /// Requests that terminated in any failure (timeout, remote error,
    /// decode failure, cancellation, send failure)
    error_count: AtomicU64,
    /// Live registry size, set after every registry mutation
    pending_requests: AtomicUsize,
}

impl SourceMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a newly registered request.
    pub fn request_registered(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a request that resolved with a raster.
    pub fn request_succeeded(&self) {
        self.success_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a request that terminated in failure.
    pub fn request_failed(&self) {
        self.error_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Set the pending gauge to the live registry size.
    pub fn set_pending(&self, pending: usize) {
        self.pending_requests.store(pending, Ordering::Relaxed);
    }

    /// Take a point-in-time copy of all counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            success_count: self.success_count.load(Ordering::Relaxed),
            error_count: self.error_count.load(Ordering::Relaxed),
            pending_requests: self.pending_requests.load(Ordering::Relaxed),
        }
    }
}
