//! Point-in-time copy of request statistics.

/// Immutable snapshot of request counters.
///
/// All values are non-negative; `pending_requests` mirrors the live registry
/// size at the time the snapshot was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    pub total_requests: u64,
    pub success_count: u64,
    pub error_count: u64,
    pub pending_requests: usize,
}

impl StatsSnapshot {
    /// Fraction of resolved requests that succeeded, as a percentage.
    ///
    /// Returns 0.0 when no requests have been issued.
    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            return 0.0;
        }
        self.success_count as f64 / self.total_requests as f64 * 100.0
    }
}
