//! Request statistics for observability and user feedback.
//!
//! This module provides counters derived from correlator and facade events.
//! It uses lock-free atomic counters so every lifecycle path (register,
//! match, timeout, cancel) can record events with minimal overhead.
//!
//! # Architecture
//!
//! ```text
//! Correlator / Facade ─────► SourceMetrics ─────► StatsSnapshot ─────► Views
//!                            (atomic counters)    (point-in-time copy)
//! ```
//!
//! # Invariant
//!
//! After every registry mutation:
//! `total_requests == success_count + error_count + pending_requests`
//! (errors include timeouts, remote errors, decode failures, and
//! cancellations). The pending gauge is recomputed from the live registry
//! size, never counted independently.

mod metrics;
mod snapshot;

pub use metrics::SourceMetrics;
pub use snapshot::StatsSnapshot;
