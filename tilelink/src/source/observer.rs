//! Telemetry hooks for request lifecycle events.

use super::error::SourceError;
use crate::coord::TileCoord;
use crate::protocol::{RequestEnvelope, ResponseEnvelope};

/// Process-wide observer for request lifecycle events.
///
/// Purely additive telemetry: every method has a no-op default, and nothing
/// an observer does (or its absence) can suppress a per-request sink
/// failure. Implementations must not block.
pub trait SourceObserver: Send + Sync {
    /// An outbound request is about to be sent.
    fn on_request(&self, _request: &RequestEnvelope) {}

    /// A response was matched to the pending request for `coord`.
    fn on_response(&self, _response: &ResponseEnvelope, _coord: &TileCoord) {}

    /// A request-level error occurred (including unmatched responses).
    fn on_error(&self, _error: &SourceError) {}
}

/// Observer that ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl SourceObserver for NullObserver {}
