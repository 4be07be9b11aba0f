//! Request correlation and lifecycle engine.
//!
//! The channel delivers arbitrary messages in arbitrary order, may drop
//! them, and may echo stale responses after the requester has given up.
//! This module owns the pending-request registry that turns that into the
//! viewer's request/response contract: it issues request ids, runs one
//! timeout timer per request, matches inbound responses by derived
//! correlation key, and guarantees every registered request resolves to
//! exactly one terminal outcome.
//!
//! # Registry discipline
//!
//! Every terminal transition is *remove-then-notify*: the entry leaves the
//! registry under the lock, and the sink is invoked only after the lock is
//! released. Registry membership is the sole arbiter of the timeout/response
//! race on the same entry — whichever event removes the entry first wins,
//! the loser finds nothing and is a no-op. No per-entry flags.
//!
//! The registry preserves insertion order and is scanned, not indexed: the
//! correlation key carried by responses is derived from the request's
//! logical parameters, not equal to the opaque request id, so there is no
//! useful lookup key. Scanning also makes the duplicate-coordinate
//! tie-break deterministic (see [`RequestCorrelator::match_response`]).

use crate::coord::TileCoord;
use crate::protocol::{correlation_key, RequestIdGenerator, METHOD_GET_TILE};
use crate::source::{NullObserver, SourceError, SourceObserver};
use crate::stats::SourceMetrics;
use crate::viewer::DownloadContext;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::AbortHandle;
use tracing::{debug, warn};

/// One in-flight tile request, exclusively owned by the registry.
struct PendingRequest {
    request_id: String,
    coord: TileCoord,
    issued_at: Instant,
    /// Handle for the timeout task. Aborting is idempotent; double-fire is
    /// impossible because firing goes through registry removal.
    timer: AbortHandle,
    context: DownloadContext,
}

/// A pending request after its terminal removal from the registry.
///
/// The timer is already cleared; the holder owns the only path to the sink,
/// so whatever it reports is delivered exactly once.
pub struct ResolvedRequest {
    pub request_id: String,
    pub coord: TileCoord,
    pub issued_at: Instant,
    pub context: DownloadContext,
}

/// Outcome of matching an inbound response against the registry.
pub enum MatchOutcome {
    /// The response belongs to this formerly-pending request.
    Matched(ResolvedRequest),
    /// No pending entry derives this correlation key. Non-fatal: a
    /// duplicate, late, or already-aborted response. The registry was not
    /// touched and no sink was failed.
    Unmatched,
}

struct Inner {
    registry: Mutex<Vec<PendingRequest>>,
    metrics: Arc<SourceMetrics>,
    observer: Arc<dyn SourceObserver>,
}

impl Inner {
    /// Remove the entry with the given id, refreshing the pending gauge.
    fn remove_by_id(&self, request_id: &str) -> Option<PendingRequest> {
        let mut registry = self.registry.lock();
        let pos = registry
            .iter()
            .position(|entry| entry.request_id == request_id)?;
        let entry = registry.remove(pos);
        self.metrics.set_pending(registry.len());
        Some(entry)
    }
}

/// The pending-request registry and its lifecycle operations.
///
/// Cheap to clone conceptually via the shared inner state, but constructed
/// once per tile source. Must be used from within a tokio runtime; timeout
/// timers are spawned tasks.
pub struct RequestCorrelator {
    inner: Arc<Inner>,
    timeout: Duration,
    ids: RequestIdGenerator,
}

impl RequestCorrelator {
    pub fn new(
        timeout: Duration,
        metrics: Arc<SourceMetrics>,
        observer: Arc<dyn SourceObserver>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry: Mutex::new(Vec::new()),
                metrics,
                observer,
            }),
            timeout,
            ids: RequestIdGenerator::new(),
        }
    }

    /// Correlator with default wiring, for tests and simple embedders.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::new(
            timeout,
            Arc::new(SourceMetrics::new()),
            Arc::new(NullObserver),
        )
    }

    /// Register a new pending request and start its timeout timer.
    ///
    /// Returns the generated opaque request id. The caller is expected to
    /// send the outbound request afterwards and roll back via
    /// [`fail_send`](Self::fail_send) if the send is rejected.
    pub fn register(&self, coord: TileCoord, context: DownloadContext) -> String {
        let request_id = self.ids.next_id();

        // The registry lock is held across the spawn so a zero-duration
        // timer cannot fire before its entry is inserted.
        let mut registry = self.inner.registry.lock();
        let task = tokio::spawn(Self::expire(
            Arc::clone(&self.inner),
            request_id.clone(),
            self.timeout,
        ));
        registry.push(PendingRequest {
            request_id: request_id.clone(),
            coord,
            issued_at: Instant::now(),
            timer: task.abort_handle(),
            context,
        });
        self.inner.metrics.request_registered();
        self.inner.metrics.set_pending(registry.len());
        drop(registry);

        debug!(request_id = %request_id, tile = %coord, "registered tile request");
        request_id
    }

    /// Timeout task body: one per pending request.
    async fn expire(inner: Arc<Inner>, request_id: String, timeout: Duration) {
        tokio::time::sleep(timeout).await;

        // If the entry is gone a response or cancellation won the race.
        let Some(entry) = inner.remove_by_id(&request_id) else {
            return;
        };
        inner.metrics.request_failed();
        let reason = SourceError::Timeout(request_id);
        warn!(tile = %entry.coord, "{}", reason);
        entry.context.sink.fail(reason.clone());
        inner.observer.on_error(&reason);
    }

    /// Cancel one pending request.
    ///
    /// Clears its timer, removes it, and fails its sink with
    /// [`SourceError::Cancelled`]. No-op when the id is not pending.
    pub fn cancel(&self, request_id: &str) -> bool {
        let Some(entry) = self.inner.remove_by_id(request_id) else {
            return false;
        };
        entry.timer.abort();
        self.inner.metrics.request_failed();
        debug!(request_id, tile = %entry.coord, "cancelled tile request");
        entry.context.sink.fail(SourceError::Cancelled);
        true
    }

    /// Cancel the pending request that owns the given download context.
    ///
    /// Linear scan on sink identity; no-op when the context is unknown.
    pub fn cancel_by_context(&self, context: &DownloadContext) -> bool {
        let request_id = {
            let registry = self.inner.registry.lock();
            registry
                .iter()
                .find(|entry| entry.context.same_download(context))
                .map(|entry| entry.request_id.clone())
        };
        match request_id {
            Some(id) => self.cancel(&id),
            None => false,
        }
    }

    /// Cancel every pending request. Teardown release valve.
    pub fn cancel_all(&self) {
        let drained: Vec<PendingRequest> = {
            let mut registry = self.inner.registry.lock();
            let drained = std::mem::take(&mut *registry);
            self.inner.metrics.set_pending(0);
            drained
        };
        debug!(count = drained.len(), "cancelling all pending tile requests");
        for entry in drained {
            entry.timer.abort();
            self.inner.metrics.request_failed();
            entry.context.sink.fail(SourceError::Cancelled);
        }
    }

    /// Roll back a registration whose outbound send was rejected.
    ///
    /// Removes the fresh entry, clears its timer, and fails the sink with a
    /// distinct send-failure reason so the viewer can tell this apart from a
    /// timeout or remote error.
    pub fn fail_send(&self, request_id: &str, reason: SourceError) -> bool {
        let Some(entry) = self.inner.remove_by_id(request_id) else {
            return false;
        };
        entry.timer.abort();
        self.inner.metrics.request_failed();
        warn!(request_id, tile = %entry.coord, "send failed: {}", reason);
        entry.context.sink.fail(reason.clone());
        self.inner.observer.on_error(&reason);
        true
    }

    /// Match an inbound correlation key against the pending registry.
    ///
    /// Recomputes, for every pending entry in insertion order, the key the
    /// remote would echo for it (`"GetTile <level> <x> <y>"`) and resolves
    /// the first entry whose key equals `key`. When duplicate in-flight
    /// requests exist for the same coordinate the oldest one wins; this
    /// first-match tie-break is deterministic but arbitrary, and callers
    /// should treat duplicate in-flight coordinates as a misuse the engine
    /// tolerates rather than resolves.
    ///
    /// On a match the entry's timer is cleared and the entry removed. On no
    /// match nothing is mutated and no sink is failed.
    pub fn match_response(&self, key: &str) -> MatchOutcome {
        let entry = {
            let mut registry = self.inner.registry.lock();
            let pos = registry
                .iter()
                .position(|entry| correlation_key(METHOD_GET_TILE, &entry.coord) == key);
            match pos {
                Some(index) => {
                    let entry = registry.remove(index);
                    self.inner.metrics.set_pending(registry.len());
                    Some(entry)
                }
                None => None,
            }
        };

        match entry {
            Some(entry) => {
                entry.timer.abort();
                debug!(
                    request_id = %entry.request_id,
                    tile = %entry.coord,
                    elapsed_ms = entry.issued_at.elapsed().as_millis() as u64,
                    "matched tile response"
                );
                MatchOutcome::Matched(ResolvedRequest {
                    request_id: entry.request_id,
                    coord: entry.coord,
                    issued_at: entry.issued_at,
                    context: entry.context,
                })
            }
            None => MatchOutcome::Unmatched,
        }
    }

    /// Number of requests currently pending.
    pub fn pending_count(&self) -> usize {
        self.inner.registry.lock().len()
    }

    /// The configured timeout window.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::observer::tests::RecordingObserver;
    use crate::viewer::tests::{RecordingSink, SinkEvent};
    use std::time::Duration;

    fn context_for(sink: Arc<RecordingSink>, coord: TileCoord) -> DownloadContext {
        DownloadContext::new(
            crate::coord::tile_url(coord.level, coord.x, coord.y),
            sink,
        )
    }

    fn correlator_with(
        timeout_ms: u64,
    ) -> (RequestCorrelator, Arc<SourceMetrics>, Arc<RecordingObserver>) {
        let metrics = Arc::new(SourceMetrics::new());
        let observer = RecordingObserver::new();
        let correlator = RequestCorrelator::new(
            Duration::from_millis(timeout_ms),
            Arc::clone(&metrics),
            observer.clone(),
        );
        (correlator, metrics, observer)
    }

    fn assert_accounting(metrics: &SourceMetrics) {
        let s = metrics.snapshot();
        assert_eq!(
            s.total_requests,
            s.success_count + s.error_count + s.pending_requests as u64,
            "accounting identity violated: {:?}",
            s
        );
    }

    #[tokio::test]
    async fn test_register_makes_request_pending() {
        let (correlator, metrics, _) = correlator_with(5_000);
        let sink = RecordingSink::new();
        let id = correlator.register(TileCoord::new(1, 2, 3), context_for(sink.clone(), TileCoord::new(1, 2, 3)));

        assert!(id.starts_with("req_"));
        assert_eq!(correlator.pending_count(), 1);
        assert_eq!(metrics.snapshot().total_requests, 1);
        assert_eq!(metrics.snapshot().pending_requests, 1);
        assert!(sink.events().is_empty());
        assert_accounting(&metrics);
    }

    #[tokio::test]
    async fn test_request_ids_unique() {
        let (correlator, _, _) = correlator_with(5_000);
        let coord = TileCoord::new(0, 0, 0);
        let a = correlator.register(coord, context_for(RecordingSink::new(), coord));
        let b = correlator.register(coord, context_for(RecordingSink::new(), coord));
        assert_ne!(a, b);
        assert_eq!(correlator.pending_count(), 2);
    }

    #[tokio::test]
    async fn test_timeout_fires_and_fails_sink() {
        let (correlator, metrics, observer) = correlator_with(50);
        let sink = RecordingSink::new();
        let coord = TileCoord::new(2, 1, 1);
        let id = correlator.register(coord, context_for(sink.clone(), coord));

        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(correlator.pending_count(), 0);
        let failures = sink.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0], SourceError::Timeout(id));
        assert_eq!(metrics.snapshot().error_count, 1);
        assert_eq!(observer.error_count(), 1);
        assert_accounting(&metrics);
    }

    #[tokio::test]
    async fn test_match_before_timeout_wins() {
        let (correlator, metrics, _) = correlator_with(80);
        let sink = RecordingSink::new();
        let coord = TileCoord::new(0, 0, 0);
        correlator.register(coord, context_for(sink.clone(), coord));

        let outcome = correlator.match_response("GetTile 0 0 0");
        assert!(matches!(outcome, MatchOutcome::Matched(_)));
        assert_eq!(correlator.pending_count(), 0);

        // The aborted timer must have no observable effect
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(sink.failures().is_empty());
        assert_eq!(metrics.snapshot().error_count, 0);
    }

    #[tokio::test]
    async fn test_match_returns_entry_details() {
        let (correlator, _, _) = correlator_with(5_000);
        let sink = RecordingSink::new();
        let coord = TileCoord::new(4, 7, 9);
        let id = correlator.register(coord, context_for(sink, coord));

        match correlator.match_response("GetTile 4 7 9") {
            MatchOutcome::Matched(resolved) => {
                assert_eq!(resolved.request_id, id);
                assert_eq!(resolved.coord, coord);
            }
            MatchOutcome::Unmatched => panic!("expected a match"),
        }
    }

    #[tokio::test]
    async fn test_unmatched_response_is_inert() {
        let (correlator, metrics, _) = correlator_with(5_000);
        let sink = RecordingSink::new();
        let coord = TileCoord::new(1, 1, 1);
        correlator.register(coord, context_for(sink.clone(), coord));

        let outcome = correlator.match_response("GetTile 9 9 9");
        assert!(matches!(outcome, MatchOutcome::Unmatched));
        assert_eq!(correlator.pending_count(), 1);
        assert!(sink.events().is_empty());
        assert_eq!(metrics.snapshot().pending_requests, 1);
        assert_accounting(&metrics);
    }

    #[tokio::test]
    async fn test_duplicate_response_second_match_is_unmatched() {
        let (correlator, _, _) = correlator_with(5_000);
        let coord = TileCoord::new(3, 3, 3);
        correlator.register(coord, context_for(RecordingSink::new(), coord));

        assert!(matches!(
            correlator.match_response("GetTile 3 3 3"),
            MatchOutcome::Matched(_)
        ));
        // Duplicate/stale echo of the same response
        assert!(matches!(
            correlator.match_response("GetTile 3 3 3"),
            MatchOutcome::Unmatched
        ));
    }

    #[tokio::test]
    async fn test_duplicate_in_flight_first_match_wins() {
        let (correlator, _, _) = correlator_with(5_000);
        let coord = TileCoord::new(5, 5, 5);
        let first_sink = RecordingSink::new();
        let second_sink = RecordingSink::new();
        let first_id = correlator.register(coord, context_for(first_sink, coord));
        correlator.register(coord, context_for(second_sink, coord));

        match correlator.match_response("GetTile 5 5 5") {
            MatchOutcome::Matched(resolved) => assert_eq!(resolved.request_id, first_id),
            MatchOutcome::Unmatched => panic!("expected a match"),
        }
        // The second duplicate is still pending and will resolve separately
        assert_eq!(correlator.pending_count(), 1);
    }

    #[tokio::test]
    async fn test_cancel_removes_exactly_one() {
        let (correlator, metrics, _) = correlator_with(5_000);
        let cancelled_sink = RecordingSink::new();
        let survivor_sink = RecordingSink::new();
        let coord_a = TileCoord::new(1, 0, 0);
        let coord_b = TileCoord::new(1, 0, 1);
        let id = correlator.register(coord_a, context_for(cancelled_sink.clone(), coord_a));
        correlator.register(coord_b, context_for(survivor_sink.clone(), coord_b));

        assert!(correlator.cancel(&id));
        assert_eq!(correlator.pending_count(), 1);
        assert_eq!(cancelled_sink.failures(), vec![SourceError::Cancelled]);
        assert!(survivor_sink.events().is_empty());
        assert_accounting(&metrics);
    }

    #[tokio::test]
    async fn test_cancel_unknown_id_is_noop() {
        let (correlator, metrics, _) = correlator_with(5_000);
        assert!(!correlator.cancel("req_999_0"));
        assert_eq!(metrics.snapshot().error_count, 0);
    }

    #[tokio::test]
    async fn test_cancel_by_context_sink_identity() {
        let (correlator, _, _) = correlator_with(5_000);
        let sink = RecordingSink::new();
        let coord = TileCoord::new(2, 2, 2);
        let context = context_for(sink.clone(), coord);
        correlator.register(coord, context.clone());

        assert!(correlator.cancel_by_context(&context));
        assert_eq!(correlator.pending_count(), 0);
        assert_eq!(sink.failures(), vec![SourceError::Cancelled]);

        // Second abort for the same context is a no-op
        assert!(!correlator.cancel_by_context(&context));
        assert_eq!(sink.failures().len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_all_fails_every_sink() {
        let (correlator, metrics, _) = correlator_with(5_000);
        let sinks: Vec<_> = (0..3).map(|_| RecordingSink::new()).collect();
        for (i, sink) in sinks.iter().enumerate() {
            let coord = TileCoord::new(1, i as u32, 0);
            correlator.register(coord, context_for(sink.clone(), coord));
        }

        correlator.cancel_all();

        assert_eq!(correlator.pending_count(), 0);
        for sink in &sinks {
            assert_eq!(sink.failures(), vec![SourceError::Cancelled]);
        }
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.error_count, 3);
        assert_eq!(snapshot.pending_requests, 0);
        assert_accounting(&metrics);
    }

    #[tokio::test]
    async fn test_cancelled_entry_ignores_late_response_and_timer() {
        let (correlator, _, _) = correlator_with(60);
        let sink = RecordingSink::new();
        let coord = TileCoord::new(6, 0, 0);
        let id = correlator.register(coord, context_for(sink.clone(), coord));

        correlator.cancel(&id);
        // Late echo after abort must be unmatched
        assert!(matches!(
            correlator.match_response("GetTile 6 0 0"),
            MatchOutcome::Unmatched
        ));
        // Timer window passes; no second failure may be delivered
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(sink.events().len(), 1);
    }

    #[tokio::test]
    async fn test_fail_send_rolls_back_registration() {
        let (correlator, metrics, observer) = correlator_with(5_000);
        let sink = RecordingSink::new();
        let coord = TileCoord::new(1, 2, 3);
        let id = correlator.register(coord, context_for(sink.clone(), coord));

        let rolled_back = correlator.fail_send(
            &id,
            SourceError::SendFailure("channel closed".to_string()),
        );
        assert!(rolled_back);
        assert_eq!(correlator.pending_count(), 0);
        assert_eq!(
            sink.failures(),
            vec![SourceError::SendFailure("channel closed".to_string())]
        );
        assert_eq!(observer.error_count(), 1);
        assert_accounting(&metrics);
    }

    #[tokio::test]
    async fn test_exactly_one_terminal_outcome_under_races() {
        // Register with a short timeout, then race a match against it;
        // regardless of which side wins the sink sees exactly one event.
        for _ in 0..20 {
            let (correlator, _, _) = correlator_with(5);
            let sink = RecordingSink::new();
            let coord = TileCoord::new(7, 7, 7);
            correlator.register(coord, context_for(sink.clone(), coord));

            tokio::time::sleep(Duration::from_millis(4)).await;
            let matched = matches!(
                correlator.match_response("GetTile 7 7 7"),
                MatchOutcome::Matched(_)
            );
            tokio::time::sleep(Duration::from_millis(30)).await;

            let events = sink.events();
            if matched {
                // Match won: timer was aborted, nothing reached the sink yet
                assert!(events.is_empty(), "matched entry must not be failed");
            } else {
                // Timeout won first: exactly one failure
                assert_eq!(events.len(), 1);
                assert!(matches!(
                    &events[0],
                    SinkEvent::Failed(SourceError::Timeout(_))
                ));
            }
        }
    }
}
