//! Channel-backed tile source facade.
//!
//! [`ChannelTileSource`] implements the viewer's [`TileSource`] contract on
//! top of the correlation engine: it turns `download_tile_start` calls into
//! outbound request envelopes, feeds inbound channel messages back through
//! the correlator, and materializes matched payloads into rasters for the
//! waiting sinks.
//!
//! # Wiring
//!
//! ```text
//! viewer ──download_tile_start──► ChannelTileSource ──send──► transport
//!                                      │    ▲
//!                             register │    │ handle_message / handle_response
//!                                      ▼    │
//!                               RequestCorrelator ◄── inbound channel messages
//! ```

mod error;
pub mod observer;

pub use error::SourceError;
pub use observer::{NullObserver, SourceObserver};

use crate::config::{SourceConfig, SourceDescriptor, DESCRIPTOR_KIND};
use crate::coord::{self, TileCoord};
use crate::correlator::{MatchOutcome, RequestCorrelator, ResolvedRequest};
use crate::protocol::{RequestEnvelope, ResponseEnvelope, ResponseMessage, STATUS_OK};
use crate::raster;
use crate::stats::{SourceMetrics, StatsSnapshot};
use crate::transport::ChannelTransport;
use crate::viewer::{DownloadContext, TileSource};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::warn;

/// Out-of-band payload fetch stage.
///
/// Some responses carry a `slice_id` instead of an inline payload; the
/// actual bytes must then be fetched through a side channel before the
/// response is complete. Implementations resolve a slice id to the base64
/// payload that would otherwise have been inlined.
pub trait SliceFetcher: Send + Sync {
    fn fetch<'a>(
        &'a self,
        slice_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<String, SourceError>> + Send + 'a>>;
}

/// Tile source served over an asynchronous message channel.
pub struct ChannelTileSource {
    config: SourceConfig,
    transport: Option<Arc<dyn ChannelTransport>>,
    correlator: RequestCorrelator,
    metrics: Arc<SourceMetrics>,
    observer: Arc<dyn SourceObserver>,
    slice_fetcher: Option<Arc<dyn SliceFetcher>>,
}

impl ChannelTileSource {
    /// Create a source with no transport attached.
    ///
    /// Downloads fail synchronously with
    /// [`SourceError::TransportUnavailable`] until
    /// [`with_transport`](Self::with_transport) provides one and the config
    /// names a channel.
    pub fn new(config: SourceConfig) -> Self {
        let metrics = Arc::new(SourceMetrics::new());
        let observer: Arc<dyn SourceObserver> = Arc::new(NullObserver);
        let correlator = RequestCorrelator::new(
            config.request_timeout,
            Arc::clone(&metrics),
            Arc::clone(&observer),
        );
        Self {
            config,
            transport: None,
            correlator,
            metrics,
            observer,
            slice_fetcher: None,
        }
    }

    /// Attach the outbound half of the channel.
    pub fn with_transport(mut self, transport: Arc<dyn ChannelTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Attach a lifecycle observer (stats dashboards, logging bridges).
    pub fn with_observer(mut self, observer: Arc<dyn SourceObserver>) -> Self {
        self.observer = Arc::clone(&observer);
        // The correlator reports timeouts and rollbacks through the same
        // observer, so rebuild it with the new wiring.
        self.correlator = RequestCorrelator::new(
            self.config.request_timeout,
            Arc::clone(&self.metrics),
            observer,
        );
        self
    }

    /// Attach the out-of-band slice fetch stage.
    pub fn with_slice_fetcher(mut self, fetcher: Arc<dyn SliceFetcher>) -> Self {
        self.slice_fetcher = Some(fetcher);
        self
    }

    /// The normalized configuration this source was built with.
    pub fn config(&self) -> &SourceConfig {
        &self.config
    }

    /// Point-in-time request statistics.
    pub fn stats(&self) -> StatsSnapshot {
        self.metrics.snapshot()
    }

    /// Number of requests currently pending.
    pub fn pending_request_count(&self) -> usize {
        self.correlator.pending_count()
    }

    /// Cancel every pending request. Each sink receives a cancellation
    /// failure. Meant to be invoked on teardown.
    pub fn clear_pending_requests(&self) {
        self.correlator.cancel_all();
    }

    fn report_sync_failure(&self, context: &DownloadContext, reason: SourceError) {
        warn!(src = %context.src, "{}", reason);
        context.sink.fail(reason.clone());
        self.observer.on_error(&reason);
    }

    /// Handle one raw inbound channel message.
    ///
    /// Unwraps the JSON `{"data": …}` pack. When the envelope names a
    /// `slice_id`, the payload is first fetched out of band, then the
    /// completed envelope feeds [`handle_response`](Self::handle_response)
    /// like any other.
    ///
    /// # Errors
    ///
    /// Returns the parse error for a malformed pack. Malformed packs
    /// correspond to no pending request and fail no sink.
    pub async fn handle_message(&self, raw: &str) -> Result<(), serde_json::Error> {
        let message: ResponseMessage = serde_json::from_str(raw)?;
        let mut envelope = message.data;

        if let Some(slice_id) = envelope.slice_id.take() {
            match self.fetch_slice(&slice_id).await {
                Ok(payload) => envelope.payload = Some(payload),
                Err(reason) => {
                    // The response itself arrived; resolve its pending entry
                    // rather than letting it run into the timeout.
                    self.fail_matched(&envelope, reason);
                    return Ok(());
                }
            }
        }

        self.handle_response(envelope).await;
        Ok(())
    }

    async fn fetch_slice(&self, slice_id: &str) -> Result<String, SourceError> {
        match &self.slice_fetcher {
            Some(fetcher) => fetcher.fetch(slice_id).await,
            None => Err(SourceError::Decode(format!(
                "no slice fetcher configured for slice {}",
                slice_id
            ))),
        }
    }

    /// Fail the pending entry a response corresponds to, if any.
    fn fail_matched(&self, envelope: &ResponseEnvelope, reason: SourceError) {
        match self.correlator.match_response(&envelope.request_id) {
            MatchOutcome::Matched(resolved) => {
                self.observer.on_response(envelope, &resolved.coord);
                self.metrics.request_failed();
                resolved.context.sink.fail(reason.clone());
                self.observer.on_error(&reason);
            }
            MatchOutcome::Unmatched => self.report_unmatched(&envelope.request_id),
        }
    }

    fn report_unmatched(&self, key: &str) {
        let reason = SourceError::UnmatchedResponse(key.to_string());
        warn!("{}", reason);
        self.observer.on_error(&reason);
    }

    /// Handle one inbound response envelope.
    ///
    /// Delegates to the correlator; on a match, a success status with a
    /// payload is decoded off the event loop and delivered to the sink,
    /// anything else fails the sink with the remote's message or a generic
    /// status text. Unmatched envelopes are reported to the observer and
    /// touch nothing else.
    pub async fn handle_response(&self, envelope: ResponseEnvelope) {
        let resolved = match self.correlator.match_response(&envelope.request_id) {
            MatchOutcome::Matched(resolved) => resolved,
            MatchOutcome::Unmatched => {
                self.report_unmatched(&envelope.request_id);
                return;
            }
        };
        self.observer.on_response(&envelope, &resolved.coord);

        let ResponseEnvelope {
            response_code,
            payload,
            error,
            ..
        } = envelope;

        match (response_code, payload) {
            (STATUS_OK, Some(payload)) => self.materialize(resolved, payload).await,
            (code, _) => {
                let message = error.unwrap_or_else(|| format!("HTTP {}", code));
                let reason = SourceError::RemoteError { code, message };
                self.metrics.request_failed();
                resolved.context.sink.fail(reason.clone());
                self.observer.on_error(&reason);
            }
        }
    }

    /// Decode a payload on the blocking pool and deliver the outcome.
    async fn materialize(&self, resolved: ResolvedRequest, payload: String) {
        let decoded = tokio::task::spawn_blocking(move || raster::decode_payload(&payload)).await;
        let result = match decoded {
            Ok(result) => result.map_err(SourceError::from),
            Err(join_error) => Err(SourceError::Decode(join_error.to_string())),
        };
        match result {
            Ok(raster) => {
                self.metrics.request_succeeded();
                resolved.context.sink.finish(raster);
            }
            Err(reason) => {
                self.metrics.request_failed();
                resolved.context.sink.fail(reason.clone());
                self.observer.on_error(&reason);
            }
        }
    }
}

impl TileSource for ChannelTileSource {
    fn supports(&self, descriptor: &SourceDescriptor) -> bool {
        descriptor.kind.as_deref() == Some(DESCRIPTOR_KIND)
    }

    fn configure(&self, descriptor: &SourceDescriptor) -> SourceConfig {
        self.config.normalized(descriptor)
    }

    fn get_tile_url(&self, level: u32, x: u32, y: u32) -> String {
        coord::tile_url(level, x, y)
    }

    fn download_tile_start(&self, context: DownloadContext) {
        let (transport, channel) = match (&self.transport, &self.config.channel_name) {
            (Some(transport), Some(channel)) => (Arc::clone(transport), channel.clone()),
            _ => {
                self.report_sync_failure(&context, SourceError::TransportUnavailable);
                return;
            }
        };

        let coord: TileCoord = match coord::parse_identifier(&context.src) {
            Ok(coord) => coord,
            Err(err) => {
                self.report_sync_failure(&context, err.into());
                return;
            }
        };

        let request_id = self.correlator.register(coord, context);
        let envelope =
            RequestEnvelope::get_tile(request_id.clone(), &self.config.instance_id, &coord);
        // Request-lifecycle contract: the outbound notification fires before
        // the send is attempted, so a send failure still counts the request.
        self.observer.on_request(&envelope);

        let send_result = serde_json::to_string(&envelope)
            .map_err(|e| SourceError::SendFailure(e.to_string()))
            .and_then(|payload| {
                transport
                    .send(&channel, &payload)
                    .map_err(SourceError::from)
            });
        if let Err(reason) = send_result {
            self.correlator.fail_send(&request_id, reason);
        }
    }

    fn download_tile_abort(&self, context: &DownloadContext) {
        self.correlator.cancel_by_context(context);
    }
}
