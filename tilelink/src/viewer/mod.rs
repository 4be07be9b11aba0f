//! Viewer-side capability contract.
//!
//! The viewer is an external collaborator: it issues `download_tile_start`
//! and `download_tile_abort` calls and expects exactly one `finish`/`fail`
//! callback per started download. This module defines that contract as
//! explicit traits rather than the prototype extension the idea originated
//! from.
//!
//! # Sink lifecycle
//!
//! Each [`DownloadContext`] carries a [`TileSink`]. Once the download is in
//! flight, the sink receives exactly one terminal callback:
//! - `finish(raster)` on a successfully decoded tile, or
//! - `fail(reason)` on timeout, cancellation, transport failure, remote
//!   error, or decode failure.
//!
//! Never both, never neither, never twice.

use crate::config::{SourceConfig, SourceDescriptor};
use crate::source::SourceError;
use image::DynamicImage;
use std::sync::Arc;

/// A displayable tile image.
pub type Raster = DynamicImage;

/// Completion object for one tile download.
///
/// Implementations must be safe to call from any thread; the correlator
/// invokes them from timer tasks and response-handling tasks.
pub trait TileSink: Send + Sync {
    /// Called with the decoded tile image on success.
    fn finish(&self, raster: Raster);

    /// Called with the failure reason on any terminal failure.
    fn fail(&self, reason: SourceError);
}

/// Context handed in by the viewer for one tile download.
///
/// `src` is the opaque identifier previously produced by
/// [`TileSource::get_tile_url`]. The sink is shared so the correlator can
/// keep a reference in its registry; abort matches on sink identity.
#[derive(Clone)]
pub struct DownloadContext {
    /// Tile identifier (`tilelink://tile/<level>/<x>/<y>`)
    pub src: String,
    /// Completion callbacks for this download
    pub sink: Arc<dyn TileSink>,
}

impl DownloadContext {
    pub fn new(src: impl Into<String>, sink: Arc<dyn TileSink>) -> Self {
        Self {
            src: src.into(),
            sink,
        }
    }

    /// Whether two contexts refer to the same download.
    ///
    /// Identity is the sink allocation, not the identifier string: the
    /// viewer may legitimately start two downloads for the same tile.
    pub fn same_download(&self, other: &DownloadContext) -> bool {
        Arc::ptr_eq(&self.sink, &other.sink)
    }
}

impl std::fmt::Debug for DownloadContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadContext")
            .field("src", &self.src)
            .finish_non_exhaustive()
    }
}

/// The capability set the viewer requires from a tile source.
pub trait TileSource {
    /// Whether this source can serve the given descriptor.
    fn supports(&self, descriptor: &SourceDescriptor) -> bool;

    /// Normalize a descriptor into a complete configuration.
    fn configure(&self, descriptor: &SourceDescriptor) -> SourceConfig;

    /// Produce the opaque identifier for a tile coordinate.
    ///
    /// Pure; round-trips through [`crate::coord::parse_identifier`].
    fn get_tile_url(&self, level: u32, x: u32, y: u32) -> String;

    /// Begin downloading the tile named by `context.src`.
    ///
    /// Synchronous failures (no transport, malformed identifier, send
    /// rejection) fail the context immediately and are never timed out.
    fn download_tile_start(&self, context: DownloadContext);

    /// Abort the download previously started with the same context.
    ///
    /// No-op when the download already completed or was never started.
    fn download_tile_abort(&self, context: &DownloadContext);
}
