//! Tilelink - tile delivery over an unordered async message channel
//!
//! This library lets an image viewer that expects a synchronous
//! "fetch tile by coordinate, get back an image or a failure" contract be
//! served over a push-based bidirectional message pipe with no native
//! request/response semantics. The core is the request-correlation engine:
//! a pending-request registry with timeouts, explicit cancellation, and
//! response matching by derived correlation keys.
//!
//! # High-Level API
//!
//! ```ignore
//! use tilelink::source::ChannelTileSource;
//! use tilelink::config::SourceConfig;
//! use tilelink::viewer::{DownloadContext, TileSource};
//!
//! let source = ChannelTileSource::new(SourceConfig::default()).with_transport(transport);
//!
//! // Viewer side: kick off a tile download
//! let url = source.get_tile_url(3, 5, 7);
//! source.download_tile_start(DownloadContext::new(url, sink));
//!
//! // Transport side: feed inbound channel messages back in
//! source.handle_message(&raw_json).await;
//! ```

pub mod config;
pub mod coord;
pub mod correlator;
pub mod logging;
pub mod protocol;
pub mod raster;
pub mod source;
pub mod stats;
pub mod transport;
pub mod viewer;

/// Version of the tilelink library.
///
/// This is synchronized across all components in the workspace.
/// The version is defined in `Cargo.toml` and injected at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
