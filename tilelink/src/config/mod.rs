//! Tile source configuration.
//!
//! A [`SourceDescriptor`] is what an application hands the viewer to
//! describe an image: every field optional, deserialized from JSON. The
//! `configure` step normalizes it into a complete [`SourceConfig`] with the
//! documented defaults filled in.

use serde::Deserialize;
use std::time::Duration;

/// Descriptor kind this crate serves.
pub const DESCRIPTOR_KIND: &str = "tilelink";

/// Default request timeout in milliseconds.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;

/// Raw, possibly partial image descriptor as supplied by the application.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SourceDescriptor {
    /// Must equal [`DESCRIPTOR_KIND`] for this source to claim it.
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub tile_size: Option<u32>,
    pub tile_overlap: Option<u32>,
    pub min_level: Option<u32>,
    pub max_level: Option<u32>,
    /// Instance identifier passed through to outbound requests as `IdNo`.
    #[serde(alias = "sdpcId")]
    pub instance_id: Option<String>,
    /// Request timeout in milliseconds.
    pub request_timeout: Option<u64>,
    pub channel_name: Option<String>,
}

/// Complete, normalized tile source configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceConfig {
    pub width: u32,
    pub height: u32,
    pub tile_size: u32,
    pub tile_overlap: u32,
    pub min_level: u32,
    pub max_level: u32,
    /// Instance identifier passed through to outbound requests.
    pub instance_id: String,
    /// How long a registered request may stay pending before it times out.
    pub request_timeout: Duration,
    /// Logical channel to send outbound requests on. `None` means the
    /// session layer has not attached a channel yet; downloads fail
    /// synchronously until it does.
    pub channel_name: Option<String>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            width: 2048,
            height: 2048,
            tile_size: 256,
            tile_overlap: 0,
            min_level: 0,
            max_level: 6,
            instance_id: "default_instance_id".to_string(),
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            channel_name: None,
        }
    }
}

impl SourceConfig {
    /// Normalize a descriptor into a complete configuration.
    ///
    /// Missing fields take their defaults; fields already set on `self`
    /// act as the fallback, so a source constructed with a channel name
    /// keeps it unless the descriptor overrides it.
    pub fn normalized(&self, descriptor: &SourceDescriptor) -> SourceConfig {
        SourceConfig {
            width: descriptor.width.unwrap_or(self.width),
            height: descriptor.height.unwrap_or(self.height),
            tile_size: descriptor.tile_size.unwrap_or(self.tile_size),
            tile_overlap: descriptor.tile_overlap.unwrap_or(self.tile_overlap),
            min_level: descriptor.min_level.unwrap_or(self.min_level),
            max_level: descriptor.max_level.unwrap_or(self.max_level),
            instance_id: descriptor
                .instance_id
                .clone()
                .unwrap_or_else(|| self.instance_id.clone()),
            request_timeout: descriptor
                .request_timeout
                .map(Duration::from_millis)
                .unwrap_or(self.request_timeout),
            channel_name: descriptor
                .channel_name
                .clone()
                .or_else(|| self.channel_name.clone()),
        }
    }
}
