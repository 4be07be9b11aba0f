//! Wire format for channel tile requests and responses.
//!
//! The channel is a raw message pipe; these types define the JSON envelopes
//! exchanged over it and the correlation-key scheme that ties an inbound
//! response back to the pending request that caused it.
//!
//! The remote side does not echo the local opaque request id. It echoes a
//! *logical* key derived from the request parameters
//! (`"GetTile <level> <x> <y>"`), so matching recomputes that key per
//! pending entry rather than looking anything up by id. Field spellings on
//! the inbound envelope (including `resposeData`) are the remote contract
//! and are preserved verbatim.

use crate::coord::TileCoord;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// The single RPC method the channel understands.
pub const METHOD_GET_TILE: &str = "GetTile";

/// HTTP-style status code the remote uses for success.
pub const STATUS_OK: i64 = 200;

/// Derive the correlation key the remote will echo for a tile request.
///
/// This is the key [`crate::correlator::RequestCorrelator::match_response`]
/// recomputes for every pending entry when a response arrives.
pub fn correlation_key(method: &str, coord: &TileCoord) -> String {
    format!("{} {} {} {}", method, coord.level, coord.x, coord.y)
}

/// Outbound request envelope sent to the transport.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RequestEnvelope {
    #[serde(rename = "RequestId")]
    pub request_id: String,
    #[serde(rename = "Method")]
    pub method: String,
    #[serde(rename = "Params")]
    pub params: RequestParams,
}

/// Tile request parameters carried inside [`RequestEnvelope`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RequestParams {
    /// Instance identifier of the slide/image being served.
    #[serde(rename = "IdNo")]
    pub id_no: String,
    #[serde(rename = "Level")]
    pub level: u32,
    #[serde(rename = "X")]
    pub x: u32,
    #[serde(rename = "Y")]
    pub y: u32,
    /// Color-correction digest; empty when no correction is applied.
    #[serde(rename = "ColorMd5")]
    pub color_md5: String,
}

impl RequestEnvelope {
    /// Build a `GetTile` request for the given coordinate.
    pub fn get_tile(request_id: String, instance_id: &str, coord: &TileCoord) -> Self {
        Self {
            request_id,
            method: METHOD_GET_TILE.to_string(),
            params: RequestParams {
                id_no: instance_id.to_string(),
                level: coord.level,
                x: coord.x,
                y: coord.y,
                color_md5: String::new(),
            },
        }
    }
}

/// Inbound response envelope, consumed at most once.
///
/// `request_id` carries the *correlation key* (see [`correlation_key`]),
/// not the opaque id generated locally at registration time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ResponseEnvelope {
    #[serde(rename = "requestId")]
    pub request_id: String,
    #[serde(rename = "responseCode")]
    pub response_code: i64,
    /// Base64-encoded tile payload. Spelling is the remote contract.
    #[serde(rename = "resposeData", skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
    /// When present the payload must be fetched out of band first.
    #[serde(rename = "sliceId", skip_serializing_if = "Option::is_none")]
    pub slice_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Top-level wrapper around every inbound channel message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResponseMessage {
    pub data: ResponseEnvelope,
}

/// Generator for locally-unique opaque request ids.
///
/// Ids are a monotonic-counter + timestamp composite (`req_<seq>_<millis>`),
/// unique within a process lifetime even when the clock returns the same
/// millisecond twice.
#[derive(Debug, Default)]
pub struct RequestIdGenerator {
    counter: AtomicU64,
}

impl RequestIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Produce the next request id.
    pub fn next_id(&self) -> String {
        let seq = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        let millis = chrono::Utc::now().timestamp_millis();
        format!("req_{}_{}", seq, millis)
    }
}
