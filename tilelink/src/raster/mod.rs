//! Tile payload materialization.
//!
//! Converts the base64 payload carried by a matched response into a
//! displayable raster. Decode failures are a distinct failure class from
//! remote errors: the remote answered successfully, the bytes just could
//! not be turned into an image.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use image::DynamicImage;
use thiserror::Error;

/// Errors that can occur while materializing a tile payload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RasterError {
    /// Payload was not valid base64.
    #[error("Invalid base64 payload: {0}")]
    InvalidBase64(String),
    /// Decoded bytes were not a recognizable image.
    #[error("Failed to decode tile image: {0}")]
    InvalidImage(String),
}

/// Strip a recognized `data:<mime>;base64,` prefix, if present.
///
/// Payloads arrive either as a bare base64 blob or as a full data URI;
/// both normalize to the bare blob.
fn normalize_payload(payload: &str) -> &str {
    if let Some(rest) = payload.strip_prefix("data:") {
        match rest.split_once("base64,") {
            Some((_, blob)) => blob,
            None => payload,
        }
    } else {
        payload
    }
}

/// Decode a base64 tile payload into a raster.
///
/// Exactly one outcome: the decoded image or a [`RasterError`]. Callers on
/// the async path should run this through `tokio::task::spawn_blocking`;
/// decoding a full tile is CPU work.
pub fn decode_payload(payload: &str) -> Result<DynamicImage, RasterError> {
    let blob = normalize_payload(payload);
    let bytes = BASE64
        .decode(blob.trim())
        .map_err(|e| RasterError::InvalidBase64(e.to_string()))?;
    image::load_from_memory(&bytes).map_err(|e| RasterError::InvalidImage(e.to_string()))
}
