//! Failure taxonomy for tile requests.

use crate::coord::CoordError;
use crate::raster::RasterError;
use crate::transport::TransportError;
use thiserror::Error;

/// Everything that can go wrong with a single tile request.
///
/// All per-request failures surface through that request's sink; nothing in
/// response or timeout handling throws past the event loop. The
/// [`UnmatchedResponse`](SourceError::UnmatchedResponse) variant never fails
/// a sink — it only reaches the observer, distinguishing duplicate, late, or
/// already-aborted responses from real errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    /// No active channel/session at request time. Synchronous, never timed out.
    #[error("Transport or channel name not available")]
    TransportUnavailable,

    /// Malformed tile identifier. Synchronous, never timed out.
    #[error("Invalid tile identifier: {0}")]
    InvalidCoordinate(String),

    /// The transport rejected the send; the registry entry was rolled back.
    #[error("Send failed: {0}")]
    SendFailure(String),

    /// No matching response arrived within the configured window.
    #[error("Request timeout: {0}")]
    Timeout(String),

    /// Matched response carried a non-success status.
    #[error("Remote error ({code}): {message}")]
    RemoteError { code: i64, message: String },

    /// Payload could not be turned into a raster.
    #[error("Decode failed: {0}")]
    Decode(String),

    /// The request was explicitly cancelled.
    #[error("Request cancelled")]
    Cancelled,

    /// A response envelope matched no pending entry. Observer-only.
    #[error("Unknown response: {0}")]
    UnmatchedResponse(String),
}

impl From<CoordError> for SourceError {
    fn from(err: CoordError) -> Self {
        SourceError::InvalidCoordinate(err.to_string())
    }
}

impl From<TransportError> for SourceError {
    fn from(err: TransportError) -> Self {
        SourceError::SendFailure(err.to_string())
    }
}

impl From<RasterError> for SourceError {
    fn from(err: RasterError) -> Self {
        SourceError::Decode(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_display_names_request() {
        let err = SourceError::Timeout("req_3_99".to_string());
        assert_eq!(err.to_string(), "Request timeout: req_3_99");
    }

    #[test]
    fn test_remote_error_display() {
        let err = SourceError::RemoteError {
            code: 404,
            message: "tile not found".to_string(),
        };
        assert_eq!(err.to_string(), "Remote error (404): tile not found");
    }

    #[test]
    fn test_from_coord_error() {
        let err: SourceError =
            CoordError::InvalidIdentifier("bogus".to_string()).into();
        assert!(matches!(err, SourceError::InvalidCoordinate(_)));
    }

    #[test]
    fn test_from_transport_error() {
        let err: SourceError = TransportError::SendFailed("closed".to_string()).into();
        assert!(matches!(err, SourceError::SendFailure(_)));
    }

    #[test]
    fn test_from_raster_error() {
        let err: SourceError = RasterError::InvalidImage("truncated".to_string()).into();
        assert!(matches!(err, SourceError::Decode(_)));
    }
}
