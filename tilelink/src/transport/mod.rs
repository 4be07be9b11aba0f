//! Channel transport abstraction for testability
//!
//! The session layer that actually owns the data channel lives outside this
//! crate. All the tile source needs from it is a `send(channel, payload)`
//! primitive; inbound delivery arrives through
//! [`crate::source::ChannelTileSource::handle_message`].

use thiserror::Error;

/// Errors that can occur when sending on the channel.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The channel rejected the payload or is no longer open.
    #[error("Channel send failed: {0}")]
    SendFailed(String),
}

/// Trait for the outbound half of the message channel.
///
/// This abstraction allows for dependency injection and easier testing
/// by enabling mock transports in tests.
pub trait ChannelTransport: Send + Sync {
    /// Sends a serialized request envelope on the named channel.
    ///
    /// # Arguments
    ///
    /// * `channel` - Logical channel name the session layer multiplexes on
    /// * `payload` - JSON-encoded request envelope
    ///
    /// # Returns
    ///
    /// `Ok(())` once the message has been handed to the channel, or an error
    /// if the channel rejected it. Delivery is not acknowledged; responses
    /// arrive asynchronously and unordered.
    fn send(&self, channel: &str, payload: &str) -> Result<(), TransportError>;
}
