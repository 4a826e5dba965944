//! Error types for the transport layer.

use thiserror::Error;

/// Result type alias for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// Main error type for the transport layer
#[derive(Debug, Error)]
pub enum TransportError {
    /// The connection handshake could not complete within the bounded
    /// fixed-delay retry policy.
    #[error("transport unavailable: {reason}")]
    Unavailable { reason: String },

    /// An operation was attempted while no connection exists. Callers must
    /// surface this to the user; outbound sends are not queued for replay.
    #[error("not connected")]
    NotConnected,

    /// The socket rejected or failed an outbound frame.
    #[error("send failed: {reason}")]
    SendFailed { reason: String },

    /// An outbound frame could not be encoded.
    #[error("frame encoding error: {0}")]
    Encode(#[from] serde_json::Error),
}

impl TransportError {
    /// Create an unavailable error
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }

    /// Create a send failure error
    pub fn send_failed(reason: impl Into<String>) -> Self {
        Self::SendFailed {
            reason: reason.into(),
        }
    }
}
