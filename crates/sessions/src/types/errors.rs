//! Error types for the session core.

use thiserror::Error;

use careline_transport::TransportError;

/// Result type alias for session operations
pub type SessionResult<T> = Result<T, SessionError>;

/// Main error type for the session core.
///
/// Propagation policy: transport failures are retried internally up to the
/// bounded fixed-delay policy; room-action conflicts are surfaced to the
/// acting user and never retried automatically; malformed inbound frames are
/// logged and dropped, never raised.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("transport unavailable: {reason}")]
    TransportUnavailable { reason: String },

    #[error("not connected")]
    NotConnected,

    #[error("history unavailable for room {room_id}: {reason}")]
    HistoryUnavailable { room_id: String, reason: String },

    #[error("room {id} was already accepted by another agent")]
    AlreadyActive { id: String },

    #[error("room {id} is already closed")]
    AlreadyClosed { id: String },

    #[error("room {id} is closed and no longer accepts messages")]
    RoomClosed { id: String },

    #[error("room not found: {id}")]
    RoomNotFound { id: String },

    #[error("access denied: {reason}")]
    AccessDenied { reason: String },

    #[error("validation error: {message}")]
    Validation { message: String },

    #[error("api error: {message}")]
    Api { message: String },

    #[error("frame error: {0}")]
    Frame(#[from] serde_json::Error),
}

impl SessionError {
    /// Create a history unavailable error
    pub fn history_unavailable(room_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::HistoryUnavailable {
            room_id: room_id.into(),
            reason: reason.into(),
        }
    }

    /// Create an already-active conflict
    pub fn already_active(id: impl Into<String>) -> Self {
        Self::AlreadyActive { id: id.into() }
    }

    /// Create an already-closed conflict
    pub fn already_closed(id: impl Into<String>) -> Self {
        Self::AlreadyClosed { id: id.into() }
    }

    /// Create a closed-room rejection
    pub fn room_closed(id: impl Into<String>) -> Self {
        Self::RoomClosed { id: id.into() }
    }

    /// Create a not found error for rooms
    pub fn room_not_found(id: impl Into<String>) -> Self {
        Self::RoomNotFound { id: id.into() }
    }

    /// Create an access denied error
    pub fn access_denied(reason: impl Into<String>) -> Self {
        Self::AccessDenied {
            reason: reason.into(),
        }
    }

    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create an api error
    pub fn api(message: impl Into<String>) -> Self {
        Self::Api {
            message: message.into(),
        }
    }
}

impl From<TransportError> for SessionError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::NotConnected => Self::NotConnected,
            TransportError::Unavailable { reason } => Self::TransportUnavailable { reason },
            TransportError::SendFailed { reason } => Self::Api {
                message: format!("send failed: {reason}"),
            },
            TransportError::Encode(e) => Self::Frame(e),
        }
    }
}

impl From<reqwest::Error> for SessionError {
    fn from(err: reqwest::Error) -> Self {
        Self::Api {
            message: err.to_string(),
        }
    }
}
