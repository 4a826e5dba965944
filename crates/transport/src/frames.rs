//! Wire envelope types carried by the socket.
//!
//! The transport is payload-agnostic: it delivers a topic plus an opaque JSON
//! payload. Decoding the payload into chat events is the dispatcher's job in
//! the sessions crate.

use serde::{Deserialize, Serialize};

/// One inbound unit of data from the socket, addressed by topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawFrame {
    /// Topic the frame was delivered on (`.../chat/{roomId}`)
    pub topic: String,
    /// Opaque payload, decoded downstream
    pub payload: serde_json::Value,
}

/// Control frames the client writes to the socket
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum ControlFrame<'a> {
    Subscribe { topic: &'a str },
    Unsubscribe { topic: &'a str },
    Send {
        destination: &'a str,
        payload: &'a serde_json::Value,
    },
}

/// Connection lifecycle states observed by other components.
///
/// Observers never block on these; they are advisory (offline badges,
/// deciding whether a send should be rejected up front).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}
