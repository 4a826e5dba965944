//! Frame types for real-time chat updates.

use serde::{Deserialize, Serialize};

use crate::entities::{Message, RoomStatus};

/// Frames received from the messaging endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// A message was delivered to a room
    Message { message: Message },

    /// A room transitioned status (accepted by an agent, closed)
    StatusChanged {
        room_id: String,
        status: RoomStatus,
    },

    /// A participant is typing
    Typing {
        room_id: String,
        sender_id: String,
    },
}

impl ServerFrame {
    /// Get the room ID this frame routes to
    pub fn room_id(&self) -> &str {
        match self {
            ServerFrame::Message { message } => &message.room_id,
            ServerFrame::StatusChanged { room_id, .. } => room_id,
            ServerFrame::Typing { room_id, .. } => room_id,
        }
    }

    /// Get frame type name for logging
    pub fn frame_type_name(&self) -> &'static str {
        match self {
            ServerFrame::Message { .. } => "message",
            ServerFrame::StatusChanged { .. } => "status_changed",
            ServerFrame::Typing { .. } => "typing",
        }
    }
}

/// Outbound intents published by the client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Send a message into a room
    SendMessage {
        room_id: String,
        sender_id: String,
        sender_name: String,
        body: String,
    },

    /// Typing signal
    Typing {
        room_id: String,
        sender_id: String,
    },
}

impl ClientFrame {
    /// Publish destination for this intent
    pub fn destination(&self) -> String {
        match self {
            ClientFrame::SendMessage { room_id, .. } => format!("/app/chat/{room_id}/send"),
            ClientFrame::Typing { room_id, .. } => format!("/app/chat/{room_id}/typing"),
        }
    }
}
