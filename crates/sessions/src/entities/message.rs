use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum accepted message body length
pub const MAX_BODY_LENGTH: usize = 2000;

/// One message within a room.
///
/// Messages are never mutated after creation except for the read flag, and
/// never deleted locally. Display order within a room is transport receipt
/// order; the timestamp is for rendering and grouping only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Identifier, unique within the owning room
    pub id: String,
    /// Owning room identifier
    pub room_id: String,
    /// Sender user identifier
    pub sender_id: String,
    /// Sender display name, denormalized for rendering
    pub sender_name: String,
    /// Body text
    pub body: String,
    /// Sent timestamp
    pub sent_at: DateTime<Utc>,
    /// Whether the current user has read this message
    #[serde(default)]
    pub read: bool,
    /// System messages are rendered but never counted as unread
    #[serde(default)]
    pub is_system: bool,
}

impl Message {
    /// Create a new user message
    pub fn new(
        room_id: impl Into<String>,
        sender_id: impl Into<String>,
        sender_name: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            room_id: room_id.into(),
            sender_id: sender_id.into(),
            sender_name: sender_name.into(),
            body: body.into(),
            sent_at: Utc::now(),
            read: false,
            is_system: false,
        }
    }

    /// Create a system message (status banners, join/leave notices)
    pub fn system(room_id: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            room_id: room_id.into(),
            sender_id: "system".to_string(),
            sender_name: "system".to_string(),
            body: body.into(),
            sent_at: Utc::now(),
            read: true,
            is_system: true,
        }
    }

    /// Whether this message counts toward the unread total for `user_id`
    pub fn is_unread_for(&self, user_id: &str) -> bool {
        !self.read && !self.is_system && self.sender_id != user_id
    }

    /// Validate a message body before it is published
    pub fn validate_body(body: &str) -> Result<(), String> {
        if body.trim().is_empty() {
            return Err("Message body cannot be empty".to_string());
        }

        if body.chars().count() > MAX_BODY_LENGTH {
            return Err(format!(
                "Message body too long (max {MAX_BODY_LENGTH} characters)"
            ));
        }

        Ok(())
    }
}
