use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Represents a chat/consultation channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Room {
    /// Room identifier
    pub id: String,
    /// Display name
    pub name: String,
    /// User who requested the conversation
    pub created_by: String,
    /// Participant user identifiers
    pub participant_ids: Vec<String>,
    /// Lifecycle status
    pub status: RoomStatus,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Topic tag for support rooms
    pub topic: Option<ConsultationTopic>,
}

/// Room lifecycle status.
///
/// Transitions are monotonic forward; nothing returns a room from `Closed`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RoomStatus {
    Pending,
    InProgress,
    Closed,
}

impl RoomStatus {
    /// Position in the forward-only lifecycle
    fn rank(self) -> u8 {
        match self {
            RoomStatus::Pending => 0,
            RoomStatus::InProgress => 1,
            RoomStatus::Closed => 2,
        }
    }

    /// Whether moving to `next` is a legal forward transition
    pub fn can_transition_to(self, next: RoomStatus) -> bool {
        next.rank() > self.rank()
    }

    pub fn is_closed(self) -> bool {
        matches!(self, RoomStatus::Closed)
    }

    /// Pick the more advanced of two observed statuses. Used when merging a
    /// re-fetched directory over incremental updates so a stale response
    /// cannot regress a room.
    pub fn most_advanced(self, other: RoomStatus) -> RoomStatus {
        if other.rank() > self.rank() {
            other
        } else {
            self
        }
    }
}

/// Fixed enumeration of support consultation topics
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConsultationTopic {
    ProductInquiry,
    OrderIssue,
    DeliveryTracking,
    Other,
}

impl Room {
    /// Create a new room in the `Pending` state
    pub fn new(
        name: String,
        created_by: String,
        participant_ids: Vec<String>,
        topic: Option<ConsultationTopic>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name,
            created_by,
            participant_ids,
            status: RoomStatus::Pending,
            created_at: Utc::now(),
            topic,
        }
    }

    /// Whether the given user participates in this room
    pub fn is_participant(&self, user_id: &str) -> bool {
        self.created_by == user_id || self.participant_ids.iter().any(|id| id == user_id)
    }

    /// Apply a status change if it is a legal forward transition. Returns
    /// whether the room changed.
    pub fn apply_status(&mut self, next: RoomStatus) -> bool {
        if self.status.can_transition_to(next) {
            self.status = next;
            true
        } else {
            false
        }
    }
}
