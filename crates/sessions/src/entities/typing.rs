use std::time::{Duration, Instant};

/// Ephemeral per-room, per-sender typing marker.
///
/// Not persisted and not serialized; a newer indicator from the same sender
/// overwrites the previous one, and expired indicators are pruned on read.
#[derive(Debug, Clone)]
pub struct TypingIndicator {
    pub room_id: String,
    pub sender_id: String,
    pub seen_at: Instant,
}

impl TypingIndicator {
    pub fn new(room_id: impl Into<String>, sender_id: impl Into<String>) -> Self {
        Self {
            room_id: room_id.into(),
            sender_id: sender_id.into(),
            seen_at: Instant::now(),
        }
    }

    /// Whether the indicator has outlived its validity window
    pub fn is_expired(&self, ttl: Duration) -> bool {
        self.seen_at.elapsed() >= ttl
    }
}
