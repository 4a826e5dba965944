//! Reference-counted topic subscriptions.
//!
//! Several consumers may watch the same room at once (a queue view plus an
//! open detail view). The manager guarantees the transport sees exactly one
//! subscribe while any consumer holds interest, and exactly one unsubscribe
//! after the last release. Duplicate frame handlers are the bug class this
//! exists to prevent.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::TransportResult;
use crate::ws::Transport;

/// Transport-level topic address for a room
pub fn room_topic(room_id: &str) -> String {
    format!("/topic/chat/{room_id}")
}

/// Keeps the set of live subscriptions consistent with the set of rooms
/// currently of interest.
pub struct SubscriptionManager {
    transport: Arc<dyn Transport>,
    // Lock held across the transport call so idempotency holds under
    // concurrent invocation, not just sequential.
    counts: Mutex<HashMap<String, usize>>,
}

impl SubscriptionManager {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            counts: Mutex::new(HashMap::new()),
        }
    }

    /// Register interest in a room. The transport receives a subscribe call
    /// only when the first consumer arrives; later calls just bump the count.
    pub async fn ensure_subscribed(&self, room_id: &str) -> TransportResult<()> {
        let mut counts = self.counts.lock().await;
        let count = counts.entry(room_id.to_string()).or_insert(0);
        *count += 1;

        if *count == 1 {
            let topic = room_topic(room_id);
            if let Err(e) = self.transport.subscribe(&topic).await {
                counts.remove(room_id);
                return Err(e);
            }
            debug!(room_id, "subscribed");
        }
        Ok(())
    }

    /// Drop one consumer's interest. The transport receives an unsubscribe
    /// call only when the last consumer releases.
    pub async fn release(&self, room_id: &str) -> TransportResult<()> {
        let mut counts = self.counts.lock().await;
        match counts.get_mut(room_id) {
            Some(count) if *count > 1 => {
                *count -= 1;
                Ok(())
            }
            Some(_) => {
                counts.remove(room_id);
                let topic = room_topic(room_id);
                self.transport.unsubscribe(&topic).await?;
                debug!(room_id, "unsubscribed");
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// Release every held subscription, regardless of consumer counts.
    /// Used on logout so no handler survives the session. Unsubscribe
    /// failures are logged per topic; the count map is always cleared so a
    /// later `ensure_subscribed` starts from zero.
    pub async fn release_all(&self) {
        let mut counts = self.counts.lock().await;
        for room_id in counts.keys() {
            if let Err(e) = self.transport.unsubscribe(&room_topic(room_id)).await {
                warn!(room_id, error = %e, "unsubscribe failed during release_all");
            }
        }
        counts.clear();
    }

    /// Whether any consumer currently watches the room
    pub async fn is_subscribed(&self, room_id: &str) -> bool {
        self.counts.lock().await.contains_key(room_id)
    }
}
