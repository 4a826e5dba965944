//! Room directory and consultation queue.
//!
//! The directory caches the rooms visible to the current user and keeps the
//! cache fresh three ways: full re-pull on mount, manual refresh, and
//! incremental status-change frames, so a support queue reflects acceptances
//! by other agents without a re-fetch.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info};

use careline_transport::SubscriptionManager;

use crate::api::RoomApi;
use crate::entities::{ConsultationTopic, Room, RoomStatus, UserRef};
use crate::types::{SessionError, SessionResult};

pub struct RoomDirectory {
    api: Arc<dyn RoomApi>,
    subscriptions: Arc<SubscriptionManager>,
    rooms: RwLock<HashMap<String, Room>>,
}

impl RoomDirectory {
    pub fn new(api: Arc<dyn RoomApi>, subscriptions: Arc<SubscriptionManager>) -> Self {
        Self {
            api,
            subscriptions,
            rooms: RwLock::new(HashMap::new()),
        }
    }

    /// Re-pull the rooms the user participates in and merge them into the
    /// local cache.
    pub async fn list_my_rooms(&self, user: &UserRef) -> SessionResult<Vec<Room>> {
        let fetched = self.api.list_my_rooms(&user.id).await?;
        let merged = self.merge_all(fetched).await;

        Ok(merged
            .into_iter()
            .filter(|room| room.is_participant(&user.id))
            .collect())
    }

    /// The full consultation queue, ordered by creation time ascending so
    /// the longest-waiting request is first. Agent-only.
    pub async fn consultation_queue(&self, user: &UserRef) -> SessionResult<Vec<Room>> {
        if !user.is_agent() {
            return Err(SessionError::access_denied(
                "the consultation queue is an agent surface",
            ));
        }

        let fetched = self.api.list_all_rooms().await?;
        let mut merged = self.merge_all(fetched).await;
        merged.sort_by_key(|room| room.created_at);
        Ok(merged)
    }

    /// Request room creation and subscribe immediately: a newly created room
    /// must be live before the creator can send into it.
    pub async fn create_room(
        &self,
        user: &UserRef,
        name: &str,
        participant_ids: &[String],
        topic: Option<ConsultationTopic>,
    ) -> SessionResult<Room> {
        if name.trim().is_empty() {
            return Err(SessionError::validation("room name cannot be empty"));
        }

        let room = self
            .api
            .create_room(name, &user.id, participant_ids, topic)
            .await?;

        self.rooms
            .write()
            .await
            .insert(room.id.clone(), room.clone());
        self.subscriptions.ensure_subscribed(&room.id).await?;

        info!(room_id = %room.id, "room created and subscribed");
        Ok(room)
    }

    /// Compare-and-transition a `Pending` room to `InProgress`.
    ///
    /// The local precondition check catches conflicts the cache already
    /// knows about; the remote service performs the authoritative check so
    /// two agents can never double-accept the same request.
    pub async fn accept_pending(&self, user: &UserRef, room_id: &str) -> SessionResult<Room> {
        if let Some(room) = self.get(room_id).await {
            match room.status {
                RoomStatus::InProgress => return Err(SessionError::already_active(room_id)),
                RoomStatus::Closed => return Err(SessionError::already_closed(room_id)),
                RoomStatus::Pending => {}
            }
        }

        let room = self.api.accept_pending(room_id, &user.id).await?;
        let room = self.merge_room(room).await;
        info!(room_id, agent_id = %user.id, "consultation accepted");
        Ok(room)
    }

    /// Request transition to `Closed`. The cache is updated only after the
    /// remote service acknowledges; closing is never committed optimistically.
    pub async fn close(&self, room_id: &str) -> SessionResult<Room> {
        let room = self.api.close_room(room_id).await?;
        let room = self.merge_room(room).await;
        info!(room_id, "room closed");
        Ok(room)
    }

    /// Incremental update from an inbound status-change frame. Unknown rooms
    /// are ignored; they will appear on the next refresh.
    pub async fn apply_status_frame(&self, room_id: &str, status: RoomStatus) -> bool {
        let mut rooms = self.rooms.write().await;
        match rooms.get_mut(room_id) {
            Some(room) => {
                let changed = room.apply_status(status);
                if changed {
                    debug!(room_id, ?status, "room status updated from frame");
                }
                changed
            }
            None => false,
        }
    }

    /// Cached room by id
    pub async fn get(&self, room_id: &str) -> Option<Room> {
        self.rooms.read().await.get(room_id).cloned()
    }

    /// Merge one fetched room into the cache, never regressing a status the
    /// cache has already seen advance.
    async fn merge_room(&self, mut room: Room) -> Room {
        let mut rooms = self.rooms.write().await;
        if let Some(existing) = rooms.get(&room.id) {
            room.status = room.status.most_advanced(existing.status);
        }
        rooms.insert(room.id.clone(), room.clone());
        room
    }

    async fn merge_all(&self, fetched: Vec<Room>) -> Vec<Room> {
        let mut merged = Vec::with_capacity(fetched.len());
        for room in fetched {
            merged.push(self.merge_room(room).await);
        }
        merged
    }
}
