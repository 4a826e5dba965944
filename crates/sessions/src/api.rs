//! REST collaborator for rooms, history, and read receipts.
//!
//! Everything non-real-time goes through this seam: the remote service owns
//! message persistence and room records, the core only caches what it is
//! told. `HttpRoomApi` is the production implementation; tests substitute a
//! scripted fake.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use careline_config::RestConfig;

use crate::entities::{ConsultationTopic, Message, Room};
use crate::types::{SessionError, SessionResult};

#[async_trait]
pub trait RoomApi: Send + Sync {
    /// Rooms the user participates in
    async fn list_my_rooms(&self, user_id: &str) -> SessionResult<Vec<Room>>;

    /// The full consultation queue (agent-only surface)
    async fn list_all_rooms(&self) -> SessionResult<Vec<Room>>;

    /// Request creation of a new room
    async fn create_room(
        &self,
        name: &str,
        created_by: &str,
        participant_ids: &[String],
        topic: Option<ConsultationTopic>,
    ) -> SessionResult<Room>;

    /// Compare-and-transition a `Pending` room to `InProgress`. Conflicts
    /// surface as `AlreadyActive` / `AlreadyClosed`.
    async fn accept_pending(&self, room_id: &str, agent_id: &str) -> SessionResult<Room>;

    /// Request transition to `Closed`
    async fn close_room(&self, room_id: &str) -> SessionResult<Room>;

    /// Message history, ordered oldest to newest
    async fn fetch_history(&self, room_id: &str, limit: u32) -> SessionResult<Vec<Message>>;

    /// Record a read receipt
    async fn mark_read(&self, room_id: &str, message_id: &str) -> SessionResult<()>;
}

#[derive(Debug, Serialize)]
struct CreateRoomBody<'a> {
    name: &'a str,
    created_by: &'a str,
    participant_ids: &'a [String],
    topic: Option<ConsultationTopic>,
}

#[derive(Debug, Serialize)]
struct AcceptBody<'a> {
    agent_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct ConflictBody {
    error: String,
}

/// Production `RoomApi` over HTTP
pub struct HttpRoomApi {
    client: reqwest::Client,
    base_url: String,
}

impl HttpRoomApi {
    pub fn new(config: &RestConfig) -> SessionResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Map a room-action conflict response onto the session error taxonomy.
    async fn conflict_error(room_id: &str, response: reqwest::Response) -> SessionError {
        match response.json::<ConflictBody>().await {
            Ok(body) if body.error == "already_closed" => SessionError::already_closed(room_id),
            Ok(_) => SessionError::already_active(room_id),
            Err(e) => SessionError::api(format!("unreadable conflict response: {e}")),
        }
    }

    async fn expect_room(room_id: &str, response: reqwest::Response) -> SessionResult<Room> {
        if response.status() == reqwest::StatusCode::CONFLICT {
            return Err(Self::conflict_error(room_id, response).await);
        }
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(SessionError::room_not_found(room_id));
        }

        let response = response.error_for_status()?;
        Ok(response.json::<Room>().await?)
    }
}

#[async_trait]
impl RoomApi for HttpRoomApi {
    async fn list_my_rooms(&self, user_id: &str) -> SessionResult<Vec<Room>> {
        let response = self
            .client
            .get(self.url("/rooms"))
            .query(&[("user_id", user_id)])
            .send()
            .await?
            .error_for_status()?;

        Ok(response.json().await?)
    }

    async fn list_all_rooms(&self) -> SessionResult<Vec<Room>> {
        let response = self
            .client
            .get(self.url("/rooms/all"))
            .send()
            .await?
            .error_for_status()?;

        Ok(response.json().await?)
    }

    async fn create_room(
        &self,
        name: &str,
        created_by: &str,
        participant_ids: &[String],
        topic: Option<ConsultationTopic>,
    ) -> SessionResult<Room> {
        let body = CreateRoomBody {
            name,
            created_by,
            participant_ids,
            topic,
        };

        let response = self
            .client
            .post(self.url("/rooms"))
            .json(&body)
            .send()
            .await?
            .error_for_status()?;

        let room: Room = response.json().await?;
        debug!(room_id = %room.id, "room created");
        Ok(room)
    }

    async fn accept_pending(&self, room_id: &str, agent_id: &str) -> SessionResult<Room> {
        let response = self
            .client
            .post(self.url(&format!("/rooms/{room_id}/accept")))
            .json(&AcceptBody { agent_id })
            .send()
            .await?;

        Self::expect_room(room_id, response).await
    }

    async fn close_room(&self, room_id: &str) -> SessionResult<Room> {
        let response = self
            .client
            .post(self.url(&format!("/rooms/{room_id}/close")))
            .send()
            .await?;

        Self::expect_room(room_id, response).await
    }

    async fn fetch_history(&self, room_id: &str, limit: u32) -> SessionResult<Vec<Message>> {
        let response = self
            .client
            .get(self.url(&format!("/rooms/{room_id}/messages")))
            .query(&[("limit", limit.to_string())])
            .send()
            .await?
            .error_for_status()?;

        Ok(response.json().await?)
    }

    async fn mark_read(&self, room_id: &str, message_id: &str) -> SessionResult<()> {
        self.client
            .post(self.url(&format!("/rooms/{room_id}/messages/{message_id}/read")))
            .send()
            .await?
            .error_for_status()?;

        Ok(())
    }
}
