//! Inbound frame routing and outbound intent serialization.
//!
//! The dispatcher is the only component that talks to the transport
//! directly; rooms hand it validated intents, and inbound frames fan out
//! from here by the room id carried in the frame. A frame for a room the
//! client never opened is dropped with a warning, never raised as an error:
//! a mis-routed or late frame must not crash the session.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use careline_transport::{RawFrame, Transport};

use crate::entities::UserRef;
use crate::services::directory::RoomDirectory;
use crate::services::notifier::NotificationBridge;
use crate::services::room_session::RoomSession;
use crate::types::{ClientFrame, ServerFrame, SessionError, SessionResult};

pub struct MessageDispatcher {
    transport: Arc<dyn Transport>,
    directory: Arc<RoomDirectory>,
    bridge: Arc<NotificationBridge>,
    current_user: UserRef,
    sessions: RwLock<HashMap<String, Arc<RoomSession>>>,
}

impl MessageDispatcher {
    pub fn new(
        transport: Arc<dyn Transport>,
        directory: Arc<RoomDirectory>,
        bridge: Arc<NotificationBridge>,
        current_user: UserRef,
    ) -> Self {
        Self {
            transport,
            directory,
            bridge,
            current_user,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Make a room session routable
    pub async fn register_session(&self, session: Arc<RoomSession>) {
        self.sessions
            .write()
            .await
            .insert(session.room_id().to_string(), session);
    }

    /// Stop routing to a room session
    pub async fn remove_session(&self, room_id: &str) -> Option<Arc<RoomSession>> {
        self.sessions.write().await.remove(room_id)
    }

    /// Drop every registered session. Used on logout so the next login opens
    /// fresh sessions with a fresh history fetch instead of stale state.
    pub async fn clear_sessions(&self) {
        self.sessions.write().await.clear();
    }

    /// Registered session for a room
    pub async fn session(&self, room_id: &str) -> Option<Arc<RoomSession>> {
        self.sessions.read().await.get(room_id).cloned()
    }

    /// Consume inbound frames until the transport goes away
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        let mut frames = self.transport.frames();
        tokio::spawn(async move {
            loop {
                match frames.recv().await {
                    Ok(raw) => self.handle_raw_frame(raw).await,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "frame receiver lagged, frames skipped");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Decode and route one inbound frame
    pub async fn handle_raw_frame(&self, raw: RawFrame) {
        let frame: ServerFrame = match serde_json::from_value(raw.payload) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(topic = %raw.topic, error = %e, "dropping undecodable frame");
                return;
            }
        };

        debug!(
            room_id = %frame.room_id(),
            frame_type = frame.frame_type_name(),
            "inbound frame"
        );

        match frame {
            ServerFrame::Message { message } => {
                let Some(session) = self.session(&message.room_id).await else {
                    warn!(room_id = %message.room_id, "frame for unknown room dropped");
                    return;
                };

                if session.append_message(message.clone()).await {
                    self.bridge.on_message(&message).await;
                    self.bridge.publish_unread(self.unread_count().await);
                }
            }
            ServerFrame::StatusChanged { room_id, status } => {
                // Status frames update the directory even when no session is
                // open, so the consultation queue tracks other agents'
                // acceptances without a re-fetch.
                self.directory.apply_status_frame(&room_id, status).await;
                if let Some(session) = self.session(&room_id).await {
                    session.apply_status(status).await;
                }
            }
            ServerFrame::Typing { room_id, sender_id } => {
                let Some(session) = self.session(&room_id).await else {
                    debug!(room_id = %room_id, "typing frame for unknown room dropped");
                    return;
                };
                session.note_typing(&sender_id).await;
            }
        }
    }

    /// Publish a message into a room after the session validates it.
    ///
    /// There is no optimistic append and no outbound queueing: while
    /// disconnected the send is rejected with `NotConnected` for the caller
    /// to surface.
    pub async fn send_message(&self, room_id: &str, body: &str) -> SessionResult<()> {
        let session = self
            .session(room_id)
            .await
            .ok_or_else(|| SessionError::room_not_found(room_id))?;
        session.validate_send(body).await?;

        if !self.transport.state().is_connected() {
            return Err(SessionError::NotConnected);
        }

        let frame = ClientFrame::SendMessage {
            room_id: room_id.to_string(),
            sender_id: self.current_user.id.clone(),
            sender_name: self.current_user.name.clone(),
            body: body.to_string(),
        };
        let destination = frame.destination();
        let payload = serde_json::to_value(&frame)?;

        self.transport.publish(&destination, payload).await?;
        Ok(())
    }

    /// Publish a typing signal. Best-effort: failures are logged, not
    /// surfaced, since the indicator expires on its own anyway.
    pub async fn send_typing(&self, room_id: &str) {
        if !self.transport.state().is_connected() {
            return;
        }

        let frame = ClientFrame::Typing {
            room_id: room_id.to_string(),
            sender_id: self.current_user.id.clone(),
        };
        let destination = frame.destination();

        match serde_json::to_value(&frame) {
            Ok(payload) => {
                if let Err(e) = self.transport.publish(&destination, payload).await {
                    debug!(room_id, error = %e, "typing signal not sent");
                }
            }
            Err(e) => debug!(room_id, error = %e, "typing signal not encoded"),
        }
    }

    /// Unread total across every open room, derived from message read flags
    pub async fn unread_count(&self) -> usize {
        let sessions = self.sessions.read().await;
        let mut total = 0;
        for session in sessions.values() {
            total += session.unread_count().await;
        }
        total
    }

    /// Mark a message read and push the freshly derived badge total
    pub async fn mark_read(&self, room_id: &str, message_id: &str) -> SessionResult<()> {
        let session = self
            .session(room_id)
            .await
            .ok_or_else(|| SessionError::room_not_found(room_id))?;

        session.mark_read(message_id).await?;
        self.bridge.publish_unread(self.unread_count().await);
        Ok(())
    }
}
