//! Per-room runtime state.
//!
//! One `RoomSession` is the authoritative client-side view of a room's
//! conversation, shared by whichever surface currently renders it. Messages
//! are appended in transport receipt order and never reordered by timestamp;
//! there is no optimistic local echo, the inbound confirmation is what
//! appends to history, so the list never diverges from the server's view.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use careline_config::SessionConfig;
use careline_transport::SubscriptionManager;

use crate::api::RoomApi;
use crate::entities::{Message, RoomStatus, TypingIndicator, UserRef};
use crate::services::directory::RoomDirectory;
use crate::types::{SessionError, SessionResult};

/// Lifecycle of a room session.
///
/// `Loading` while history is being fetched, then `Waiting` (room `Pending`,
/// no counterpart yet), `Active` (room `InProgress`), or the terminal
/// `Closed`. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Loading,
    Waiting,
    Active,
    Closed,
}

impl SessionState {
    fn rank(self) -> u8 {
        match self {
            SessionState::Loading => 0,
            SessionState::Waiting => 1,
            SessionState::Active => 2,
            SessionState::Closed => 3,
        }
    }

    fn for_status(status: RoomStatus) -> Self {
        match status {
            RoomStatus::Pending => SessionState::Waiting,
            RoomStatus::InProgress => SessionState::Active,
            RoomStatus::Closed => SessionState::Closed,
        }
    }
}

pub struct RoomSession {
    room_id: String,
    current_user: UserRef,
    api: Arc<dyn RoomApi>,
    directory: Arc<RoomDirectory>,
    subscriptions: Arc<SubscriptionManager>,
    typing_ttl: Duration,
    history_limit: u32,
    state: RwLock<SessionState>,
    messages: RwLock<Vec<Message>>,
    typing: Mutex<HashMap<String, TypingIndicator>>,
    // Bumped on release; a history response from a previous epoch is stale
    // and must not touch local state.
    epoch: AtomicU64,
}

impl RoomSession {
    pub fn new(
        room_id: impl Into<String>,
        current_user: UserRef,
        api: Arc<dyn RoomApi>,
        directory: Arc<RoomDirectory>,
        subscriptions: Arc<SubscriptionManager>,
        config: &SessionConfig,
    ) -> Self {
        Self {
            room_id: room_id.into(),
            current_user,
            api,
            directory,
            subscriptions,
            typing_ttl: Duration::from_secs(config.typing_ttl_seconds),
            history_limit: config.history_page_size,
            state: RwLock::new(SessionState::Loading),
            messages: RwLock::new(Vec::new()),
            typing: Mutex::new(HashMap::new()),
            epoch: AtomicU64::new(0),
        }
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub async fn state(&self) -> SessionState {
        *self.state.read().await
    }

    /// Snapshot of the message list in receipt order
    pub async fn messages(&self) -> Vec<Message> {
        self.messages.read().await.clone()
    }

    /// Subscribe and fetch history.
    ///
    /// The subscription is registered before the history fetch so live
    /// frames arriving during the fetch are not lost. A failed fetch is
    /// reported as `HistoryUnavailable` after the session is otherwise
    /// fully opened; the caller renders a warning and proceeds live-only.
    pub async fn open(&self) -> SessionResult<()> {
        let epoch = self.epoch.load(Ordering::SeqCst);
        self.subscriptions.ensure_subscribed(&self.room_id).await?;

        let history = self.api.fetch_history(&self.room_id, self.history_limit).await;

        if self.epoch.load(Ordering::SeqCst) != epoch {
            debug!(room_id = %self.room_id, "session released during open, discarding history");
            return Ok(());
        }

        if let Some(room) = self.directory.get(&self.room_id).await {
            self.advance_state(SessionState::for_status(room.status)).await;
        } else {
            // Room not cached (opened straight from a notification); assume
            // waiting until a status frame or refresh says otherwise.
            self.advance_state(SessionState::Waiting).await;
        }

        match history {
            Ok(fetched) => {
                self.merge_history(fetched).await;
                Ok(())
            }
            Err(e) => {
                warn!(room_id = %self.room_id, error = %e, "history fetch failed, proceeding live-only");
                Err(SessionError::history_unavailable(
                    &self.room_id,
                    e.to_string(),
                ))
            }
        }
    }

    /// Validate an outbound send against the session lifecycle. The
    /// dispatcher calls this before publishing.
    pub async fn validate_send(&self, body: &str) -> SessionResult<()> {
        if *self.state.read().await == SessionState::Closed {
            return Err(SessionError::room_closed(&self.room_id));
        }

        Message::validate_body(body).map_err(SessionError::validation)
    }

    /// Append an inbound message in receipt order. Duplicate identifiers
    /// within the room are dropped. Returns whether the message was appended.
    pub async fn append_message(&self, message: Message) -> bool {
        let mut messages = self.messages.write().await;
        if messages.iter().any(|m| m.id == message.id) {
            debug!(room_id = %self.room_id, message_id = %message.id, "duplicate message dropped");
            return false;
        }
        messages.push(message);
        true
    }

    /// Drive the state machine from an inbound status frame
    pub async fn apply_status(&self, status: RoomStatus) {
        self.advance_state(SessionState::for_status(status)).await;
    }

    /// Flip the read flag and record the receipt remotely. Idempotent: a
    /// message already read is left alone and no remote call is made.
    pub async fn mark_read(&self, message_id: &str) -> SessionResult<()> {
        {
            let mut messages = self.messages.write().await;
            match messages.iter_mut().find(|m| m.id == message_id) {
                Some(message) if message.read => return Ok(()),
                Some(message) => message.read = true,
                None => {
                    return Err(SessionError::validation(format!(
                        "message {message_id} not in room {}",
                        self.room_id
                    )))
                }
            }
        }

        self.api.mark_read(&self.room_id, message_id).await
    }

    /// Close the room. The local transition to `Closed` happens only after
    /// the remote service acknowledges; closing is a durable fact that must
    /// be server-confirmed.
    pub async fn close(&self) -> SessionResult<()> {
        self.directory.close(&self.room_id).await?;
        self.advance_state(SessionState::Closed).await;
        Ok(())
    }

    /// Drop this consumer's interest in the room. Runs on every unmount
    /// path; it also invalidates any in-flight history fetch so a late
    /// response cannot resurrect the session.
    pub async fn release(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        if let Err(e) = self.subscriptions.release(&self.room_id).await {
            warn!(room_id = %self.room_id, error = %e, "failed to release subscription");
        }
    }

    /// Record a typing signal from another participant
    pub async fn note_typing(&self, sender_id: &str) {
        if sender_id == self.current_user.id {
            return;
        }

        self.typing.lock().await.insert(
            sender_id.to_string(),
            TypingIndicator::new(&self.room_id, sender_id),
        );
    }

    /// Senders currently typing, with expired indicators pruned
    pub async fn typing_senders(&self) -> Vec<String> {
        let mut typing = self.typing.lock().await;
        typing.retain(|_, indicator| !indicator.is_expired(self.typing_ttl));
        typing.keys().cloned().collect()
    }

    /// Messages not yet read by the current user, excluding own and system
    /// messages. Always derived from the message list, never stored.
    pub async fn unread_count(&self) -> usize {
        self.messages
            .read()
            .await
            .iter()
            .filter(|m| m.is_unread_for(&self.current_user.id))
            .count()
    }

    /// Move the state machine forward; regressions (including anything out
    /// of `Closed`) are ignored.
    async fn advance_state(&self, next: SessionState) {
        let mut state = self.state.write().await;
        if next.rank() > state.rank() {
            debug!(room_id = %self.room_id, from = ?*state, to = ?next, "session state advanced");
            *state = next;
        }
    }

    /// Place fetched history before any live messages that raced it,
    /// de-duplicating by message id.
    async fn merge_history(&self, fetched: Vec<Message>) {
        let mut messages = self.messages.write().await;
        let live = std::mem::take(&mut *messages);
        *messages = fetched;
        for message in live {
            if !messages.iter().any(|m| m.id == message.id) {
                messages.push(message);
            }
        }
    }
}
