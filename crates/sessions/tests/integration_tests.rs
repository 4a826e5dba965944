//! Integration tests for the session core.
//!
//! These drive the directory, sessions, dispatcher, and notification bridge
//! together over an in-memory transport and a scripted REST collaborator.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use tokio::sync::{broadcast, watch, Mutex, Notify};

use careline_config::SessionConfig;
use careline_sessions::{
    ConsultationTopic, Message, MessageDispatcher, NotificationBridge, Notifier, Room, RoomApi,
    RoomDirectory, RoomSession, RoomStatus, ServerFrame, SessionError, SessionState, UserRef,
    UserRole,
};
use careline_transport::{
    ConnectionState, RawFrame, SubscriptionManager, Transport, TransportResult,
};

// ---------------------------------------------------------------------------
// fakes

struct FakeTransport {
    subscribes: Mutex<Vec<String>>,
    unsubscribes: Mutex<Vec<String>>,
    publishes: Mutex<Vec<(String, serde_json::Value)>>,
    state_tx: watch::Sender<ConnectionState>,
    frame_tx: broadcast::Sender<RawFrame>,
}

impl FakeTransport {
    fn new() -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Connected);
        let (frame_tx, _) = broadcast::channel(64);
        Self {
            subscribes: Mutex::new(Vec::new()),
            unsubscribes: Mutex::new(Vec::new()),
            publishes: Mutex::new(Vec::new()),
            state_tx,
            frame_tx,
        }
    }

    fn set_state(&self, state: ConnectionState) {
        // send_replace stores the state even with no receiver alive
        self.state_tx.send_replace(state);
    }

    async fn publish_count(&self) -> usize {
        self.publishes.lock().await.len()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn connect(&self, _user_id: &str) -> TransportResult<()> {
        self.set_state(ConnectionState::Connected);
        Ok(())
    }

    async fn disconnect(&self) {
        self.set_state(ConnectionState::Disconnected);
    }

    async fn publish(&self, destination: &str, payload: serde_json::Value) -> TransportResult<()> {
        self.publishes
            .lock()
            .await
            .push((destination.to_string(), payload));
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> TransportResult<()> {
        self.subscribes.lock().await.push(topic.to_string());
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> TransportResult<()> {
        self.unsubscribes.lock().await.push(topic.to_string());
        Ok(())
    }

    fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    fn frames(&self) -> broadcast::Receiver<RawFrame> {
        self.frame_tx.subscribe()
    }
}

struct FakeRoomApi {
    rooms: Mutex<HashMap<String, Room>>,
    history: Mutex<HashMap<String, Vec<Message>>>,
    fail_history: AtomicBool,
    history_gate: Mutex<Option<Arc<Notify>>>,
    mark_read_calls: AtomicUsize,
}

impl FakeRoomApi {
    fn new() -> Self {
        Self {
            rooms: Mutex::new(HashMap::new()),
            history: Mutex::new(HashMap::new()),
            fail_history: AtomicBool::new(false),
            history_gate: Mutex::new(None),
            mark_read_calls: AtomicUsize::new(0),
        }
    }

    async fn seed_room(&self, room: Room) {
        self.rooms.lock().await.insert(room.id.clone(), room);
    }

    async fn seed_history(&self, room_id: &str, messages: Vec<Message>) {
        self.history
            .lock()
            .await
            .insert(room_id.to_string(), messages);
    }
}

#[async_trait]
impl RoomApi for FakeRoomApi {
    async fn list_my_rooms(&self, user_id: &str) -> Result<Vec<Room>, SessionError> {
        Ok(self
            .rooms
            .lock()
            .await
            .values()
            .filter(|room| room.is_participant(user_id))
            .cloned()
            .collect())
    }

    async fn list_all_rooms(&self) -> Result<Vec<Room>, SessionError> {
        Ok(self.rooms.lock().await.values().cloned().collect())
    }

    async fn create_room(
        &self,
        name: &str,
        created_by: &str,
        participant_ids: &[String],
        topic: Option<ConsultationTopic>,
    ) -> Result<Room, SessionError> {
        let room = Room::new(
            name.to_string(),
            created_by.to_string(),
            participant_ids.to_vec(),
            topic,
        );
        self.rooms.lock().await.insert(room.id.clone(), room.clone());
        Ok(room)
    }

    async fn accept_pending(&self, room_id: &str, _agent_id: &str) -> Result<Room, SessionError> {
        let mut rooms = self.rooms.lock().await;
        let room = rooms
            .get_mut(room_id)
            .ok_or_else(|| SessionError::room_not_found(room_id))?;

        match room.status {
            RoomStatus::Pending => {
                room.status = RoomStatus::InProgress;
                Ok(room.clone())
            }
            RoomStatus::InProgress => Err(SessionError::already_active(room_id)),
            RoomStatus::Closed => Err(SessionError::already_closed(room_id)),
        }
    }

    async fn close_room(&self, room_id: &str) -> Result<Room, SessionError> {
        let mut rooms = self.rooms.lock().await;
        let room = rooms
            .get_mut(room_id)
            .ok_or_else(|| SessionError::room_not_found(room_id))?;

        if room.status.is_closed() {
            return Err(SessionError::already_closed(room_id));
        }
        room.status = RoomStatus::Closed;
        Ok(room.clone())
    }

    async fn fetch_history(&self, room_id: &str, _limit: u32) -> Result<Vec<Message>, SessionError> {
        let gate = self.history_gate.lock().await.clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        if self.fail_history.load(Ordering::SeqCst) {
            return Err(SessionError::api("history service down"));
        }

        Ok(self
            .history
            .lock()
            .await
            .get(room_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn mark_read(&self, _room_id: &str, _message_id: &str) -> Result<(), SessionError> {
        self.mark_read_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct RecordingNotifier {
    notified: AtomicUsize,
    badge: Mutex<Vec<usize>>,
}

impl RecordingNotifier {
    fn new() -> Self {
        Self {
            notified: AtomicUsize::new(0),
            badge: Mutex::new(Vec::new()),
        }
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, _message: &Message) {
        self.notified.fetch_add(1, Ordering::SeqCst);
    }

    fn update_badge(&self, unread: usize) {
        self.badge.try_lock().expect("badge lock").push(unread);
    }
}

// ---------------------------------------------------------------------------
// harness

struct Harness {
    user: UserRef,
    transport: Arc<FakeTransport>,
    api: Arc<FakeRoomApi>,
    subscriptions: Arc<SubscriptionManager>,
    directory: Arc<RoomDirectory>,
    notifier: Arc<RecordingNotifier>,
    bridge: Arc<NotificationBridge>,
    dispatcher: Arc<MessageDispatcher>,
}

impl Harness {
    fn new(user: UserRef) -> Self {
        let transport = Arc::new(FakeTransport::new());
        let api = Arc::new(FakeRoomApi::new());
        let subscriptions = Arc::new(SubscriptionManager::new(transport.clone()));
        let directory = Arc::new(RoomDirectory::new(api.clone(), subscriptions.clone()));
        let notifier = Arc::new(RecordingNotifier::new());
        let bridge = Arc::new(NotificationBridge::new(notifier.clone(), user.id.clone()));
        let dispatcher = Arc::new(MessageDispatcher::new(
            transport.clone(),
            directory.clone(),
            bridge.clone(),
            user.clone(),
        ));

        Self {
            user,
            transport,
            api,
            subscriptions,
            directory,
            notifier,
            bridge,
            dispatcher,
        }
    }

    fn session(&self, room_id: &str) -> Arc<RoomSession> {
        Arc::new(RoomSession::new(
            room_id,
            self.user.clone(),
            self.api.clone(),
            self.directory.clone(),
            self.subscriptions.clone(),
            &SessionConfig::default(),
        ))
    }

    async fn open_registered(&self, room_id: &str) -> Arc<RoomSession> {
        let session = self.session(room_id);
        self.dispatcher.register_session(session.clone()).await;
        session.open().await.expect("open should succeed");
        session
    }

    async fn inject_message(&self, message: Message) {
        let frame = ServerFrame::Message { message };
        self.inject(frame).await;
    }

    async fn inject(&self, frame: ServerFrame) {
        let room_id = frame.room_id().to_string();
        let raw = RawFrame {
            topic: format!("/topic/chat/{room_id}"),
            payload: serde_json::to_value(&frame).unwrap(),
        };
        self.dispatcher.handle_raw_frame(raw).await;
    }
}

fn customer() -> UserRef {
    UserRef::new("user-1", "Dana", UserRole::Customer)
}

fn agent(id: &str) -> UserRef {
    UserRef::new(id, "Sam", UserRole::Agent)
}

fn pending_room(id: &str, created_by: &str) -> Room {
    let mut room = Room::new(
        format!("consultation {id}"),
        created_by.to_string(),
        vec![],
        Some(ConsultationTopic::ProductInquiry),
    );
    room.id = id.to_string();
    room
}

// ---------------------------------------------------------------------------
// scenarios

#[tokio::test]
async fn accept_pending_conflicts_when_another_agent_won() {
    let first = Harness::new(agent("agent-1"));
    first.api.seed_room(pending_room("room-1", "user-1")).await;

    let accepted = first
        .directory
        .accept_pending(&first.user, "room-1")
        .await
        .expect("first accept should win");
    assert_eq!(accepted.status, RoomStatus::InProgress);

    // Second agent shares the remote service but has its own client cache.
    let second_user = agent("agent-2");
    let second_transport = Arc::new(FakeTransport::new());
    let second_subs = Arc::new(SubscriptionManager::new(second_transport));
    let second_directory = RoomDirectory::new(first.api.clone(), second_subs);

    let err = second_directory
        .accept_pending(&second_user, "room-1")
        .await
        .expect_err("second accept must conflict");
    assert!(matches!(err, SessionError::AlreadyActive { .. }));
}

#[tokio::test]
async fn accept_on_closed_room_reports_already_closed() {
    let harness = Harness::new(agent("agent-1"));
    let mut room = pending_room("room-1", "user-1");
    room.status = RoomStatus::Closed;
    harness.api.seed_room(room).await;

    let err = harness
        .directory
        .accept_pending(&harness.user, "room-1")
        .await
        .expect_err("closed room cannot be accepted");
    assert!(matches!(err, SessionError::AlreadyClosed { .. }));
}

#[tokio::test]
async fn send_to_closed_room_is_rejected_and_nothing_published() {
    let harness = Harness::new(customer());
    harness.api.seed_room(pending_room("room-1", "user-1")).await;
    harness.directory.list_my_rooms(&harness.user).await.unwrap();

    let session = harness.open_registered("room-1").await;
    session.apply_status(RoomStatus::Closed).await;

    let err = harness
        .dispatcher
        .send_message("room-1", "hello")
        .await
        .expect_err("send into a closed room must fail");
    assert!(matches!(err, SessionError::RoomClosed { .. }));

    assert_eq!(harness.transport.publish_count().await, 0);
    assert!(session.messages().await.is_empty());
}

#[tokio::test]
async fn send_while_disconnected_is_rejected_not_queued() {
    let harness = Harness::new(customer());
    harness.api.seed_room(pending_room("room-1", "user-1")).await;
    harness.directory.list_my_rooms(&harness.user).await.unwrap();
    harness.open_registered("room-1").await;

    harness.transport.set_state(ConnectionState::Disconnected);

    let err = harness
        .dispatcher
        .send_message("room-1", "hello")
        .await
        .expect_err("send while offline must fail");
    assert!(matches!(err, SessionError::NotConnected));
    assert_eq!(harness.transport.publish_count().await, 0);
}

#[tokio::test]
async fn frame_for_unopened_room_is_dropped() {
    let harness = Harness::new(customer());

    harness
        .inject_message(Message::new("room-9", "agent-1", "Sam", "anyone there?"))
        .await;

    assert!(harness.dispatcher.session("room-9").await.is_none());
    assert_eq!(harness.dispatcher.unread_count().await, 0);
    assert_eq!(harness.notifier.notified.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn unfocused_room_message_notifies_and_increments_unread() {
    let harness = Harness::new(customer());
    harness.api.seed_room(pending_room("room-2", "user-1")).await;
    harness.api.seed_room(pending_room("room-3", "user-1")).await;
    harness.directory.list_my_rooms(&harness.user).await.unwrap();

    harness.open_registered("room-2").await;
    harness.open_registered("room-3").await;
    harness.bridge.set_focused_room(Some("room-3")).await;

    harness
        .inject_message(Message::new("room-2", "agent-1", "Sam", "hello"))
        .await;

    assert_eq!(harness.notifier.notified.load(Ordering::SeqCst), 1);
    assert_eq!(harness.dispatcher.unread_count().await, 1);

    // Same situation while reading room-2: unread still accrues, no alert.
    harness.bridge.set_focused_room(Some("room-2")).await;
    harness.bridge.set_visible(true);

    harness
        .inject_message(Message::new("room-2", "agent-1", "Sam", "still there?"))
        .await;

    assert_eq!(harness.notifier.notified.load(Ordering::SeqCst), 1);
    assert_eq!(harness.dispatcher.unread_count().await, 2);
}

#[tokio::test]
async fn unread_counter_tracks_read_flags_exactly() {
    let harness = Harness::new(customer());
    harness.api.seed_room(pending_room("room-1", "user-1")).await;
    harness.directory.list_my_rooms(&harness.user).await.unwrap();
    let session = harness.open_registered("room-1").await;

    let first = Message::new("room-1", "agent-1", "Sam", "hi");
    let second = Message::new("room-1", "agent-1", "Sam", "checking in");
    harness.inject_message(first.clone()).await;
    harness.inject_message(second.clone()).await;

    // Own and system messages never count.
    harness
        .inject_message(Message::new("room-1", "user-1", "Dana", "my own"))
        .await;
    harness
        .inject_message(Message::system("room-1", "agent joined"))
        .await;

    assert_eq!(harness.dispatcher.unread_count().await, 2);

    harness.dispatcher.mark_read("room-1", &first.id).await.unwrap();
    assert_eq!(harness.dispatcher.unread_count().await, 1);

    // mark_read is idempotent; the remote collaborator is told once.
    harness.dispatcher.mark_read("room-1", &first.id).await.unwrap();
    assert_eq!(harness.api.mark_read_calls.load(Ordering::SeqCst), 1);

    harness.dispatcher.mark_read("room-1", &second.id).await.unwrap();
    assert_eq!(harness.dispatcher.unread_count().await, 0);

    let messages = session.messages().await;
    assert_eq!(messages.len(), 4);
}

#[tokio::test]
async fn messages_keep_receipt_order_not_timestamp_order() {
    let harness = Harness::new(customer());
    harness.api.seed_room(pending_room("room-1", "user-1")).await;
    harness.directory.list_my_rooms(&harness.user).await.unwrap();
    let session = harness.open_registered("room-1").await;

    let mut late_timestamp = Message::new("room-1", "agent-1", "Sam", "first received");
    late_timestamp.sent_at = Utc::now() + ChronoDuration::seconds(30);
    let early_timestamp = Message::new("room-1", "agent-1", "Sam", "second received");

    harness.inject_message(late_timestamp.clone()).await;
    harness.inject_message(early_timestamp.clone()).await;

    let messages = session.messages().await;
    assert_eq!(messages[0].id, late_timestamp.id);
    assert_eq!(messages[1].id, early_timestamp.id);
}

#[tokio::test]
async fn duplicate_message_ids_are_dropped() {
    let harness = Harness::new(customer());
    harness.api.seed_room(pending_room("room-1", "user-1")).await;
    harness.directory.list_my_rooms(&harness.user).await.unwrap();
    let session = harness.open_registered("room-1").await;

    let message = Message::new("room-1", "agent-1", "Sam", "hello");
    harness.inject_message(message.clone()).await;
    harness.inject_message(message).await;

    assert_eq!(session.messages().await.len(), 1);
    assert_eq!(harness.dispatcher.unread_count().await, 1);
}

#[tokio::test]
async fn open_survives_history_failure_and_stays_live() {
    let harness = Harness::new(customer());
    harness.api.seed_room(pending_room("room-1", "user-1")).await;
    harness.directory.list_my_rooms(&harness.user).await.unwrap();
    harness.api.fail_history.store(true, Ordering::SeqCst);

    let session = harness.session("room-1");
    harness.dispatcher.register_session(session.clone()).await;

    let err = session.open().await.expect_err("history should fail");
    assert!(matches!(err, SessionError::HistoryUnavailable { .. }));

    // Still subscribed, still routing live frames.
    assert_eq!(harness.transport.subscribes.lock().await.len(), 1);
    harness
        .inject_message(Message::new("room-1", "agent-1", "Sam", "live"))
        .await;
    assert_eq!(session.messages().await.len(), 1);
}

#[tokio::test]
async fn history_merges_before_live_frames_that_raced_it() {
    let harness = Harness::new(customer());
    harness.api.seed_room(pending_room("room-1", "user-1")).await;
    harness.directory.list_my_rooms(&harness.user).await.unwrap();

    let gate = Arc::new(Notify::new());
    *harness.api.history_gate.lock().await = Some(gate.clone());

    let historical = Message::new("room-1", "agent-1", "Sam", "from history");
    harness
        .api
        .seed_history("room-1", vec![historical.clone()])
        .await;

    let session = harness.session("room-1");
    harness.dispatcher.register_session(session.clone()).await;

    let open_task = {
        let session = session.clone();
        tokio::spawn(async move { session.open().await })
    };
    tokio::task::yield_now().await;

    // A live frame lands while the fetch is in flight.
    let live = Message::new("room-1", "agent-1", "Sam", "live while loading");
    harness.inject_message(live.clone()).await;

    gate.notify_one();
    open_task.await.unwrap().unwrap();

    let messages = session.messages().await;
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].id, historical.id);
    assert_eq!(messages[1].id, live.id);
}

#[tokio::test]
async fn release_during_open_discards_late_history() {
    let harness = Harness::new(customer());
    harness.api.seed_room(pending_room("room-1", "user-1")).await;
    harness.directory.list_my_rooms(&harness.user).await.unwrap();

    let gate = Arc::new(Notify::new());
    *harness.api.history_gate.lock().await = Some(gate.clone());
    harness
        .api
        .seed_history(
            "room-1",
            vec![Message::new("room-1", "agent-1", "Sam", "stale")],
        )
        .await;

    let session = harness.session("room-1");
    let open_task = {
        let session = session.clone();
        tokio::spawn(async move { session.open().await })
    };
    tokio::task::yield_now().await;

    session.release().await;
    gate.notify_one();
    open_task.await.unwrap().unwrap();

    assert!(session.messages().await.is_empty());
    assert_eq!(session.state().await, SessionState::Loading);
    assert_eq!(harness.transport.unsubscribes.lock().await.len(), 1);
}

#[tokio::test]
async fn close_commits_only_after_remote_ack() {
    let harness = Harness::new(customer());
    harness.api.seed_room(pending_room("room-1", "user-1")).await;
    harness.directory.list_my_rooms(&harness.user).await.unwrap();
    let session = harness.open_registered("room-1").await;

    session.close().await.expect("close should succeed");
    assert_eq!(session.state().await, SessionState::Closed);
    assert_eq!(
        harness.directory.get("room-1").await.unwrap().status,
        RoomStatus::Closed
    );

    // Closing twice surfaces the conflict instead of retrying.
    let err = session.close().await.expect_err("second close conflicts");
    assert!(matches!(err, SessionError::AlreadyClosed { .. }));
}

#[tokio::test]
async fn status_frames_update_queue_without_refetch() {
    let harness = Harness::new(agent("agent-1"));
    harness.api.seed_room(pending_room("room-1", "user-1")).await;
    harness.api.seed_room(pending_room("room-2", "user-2")).await;

    let queue = harness
        .directory
        .consultation_queue(&harness.user)
        .await
        .unwrap();
    assert_eq!(queue.len(), 2);

    harness
        .inject(ServerFrame::StatusChanged {
            room_id: "room-1".to_string(),
            status: RoomStatus::InProgress,
        })
        .await;

    assert_eq!(
        harness.directory.get("room-1").await.unwrap().status,
        RoomStatus::InProgress
    );

    // A regression frame is ignored.
    harness
        .inject(ServerFrame::StatusChanged {
            room_id: "room-1".to_string(),
            status: RoomStatus::Pending,
        })
        .await;
    assert_eq!(
        harness.directory.get("room-1").await.unwrap().status,
        RoomStatus::InProgress
    );
}

#[tokio::test]
async fn consultation_queue_is_oldest_first_and_agent_only() {
    let harness = Harness::new(agent("agent-1"));

    let mut older = pending_room("room-old", "user-1");
    older.created_at = Utc::now() - ChronoDuration::minutes(30);
    let newer = pending_room("room-new", "user-2");
    harness.api.seed_room(newer).await;
    harness.api.seed_room(older).await;

    let queue = harness
        .directory
        .consultation_queue(&harness.user)
        .await
        .unwrap();
    assert_eq!(queue[0].id, "room-old");
    assert_eq!(queue[1].id, "room-new");

    let err = harness
        .directory
        .consultation_queue(&customer())
        .await
        .expect_err("customers must not see the queue");
    assert!(matches!(err, SessionError::AccessDenied { .. }));
}

#[tokio::test]
async fn create_room_subscribes_before_first_send() {
    let harness = Harness::new(customer());

    let room = harness
        .directory
        .create_room(
            &harness.user,
            "Order problem",
            &[],
            Some(ConsultationTopic::OrderIssue),
        )
        .await
        .unwrap();

    let subscribes = harness.transport.subscribes.lock().await;
    assert_eq!(subscribes.len(), 1);
    assert!(subscribes[0].ends_with(&room.id));
}

#[tokio::test]
async fn typing_frames_set_and_expire_indicators() {
    let harness = Harness::new(customer());
    harness.api.seed_room(pending_room("room-1", "user-1")).await;
    harness.directory.list_my_rooms(&harness.user).await.unwrap();
    let session = harness.open_registered("room-1").await;

    harness
        .inject(ServerFrame::Typing {
            room_id: "room-1".to_string(),
            sender_id: "agent-1".to_string(),
        })
        .await;
    assert_eq!(session.typing_senders().await, vec!["agent-1".to_string()]);

    // Own typing signals echoed back are ignored.
    harness
        .inject(ServerFrame::Typing {
            room_id: "room-1".to_string(),
            sender_id: "user-1".to_string(),
        })
        .await;
    assert_eq!(session.typing_senders().await.len(), 1);
}

#[tokio::test]
async fn outbound_send_publishes_to_room_destination() {
    let harness = Harness::new(customer());
    harness.api.seed_room(pending_room("room-1", "user-1")).await;
    harness.directory.list_my_rooms(&harness.user).await.unwrap();
    let session = harness.open_registered("room-1").await;

    harness
        .dispatcher
        .send_message("room-1", "hello there")
        .await
        .unwrap();

    let publishes = harness.transport.publishes.lock().await;
    assert_eq!(publishes.len(), 1);
    assert_eq!(publishes[0].0, "/app/chat/room-1/send");
    assert_eq!(publishes[0].1["body"], "hello there");
    assert_eq!(publishes[0].1["sender_id"], "user-1");

    // No optimistic echo: the list grows only on inbound confirmation.
    assert!(session.messages().await.is_empty());
}

#[tokio::test]
async fn blank_bodies_are_rejected_before_publish() {
    let harness = Harness::new(customer());
    harness.api.seed_room(pending_room("room-1", "user-1")).await;
    harness.directory.list_my_rooms(&harness.user).await.unwrap();
    harness.open_registered("room-1").await;

    let err = harness
        .dispatcher
        .send_message("room-1", "   ")
        .await
        .expect_err("blank body must fail validation");
    assert!(matches!(err, SessionError::Validation { .. }));
    assert_eq!(harness.transport.publish_count().await, 0);
}
