//! Notification decisions and the derived unread badge.
//!
//! The bridge decides *whether* an inbound event becomes a user-visible
//! alert; rendering is owned by the notification surface behind the
//! `Notifier` trait. The unread badge is always pushed as a freshly derived
//! count, never incremented or decremented as its own integer, so the badge
//! cannot drift from the underlying message state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;

use crate::entities::Message;

/// The OS/browser notification surface
pub trait Notifier: Send + Sync {
    /// Raise a user-visible notification for a message
    fn notify(&self, message: &Message);

    /// Display the derived unread total
    fn update_badge(&self, unread: usize);
}

pub struct NotificationBridge {
    notifier: Arc<dyn Notifier>,
    current_user_id: String,
    focused_room: RwLock<Option<String>>,
    visible: AtomicBool,
}

impl NotificationBridge {
    pub fn new(notifier: Arc<dyn Notifier>, current_user_id: impl Into<String>) -> Self {
        Self {
            notifier,
            current_user_id: current_user_id.into(),
            focused_room: RwLock::new(None),
            visible: AtomicBool::new(true),
        }
    }

    /// Record which room the UI currently renders, if any
    pub async fn set_focused_room(&self, room_id: Option<&str>) {
        *self.focused_room.write().await = room_id.map(str::to_string);
    }

    /// Record document/tab visibility
    pub fn set_visible(&self, visible: bool) {
        self.visible.store(visible, Ordering::SeqCst);
    }

    /// Alert only when the sender is someone else and the user is not
    /// actively reading the room: no self-notification, no alert spam while
    /// the room is focused and visible.
    pub async fn should_notify(&self, message: &Message) -> bool {
        if message.is_system || message.sender_id == self.current_user_id {
            return false;
        }

        let focused = self.focused_room.read().await;
        let reading_this_room = focused.as_deref() == Some(message.room_id.as_str())
            && self.visible.load(Ordering::SeqCst);

        !reading_this_room
    }

    /// Raise an alert for the message if warranted. Returns whether one was
    /// raised.
    pub async fn on_message(&self, message: &Message) -> bool {
        if self.should_notify(message).await {
            debug!(room_id = %message.room_id, message_id = %message.id, "raising notification");
            self.notifier.notify(message);
            true
        } else {
            false
        }
    }

    /// Push the derived unread total to the badge surface
    pub fn publish_unread(&self, unread: usize) {
        self.notifier.update_badge(unread);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

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
            self.badge.lock().unwrap().push(unread);
        }
    }

    #[tokio::test]
    async fn own_messages_never_notify() {
        let notifier = Arc::new(RecordingNotifier::new());
        let bridge = NotificationBridge::new(notifier.clone(), "user-1");

        let message = Message::new("room-2", "user-1", "Dana", "hi");
        assert!(!bridge.on_message(&message).await);
        assert_eq!(notifier.notified.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unfocused_room_notifies() {
        let notifier = Arc::new(RecordingNotifier::new());
        let bridge = NotificationBridge::new(notifier.clone(), "user-1");
        bridge.set_focused_room(Some("room-3")).await;

        let message = Message::new("room-2", "agent-1", "Sam", "hello");
        assert!(bridge.on_message(&message).await);
        assert_eq!(notifier.notified.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn focused_visible_room_stays_quiet() {
        let notifier = Arc::new(RecordingNotifier::new());
        let bridge = NotificationBridge::new(notifier.clone(), "user-1");
        bridge.set_focused_room(Some("room-2")).await;
        bridge.set_visible(true);

        let message = Message::new("room-2", "agent-1", "Sam", "hello");
        assert!(!bridge.on_message(&message).await);
    }

    #[tokio::test]
    async fn hidden_tab_notifies_even_for_focused_room() {
        let notifier = Arc::new(RecordingNotifier::new());
        let bridge = NotificationBridge::new(notifier.clone(), "user-1");
        bridge.set_focused_room(Some("room-2")).await;
        bridge.set_visible(false);

        let message = Message::new("room-2", "agent-1", "Sam", "hello");
        assert!(bridge.on_message(&message).await);
    }

    #[tokio::test]
    async fn system_messages_never_notify() {
        let notifier = Arc::new(RecordingNotifier::new());
        let bridge = NotificationBridge::new(notifier.clone(), "user-1");

        let message = Message::system("room-2", "Consultation accepted");
        assert!(!bridge.on_message(&message).await);
    }
}
