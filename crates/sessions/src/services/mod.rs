//! Service layer for the session core.

pub mod directory;
pub mod dispatcher;
pub mod notifier;
pub mod room_session;

pub use directory::RoomDirectory;
pub use dispatcher::MessageDispatcher;
pub use notifier::{NotificationBridge, Notifier};
pub use room_session::{RoomSession, SessionState};
