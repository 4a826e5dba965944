//! Domain entities for the session core.

pub mod message;
pub mod room;
pub mod typing;
pub mod user;

pub use message::Message;
pub use room::{ConsultationTopic, Room, RoomStatus};
pub use typing::TypingIndicator;
pub use user::{UserRef, UserRole};
