//! # Careline Sessions Crate
//!
//! This crate provides the shared chat/consultation session core consumed by
//! every chat surface: the room directory and consultation queue, per-room
//! session state machines, inbound frame routing, and notification decisions.
//!
//! ## Architecture
//!
//! - **Entities**: Domain models (Room, Message, TypingIndicator, UserRef)
//! - **Services**: RoomDirectory, RoomSession, MessageDispatcher,
//!   NotificationBridge
//! - **Api**: the REST collaborator seam (room listing, history, actions)
//! - **Types**: errors and wire frames

pub mod api;
pub mod entities;
pub mod services;
pub mod types;

// Re-export main types for convenience
pub use api::{HttpRoomApi, RoomApi};
pub use entities::{
    ConsultationTopic, Message, Room, RoomStatus, TypingIndicator, UserRef, UserRole,
};
pub use services::{
    MessageDispatcher, NotificationBridge, Notifier, RoomDirectory, RoomSession, SessionState,
};
pub use types::{ClientFrame, ServerFrame, SessionError, SessionResult};
