//! # Careline Transport Crate
//!
//! This crate owns the single real-time connection shared by every chat
//! surface, plus the reference-counted topic subscriptions that keep frame
//! delivery consistent with the set of rooms currently of interest.
//!
//! ## Architecture
//!
//! - **Transport**: trait seam over the socket; `WsTransport` is the
//!   tokio-tungstenite implementation with fixed-delay bounded reconnect
//! - **SubscriptionManager**: de-duplicates subscriptions across consumers
//! - **Frames**: the thin wire envelope (topic + payload) the socket carries

pub mod error;
pub mod frames;
pub mod subscriptions;
pub mod ws;

// Re-export main types for convenience
pub use error::{TransportError, TransportResult};
pub use frames::{ConnectionState, RawFrame};
pub use subscriptions::{room_topic, SubscriptionManager};
pub use ws::{Transport, WsTransport};
