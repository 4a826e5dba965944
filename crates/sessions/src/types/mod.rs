//! Shared types for the session core.

pub mod errors;
pub mod frames;

pub use errors::{SessionError, SessionResult};
pub use frames::{ClientFrame, ServerFrame};
