//! Common utilities and types shared across the crate.

pub mod error;
pub mod messages;
pub mod reconnect;
pub mod types;

// Re-export message types from messages module
pub use messages::{EventContent, MessageKind, SyncEvent};

pub use types::{RoomId, RoomKind, RoomRecord, User, UserId};
