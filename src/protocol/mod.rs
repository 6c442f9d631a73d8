//! Chat-protocol client boundary.
//!
//! The wire client (login, sync, send, join, media) lives outside this crate.
//! The sync core only sees these traits, so any homeserver SDK can back them.

#[cfg(test)]
pub mod mock;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::common::error::ProtocolResult;
use crate::common::messages::SyncEvent;
use crate::common::types::{RoomId, User, UserId};

/// One logged-in protocol session for a single account.
#[async_trait]
pub trait ProtocolClient: Send + Sync {
    /// Identity this client is logged in as.
    fn user_id(&self) -> &UserId;

    /// Run the long-lived sync stream, pushing events into `sink` in
    /// protocol order.
    ///
    /// Only returns on error, or with `Ok(())` once `sink` is closed.
    async fn sync(&self, sink: mpsc::Sender<SyncEvent>) -> ProtocolResult<()>;

    /// Send a plain text message, returning the event id.
    async fn send_text(&self, room: &RoomId, text: &str) -> ProtocolResult<String>;

    async fn join_room(&self, room: &RoomId) -> ProtocolResult<()>;

    /// Create a private direct room with `invitee`.
    async fn create_direct_room(&self, invitee: &UserId) -> ProtocolResult<RoomId>;

    async fn list_joined_rooms(&self) -> ProtocolResult<Vec<RoomId>>;

    /// Joined members of a room.
    async fn list_members(&self, room: &RoomId) -> ProtocolResult<Vec<UserId>>;

    /// Whether the room is a space (container) rather than a conversation.
    async fn is_space(&self, _room: &RoomId) -> ProtocolResult<bool> {
        Ok(false)
    }

    async fn download_media(&self, uri: &str) -> ProtocolResult<Vec<u8>>;
}

/// Opens protocol sessions for stored accounts.
#[async_trait]
pub trait ProtocolConnector: Send + Sync {
    async fn connect(&self, user: &User) -> ProtocolResult<Arc<dyn ProtocolClient>>;
}
