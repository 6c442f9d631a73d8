//! Session and room store boundary.
//!
//! The relational store lives outside this crate. `MemoryStore` backs tests
//! and single-process deployments.

mod memory;

use std::sync::Arc;

use async_trait::async_trait;

pub use memory::MemoryStore;

use crate::common::error::StoreResult;
use crate::common::types::{RoomId, RoomRecord, User};

/// Durable storage for account credentials and room records.
///
/// Room writes for one owner are serialized by the caller; implementations
/// need no isolation beyond single-row atomicity.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Insert a room keyed by `(owner, room_id)`, or fill in a missing peer
    /// label on an existing row. Returns `true` when a new row was written.
    async fn upsert_room(&self, record: &RoomRecord) -> StoreResult<bool>;

    async fn find_room(&self, owner: &str, room_id: &RoomId) -> StoreResult<Option<RoomRecord>>;

    /// Rooms of `owner` whose peer label equals `peer`.
    async fn find_rooms_by_peer(&self, owner: &str, peer: &str) -> StoreResult<Vec<RoomRecord>>;

    async fn find_management_rooms(&self, owner: &str) -> StoreResult<Vec<RoomRecord>>;

    /// Store or replace an account's credential.
    async fn store_credential(&self, user: &User) -> StoreResult<()>;

    async fn find_credential(&self, local_id: &str) -> StoreResult<Option<User>>;

    /// All accounts with stored credentials.
    async fn list_accounts(&self) -> StoreResult<Vec<User>>;
}

pub type SharedSessionStore = Arc<dyn SessionStore>;
