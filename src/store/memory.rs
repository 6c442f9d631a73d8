use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::SessionStore;
use crate::common::error::StoreResult;
use crate::common::types::{RoomId, RoomKind, RoomRecord, User};

/// In-memory store.
#[derive(Default)]
pub struct MemoryStore {
    rooms: DashMap<(String, RoomId), RoomRecord>,
    accounts: DashMap<String, User>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            rooms: DashMap::new(),
            accounts: DashMap::new(),
        }
    }

    /// All rooms of an owner, in no particular order.
    pub fn rooms_of(&self, owner: &str) -> Vec<RoomRecord> {
        self.rooms
            .iter()
            .filter(|entry| entry.key().0 == owner)
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn upsert_room(&self, record: &RoomRecord) -> StoreResult<bool> {
        let key = (record.owner.clone(), record.room_id.clone());
        match self.rooms.entry(key) {
            Entry::Occupied(mut entry) => {
                let existing = entry.get_mut();
                if existing.peer_label.is_none() && record.peer_label.is_some() {
                    existing.peer_label = record.peer_label.clone();
                }
                Ok(false)
            }
            Entry::Vacant(entry) => {
                entry.insert(record.clone());
                Ok(true)
            }
        }
    }

    async fn find_room(&self, owner: &str, room_id: &RoomId) -> StoreResult<Option<RoomRecord>> {
        Ok(self
            .rooms
            .get(&(owner.to_string(), room_id.clone()))
            .map(|entry| entry.value().clone()))
    }

    async fn find_rooms_by_peer(&self, owner: &str, peer: &str) -> StoreResult<Vec<RoomRecord>> {
        Ok(self
            .rooms_of(owner)
            .into_iter()
            .filter(|room| room.peer_label.as_deref() == Some(peer))
            .collect())
    }

    async fn find_management_rooms(&self, owner: &str) -> StoreResult<Vec<RoomRecord>> {
        Ok(self
            .rooms_of(owner)
            .into_iter()
            .filter(|room| room.kind == RoomKind::Management)
            .collect())
    }

    async fn store_credential(&self, user: &User) -> StoreResult<()> {
        self.accounts.insert(user.local_id.clone(), user.clone());
        Ok(())
    }

    async fn find_credential(&self, local_id: &str) -> StoreResult<Option<User>> {
        Ok(self.accounts.get(local_id).map(|entry| entry.value().clone()))
    }

    async fn list_accounts(&self) -> StoreResult<Vec<User>> {
        let mut accounts: Vec<User> = self
            .accounts
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        accounts.sort_by(|a, b| a.local_id.cmp(&b.local_id));
        Ok(accounts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::UserId;

    #[tokio::test]
    async fn test_upsert_is_idempotent() {
        let store = MemoryStore::new();
        let record = RoomRecord::contact("alice", RoomId::new("!c:x"), None, None);

        assert!(store.upsert_room(&record).await.unwrap());
        assert!(!store.upsert_room(&record).await.unwrap());
        assert_eq!(store.room_count(), 1);
    }

    #[tokio::test]
    async fn test_upsert_only_fills_missing_peer_label() {
        let store = MemoryStore::new();
        let room = RoomId::new("!c:x");
        store
            .upsert_room(&RoomRecord::contact("alice", room.clone(), None, None))
            .await
            .unwrap();
        store
            .upsert_room(&RoomRecord::contact(
                "alice",
                room.clone(),
                None,
                Some("@whatsapp_1:x".to_string()),
            ))
            .await
            .unwrap();
        store
            .upsert_room(&RoomRecord::contact(
                "alice",
                room.clone(),
                None,
                Some("@whatsapp_2:x".to_string()),
            ))
            .await
            .unwrap();

        let stored = store.find_room("alice", &room).await.unwrap().unwrap();
        assert_eq!(stored.peer_label.as_deref(), Some("@whatsapp_1:x"));
        assert_eq!(stored.kind, RoomKind::Contact);
    }

    #[tokio::test]
    async fn test_kind_never_changes() {
        let store = MemoryStore::new();
        let room = RoomId::new("!m:x");
        let bot = UserId::new("@wa-bot:x");
        store
            .upsert_room(&RoomRecord::management("alice", room.clone(), "wa", &bot))
            .await
            .unwrap();
        store
            .upsert_room(&RoomRecord::contact("alice", room.clone(), None, None))
            .await
            .unwrap();

        let stored = store.find_room("alice", &room).await.unwrap().unwrap();
        assert_eq!(stored.kind, RoomKind::Management);
    }

    #[tokio::test]
    async fn test_rooms_are_scoped_by_owner() {
        let store = MemoryStore::new();
        let room = RoomId::new("!shared:x");
        let bot = UserId::new("@wa-bot:x");
        store
            .upsert_room(&RoomRecord::management("alice", room.clone(), "wa", &bot))
            .await
            .unwrap();
        store
            .upsert_room(&RoomRecord::contact("bob", room.clone(), None, None))
            .await
            .unwrap();

        assert_eq!(store.find_management_rooms("alice").await.unwrap().len(), 1);
        assert!(store.find_management_rooms("bob").await.unwrap().is_empty());
        assert_eq!(
            store
                .find_rooms_by_peer("alice", "@wa-bot:x")
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_credentials() {
        let store = MemoryStore::new();
        store
            .store_credential(&User::new("bob", "@bob:x", "t1"))
            .await
            .unwrap();
        store
            .store_credential(&User::new("alice", "@alice:x", "t2"))
            .await
            .unwrap();
        store
            .store_credential(&User::new("alice", "@alice:x", "t3"))
            .await
            .unwrap();

        let alice = store.find_credential("alice").await.unwrap().unwrap();
        assert_eq!(alice.access_token, "t3");
        assert!(store.find_credential("carol").await.unwrap().is_none());

        let accounts = store.list_accounts().await.unwrap();
        let ids: Vec<_> = accounts.iter().map(|u| u.local_id.as_str()).collect();
        assert_eq!(ids, vec!["alice", "bob"]);
    }
}
