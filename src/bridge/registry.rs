//! Registry of users with a live dispatcher.
//!
//! Holds at most one `SyncHandle` per account. The handle carries the
//! per-user mutex that every room and pairing write for that user goes
//! through; the registry map has its own lock so acquiring never waits on a
//! user's room work.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::common::types::{RoomId, User, UserId};
use crate::protocol::ProtocolClient;

use super::pairing::PairingSession;

/// Per-user room and pairing bookkeeping, guarded by the handle mutex.
#[derive(Default)]
pub struct UserRooms {
    /// Pairing sessions by platform. Weak so a session never outlives its
    /// task and consumer.
    pub pairings: HashMap<String, Weak<PairingSession>>,
    /// Management room -> platform.
    pub management: HashMap<RoomId, String>,
    /// Contact rooms already recorded during this run.
    pub contacts: HashSet<RoomId>,
}

impl UserRooms {
    /// Management room for a platform.
    pub fn management_room(&self, platform: &str) -> Option<&RoomId> {
        self.management
            .iter()
            .find(|(_, p)| p.as_str() == platform)
            .map(|(room, _)| room)
    }

    pub fn has_management(&self, platform: &str) -> bool {
        self.management_room(platform).is_some()
    }

    /// Live pairing session for a platform, if one is still referenced.
    pub fn pairing(&self, platform: &str) -> Option<Arc<PairingSession>> {
        self.pairings.get(platform).and_then(Weak::upgrade)
    }

    /// The session awaiting a reply in `room` from `sender`, if any.
    pub fn awaiting_reply_in(&self, room: &RoomId, sender: &UserId) -> Option<Arc<PairingSession>> {
        self.pairings
            .values()
            .filter_map(Weak::upgrade)
            .find(|session| session.is_awaiting_reply() && session.accepts(room, sender))
    }

    /// All still-referenced sessions.
    pub fn live_pairings(&self) -> Vec<Arc<PairingSession>> {
        self.pairings.values().filter_map(Weak::upgrade).collect()
    }

    /// Register a session, dropping entries whose sessions are gone.
    pub fn register_pairing(&mut self, session: &Arc<PairingSession>) {
        self.pairings.retain(|_, weak| weak.strong_count() > 0);
        self.pairings
            .insert(session.platform().to_string(), Arc::downgrade(session));
    }
}

/// State of one syncing user.
pub struct SyncHandle {
    user: User,
    client: Arc<dyn ProtocolClient>,
    rooms: tokio::sync::Mutex<UserRooms>,
    active: AtomicBool,
    shutdown: CancellationToken,
}

impl SyncHandle {
    fn new(user: User, client: Arc<dyn ProtocolClient>) -> Self {
        Self {
            user,
            client,
            rooms: tokio::sync::Mutex::new(UserRooms::default()),
            active: AtomicBool::new(true),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn user(&self) -> &User {
        &self.user
    }

    pub fn client(&self) -> &Arc<dyn ProtocolClient> {
        &self.client
    }

    /// Lock the user's room set.
    pub async fn lock(&self) -> tokio::sync::MutexGuard<'_, UserRooms> {
        self.rooms.lock().await
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Cancelled when the dispatcher stops; pairing sessions use child tokens.
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    fn deactivate(&self) {
        self.active.store(false, Ordering::SeqCst);
        self.shutdown.cancel();
    }
}

/// Registry of live sync handles keyed by account.
#[derive(Default)]
pub struct SyncRegistry {
    handles: Mutex<HashMap<String, Arc<SyncHandle>>>,
}

impl SyncRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn handles(&self) -> MutexGuard<'_, HashMap<String, Arc<SyncHandle>>> {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create and register a handle for `user`, or `None` if one is already
    /// active.
    pub fn try_acquire(
        &self,
        user: &User,
        client: Arc<dyn ProtocolClient>,
    ) -> Option<Arc<SyncHandle>> {
        let mut handles = self.handles();
        if let Some(existing) = handles.get(&user.local_id) {
            if existing.is_active() {
                debug!(user = %user.local_id, "Sync already active");
                return None;
            }
        }

        let handle = Arc::new(SyncHandle::new(user.clone(), client));
        handles.insert(user.local_id.clone(), Arc::clone(&handle));
        info!(user = %user.local_id, "Sync handle acquired");
        Some(handle)
    }

    /// Remove `handle` and stop everything hanging off it.
    ///
    /// A handle that has already been replaced is only deactivated. Returns
    /// whether the handle was still registered.
    pub fn release(&self, handle: &Arc<SyncHandle>) -> bool {
        handle.deactivate();

        let mut handles = self.handles();
        let local_id = &handle.user().local_id;
        match handles.get(local_id) {
            Some(current) if Arc::ptr_eq(current, handle) => {
                handles.remove(local_id);
                info!(user = %local_id, "Sync handle released");
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, local_id: &str) -> Option<Arc<SyncHandle>> {
        self.handles().get(local_id).cloned()
    }

    pub fn is_active(&self, local_id: &str) -> bool {
        self.handles()
            .get(local_id)
            .map(|handle| handle.is_active())
            .unwrap_or(false)
    }

    /// Accounts with a live handle, sorted.
    pub fn active_users(&self) -> Vec<String> {
        let mut users: Vec<String> = self
            .handles()
            .iter()
            .filter(|(_, handle)| handle.is_active())
            .map(|(user, _)| user.clone())
            .collect();
        users.sort();
        users
    }

    /// Signal every dispatcher to stop. Handles are removed as each
    /// dispatcher releases its own.
    pub fn shutdown_all(&self) -> usize {
        let handles = self.handles();
        for handle in handles.values() {
            handle.shutdown.cancel();
        }
        handles.len()
    }

    pub fn len(&self) -> usize {
        self.handles().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles().is_empty()
    }
}
