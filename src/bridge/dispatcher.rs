//! Per-user sync fan-out.
//!
//! A `Dispatcher` owns the single long-lived sync call for one user and is
//! the only consumer of its events. For each event, in stream order:
//!
//! 1. An invite addressed to the user is accepted, the room classified and,
//!    when it is a bridge-initiated contact thread, recorded.
//! 2. A bot reply in the management room of a session awaiting a reply is
//!    forwarded to that pairing session.
//! 3. Any other message not from the user or a bot, outside management
//!    rooms, records a contact room.
//!
//! Invite and contact work runs as units in a `JoinSet` owned by the
//! dispatcher, so nothing outlives it. Any protocol error ends the
//! dispatcher; restarting is left to the orchestrator's poll loop.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::common::error::ProtocolError;
use crate::common::messages::SyncEvent;
use crate::common::types::{RoomRecord, UserId};
use crate::config::provider::SharedConfigProvider;
use crate::store::SharedSessionStore;

use super::classifier::{classify_room, is_bridge_invite_for_contact, record_class, RoomClass};
use super::pairing::PairingSession;
use super::registry::{SyncHandle, SyncRegistry};

/// Remembers the last `capacity` event ids.
#[derive(Debug)]
pub struct DedupWindow {
    order: VecDeque<String>,
    seen: HashSet<String>,
    capacity: usize,
}

impl DedupWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::with_capacity(capacity),
            seen: HashSet::with_capacity(capacity),
            capacity,
        }
    }

    /// Whether `event_id` is new. A zero capacity disables the window.
    pub fn first_seen(&mut self, event_id: &str) -> bool {
        if self.capacity == 0 {
            return true;
        }
        if self.seen.contains(event_id) {
            return false;
        }
        if self.order.len() == self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.order.push_back(event_id.to_string());
        self.seen.insert(event_id.to_string());
        true
    }
}

/// Where an event goes after the routing decision.
enum Route {
    Pairing(Arc<PairingSession>),
    Contact,
    Drop,
}

/// Removes the handle from the registry however the dispatcher exits.
struct ReleaseGuard {
    registry: Arc<SyncRegistry>,
    handle: Arc<SyncHandle>,
}

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        self.registry.release(&self.handle);
    }
}

pub struct Dispatcher {
    handle: Arc<SyncHandle>,
    registry: Arc<SyncRegistry>,
    store: SharedSessionStore,
    config: SharedConfigProvider,
    dedup: DedupWindow,
    buffer: usize,
}

impl Dispatcher {
    pub fn new(
        handle: Arc<SyncHandle>,
        registry: Arc<SyncRegistry>,
        store: SharedSessionStore,
        config: SharedConfigProvider,
        dedup_window: usize,
        buffer: usize,
    ) -> Self {
        Self {
            handle,
            registry,
            store,
            config,
            dedup: DedupWindow::new(dedup_window),
            buffer: buffer.max(1),
        }
    }

    /// Run until the sync stream fails or the handle is shut down.
    ///
    /// On exit every fan-out unit is stopped, pending pairings resolve as
    /// interrupted and the handle is released.
    pub async fn run(mut self) -> Result<(), ProtocolError> {
        let _release = ReleaseGuard {
            registry: Arc::clone(&self.registry),
            handle: Arc::clone(&self.handle),
        };
        let user = self.handle.user().local_id.clone();
        let client = Arc::clone(self.handle.client());
        let shutdown = self.handle.shutdown_token().clone();

        let (tx, mut rx) = mpsc::channel(self.buffer);
        let mut sync = client.sync(tx);

        let mut tasks: JoinSet<Result<(), ProtocolError>> = JoinSet::new();

        info!(user = %user, "Dispatcher started");

        let result = loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!(user = %user, "Dispatcher shutting down");
                    break Ok(());
                }

                res = &mut sync => break res,

                Some(event) = rx.recv() => {
                    self.handle_event(event, &mut tasks).await;
                }

                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    match joined {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => break Err(e),
                        Err(e) => error!(user = %user, "Dispatcher unit panicked: {}", e),
                    }
                }
            }
        };

        drop(sync);
        shutdown.cancel();
        tasks.shutdown().await;
        for session in self.handle.lock().await.live_pairings() {
            session.interrupt();
        }

        match &result {
            Ok(()) => info!(user = %user, "Dispatcher stopped"),
            Err(e) => warn!(user = %user, "Dispatcher terminated: {}", e),
        }
        result
    }

    async fn handle_event(
        &mut self,
        event: SyncEvent,
        tasks: &mut JoinSet<Result<(), ProtocolError>>,
    ) {
        if !self.dedup.first_seen(&event.event_id) {
            debug!(event = %event.event_id, "Dropping duplicate event");
            return;
        }

        let own_id = self.handle.user().user_id.clone();
        if let Some(display_name) = event.invite_for(&own_id) {
            let display_name = display_name.map(str::to_string);
            tasks.spawn(accept_invite(
                Arc::clone(&self.handle),
                Arc::clone(&self.store),
                Arc::clone(&self.config),
                event,
                display_name,
            ));
            return;
        }

        if !event.is_room_message() {
            return;
        }

        match self.route(&event, &own_id).await {
            Route::Pairing(session) => {
                debug!(
                    user = %self.handle.user().local_id,
                    platform = session.platform(),
                    event = %event.event_id,
                    "Forwarding to pairing session"
                );
                session.deliver(event);
            }
            Route::Contact => {
                tasks.spawn(record_contact(
                    Arc::clone(&self.handle),
                    Arc::clone(&self.store),
                    Arc::clone(&self.config),
                    event,
                ));
            }
            Route::Drop => {}
        }
    }

    async fn route(&self, event: &SyncEvent, own_id: &UserId) -> Route {
        let rooms = self.handle.lock().await;

        if let Some(session) = rooms.awaiting_reply_in(&event.room_id, &event.sender) {
            return Route::Pairing(session);
        }
        if rooms.management.contains_key(&event.room_id)
            || rooms.contacts.contains(&event.room_id)
            || &event.sender == own_id
            || self.config.platform_for_bot(&event.sender).is_some()
        {
            return Route::Drop;
        }
        Route::Contact
    }
}

/// Join an invited room and record it if it is one of ours.
async fn accept_invite(
    handle: Arc<SyncHandle>,
    store: SharedSessionStore,
    config: SharedConfigProvider,
    event: SyncEvent,
    display_name: Option<String>,
) -> Result<(), ProtocolError> {
    let user = handle.user().local_id.clone();
    let room = event.room_id.clone();

    handle.client().join_room(&room).await?;
    info!(user = %user, room = %room, sender = %event.sender, "Accepted invite");

    let class = match classify_room(handle.client().as_ref(), &room, config.as_ref()).await {
        Ok(class) => class,
        Err(e) => {
            warn!(user = %user, room = %room, "Failed to classify room: {}", e);
            RoomClass::Unclassified
        }
    };

    let class = match class {
        RoomClass::Management { .. } => class,
        other => {
            let management = handle.lock().await.management.clone();
            match is_bridge_invite_for_contact(&event, &management, config.as_ref()) {
                Some(platform) => RoomClass::Contact {
                    platform: Some(platform),
                },
                None => other,
            }
        }
    };

    record_class(
        &handle,
        store.as_ref(),
        config.as_ref(),
        &room,
        &class,
        display_name,
    )
    .await;
    Ok(())
}

/// Record a contact room for an inbound message.
async fn record_contact(
    handle: Arc<SyncHandle>,
    store: SharedSessionStore,
    config: SharedConfigProvider,
    event: SyncEvent,
) -> Result<(), ProtocolError> {
    let owner = handle.user().local_id.clone();
    let platform = config.platform_for_puppet(&event.sender).map(str::to_string);
    let record = RoomRecord::contact(
        owner.as_str(),
        event.room_id.clone(),
        platform,
        Some(event.sender.to_string()),
    );

    let mut rooms = handle.lock().await;
    if rooms.management.contains_key(&record.room_id) || !rooms.contacts.insert(record.room_id.clone()) {
        return Ok(());
    }

    match store.upsert_room(&record).await {
        Ok(true) => info!(
            user = %owner,
            room = %record.room_id,
            platform = ?record.platform,
            peer = %event.sender,
            "Recorded contact room"
        ),
        Ok(false) => {}
        Err(e) => warn!(user = %owner, room = %record.room_id, "Failed to store contact room: {}", e),
    }
    Ok(())
}
