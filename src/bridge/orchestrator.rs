//! Bridge orchestrator.
//!
//! Top level of the sync core: brings accounts online (management rooms
//! plus one dispatcher each), rescans stored accounts to restart dead
//! dispatchers, and exposes the operations the transport layer calls.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::common::error::{AppError, PairingError};
use crate::common::reconnect::RestartBackoff;
use crate::common::types::{RoomId, RoomKind, RoomRecord, User};
use crate::config::provider::{require_binding, SharedConfigProvider};
use crate::config::types::SyncSettings;
use crate::protocol::ProtocolConnector;
use crate::store::SharedSessionStore;

use super::classifier::{classify_room, RoomClass};
use super::dispatcher::Dispatcher;
use super::pairing::{start_pairing, PairingContext, PairingHandle};
use super::registry::{SyncHandle, SyncRegistry};

pub struct BridgeOrchestrator {
    config: SharedConfigProvider,
    store: SharedSessionStore,
    connector: Arc<dyn ProtocolConnector>,
    registry: Arc<SyncRegistry>,
    backoff: Arc<RestartBackoff>,
    settings: SyncSettings,
    tracker: TaskTracker,
    shutdown: CancellationToken,
}

impl BridgeOrchestrator {
    pub fn new(
        config: SharedConfigProvider,
        store: SharedSessionStore,
        connector: Arc<dyn ProtocolConnector>,
        settings: SyncSettings,
    ) -> Self {
        Self {
            config,
            store,
            connector,
            registry: Arc::new(SyncRegistry::new()),
            backoff: Arc::new(RestartBackoff::new(settings.restart.clone())),
            settings,
            tracker: TaskTracker::new(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn registry(&self) -> &Arc<SyncRegistry> {
        &self.registry
    }

    pub fn backoff(&self) -> &Arc<RestartBackoff> {
        &self.backoff
    }

    /// Bring an account online.
    ///
    /// Returns `Ok(false)` when a dispatcher is already running for the user,
    /// which makes repeated calls idempotent.
    pub async fn on_account_ready(&self, user: &User) -> Result<bool, AppError> {
        if self.shutdown.is_cancelled() || self.registry.is_active(&user.local_id) {
            return Ok(false);
        }

        let client = self.connector.connect(user).await?;
        let Some(handle) = self.registry.try_acquire(user, client) else {
            return Ok(false);
        };

        if let Err(e) = self.ensure_management_rooms(&handle).await {
            self.registry.release(&handle);
            return Err(e);
        }

        self.spawn_dispatcher(handle);
        Ok(true)
    }

    /// Make sure every configured platform has a management room.
    ///
    /// Runs under the user's mutex: known rooms come from the store, then
    /// from a scan of joined rooms, and only then is a room created.
    async fn ensure_management_rooms(&self, handle: &SyncHandle) -> Result<(), AppError> {
        let owner = handle.user().local_id.as_str();
        let client = handle.client();
        let mut rooms = handle.lock().await;

        for record in self.store.find_management_rooms(owner).await? {
            if let Some(platform) = record.platform {
                rooms.management.insert(record.room_id, platform);
            }
        }

        let mut joined: Option<HashMap<String, RoomId>> = None;

        for binding in self.config.bindings() {
            let platform = binding.platform.as_str();
            if rooms.has_management(platform) {
                continue;
            }

            if joined.is_none() {
                joined = Some(self.scan_joined_rooms(handle).await?);
            }
            let existing = joined.as_ref().and_then(|found| found.get(platform)).cloned();

            let room_id = match existing {
                Some(room_id) => {
                    info!(user = owner, platform, room = %room_id, "Found management room");
                    room_id
                }
                None => {
                    let room_id = client.create_direct_room(&binding.bot).await?;
                    info!(user = owner, platform, room = %room_id, "Created management room");
                    room_id
                }
            };

            let record = RoomRecord::management(owner, room_id.clone(), platform, &binding.bot);
            if let Err(e) = self.store.upsert_room(&record).await {
                warn!(user = owner, platform, "Failed to store management room: {}", e);
            }
            rooms.management.insert(room_id, platform.to_string());
        }

        Ok(())
    }

    /// Management rooms among the user's joined rooms, first per platform.
    async fn scan_joined_rooms(
        &self,
        handle: &SyncHandle,
    ) -> Result<HashMap<String, RoomId>, AppError> {
        let client = handle.client();
        let mut found = HashMap::new();
        for room in client.list_joined_rooms().await? {
            if let RoomClass::Management { platform } =
                classify_room(client.as_ref(), &room, self.config.as_ref()).await?
            {
                found.entry(platform).or_insert(room);
            }
        }
        debug!(
            user = %handle.user().local_id,
            found = found.len(),
            "Scanned joined rooms"
        );
        Ok(found)
    }

    fn spawn_dispatcher(&self, handle: Arc<SyncHandle>) {
        let user = handle.user().local_id.clone();
        let dispatcher = Dispatcher::new(
            handle,
            Arc::clone(&self.registry),
            Arc::clone(&self.store),
            Arc::clone(&self.config),
            self.settings.dedup_window,
            self.settings.event_buffer,
        );
        let backoff = Arc::clone(&self.backoff);

        self.tracker.spawn(async move {
            match dispatcher.run().await {
                Ok(()) => backoff.reset(&user),
                Err(e) => {
                    let delay = backoff.record_failure(&user);
                    warn!(
                        user = %user,
                        "Sync stopped ({}), next restart in {:.1}s",
                        e,
                        delay.as_secs_f64()
                    );
                }
            }
        });
    }

    /// One pass over stored accounts. Returns how many dispatchers started.
    pub async fn scan(&self) -> usize {
        let accounts = match self.store.list_accounts().await {
            Ok(accounts) => accounts,
            Err(e) => {
                warn!("Failed to list accounts: {}", e);
                return 0;
            }
        };

        let candidates: Vec<User> = accounts
            .into_iter()
            .filter(|user| {
                !self.registry.is_active(&user.local_id) && self.backoff.ready(&user.local_id)
            })
            .collect();

        let started = AtomicUsize::new(0);
        stream::iter(candidates)
            .for_each_concurrent(self.settings.account_concurrency, |user| {
                let started = &started;
                async move {
                    match self.on_account_ready(&user).await {
                        Ok(true) => {
                            started.fetch_add(1, Ordering::SeqCst);
                        }
                        Ok(false) => {}
                        Err(e) => {
                            let delay = self.backoff.record_failure(&user.local_id);
                            warn!(
                                user = %user.local_id,
                                "Failed to start sync: {}, retry in {:.1}s",
                                e,
                                delay.as_secs_f64()
                            );
                        }
                    }
                }
            })
            .await;

        started.into_inner()
    }

    /// Rescan accounts every poll interval until shut down.
    pub async fn poll_loop(&self) {
        let mut interval = tokio::time::interval(self.settings.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(
            "Account poll loop started (every {}s)",
            self.settings.poll_interval.as_secs()
        );
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = interval.tick() => {
                    let started = self.scan().await;
                    if started > 0 {
                        info!("Started {} dispatcher(s)", started);
                    }
                }
            }
        }
        debug!("Account poll loop stopped");
    }

    /// Run `poll_loop` as a tracked task.
    pub fn spawn_poll_loop(self: &Arc<Self>) {
        let this = Arc::clone(self);
        self.tracker.spawn(async move { this.poll_loop().await });
    }

    /// Store a new account's credential and bring it online.
    pub async fn register_account(&self, user: &User) -> Result<bool, AppError> {
        self.store.store_credential(user).await?;
        info!(user = %user.local_id, "Registered account");
        self.on_account_ready(user).await
    }

    fn pairing_context(&self) -> PairingContext {
        PairingContext {
            config: Arc::clone(&self.config),
            timeout: self.settings.pairing_timeout,
            stale_event_grace: self.settings.stale_event_grace,
            tracker: self.tracker.clone(),
        }
    }

    fn syncing(&self, user: &str) -> Result<Arc<SyncHandle>, PairingError> {
        self.registry
            .get(user)
            .filter(|handle| handle.is_active())
            .ok_or_else(|| PairingError::NotSyncing {
                user: user.to_string(),
            })
    }

    /// Start a device-add conversation for `user` on `platform`.
    pub async fn request_device_add(
        &self,
        user: &str,
        platform: &str,
    ) -> Result<PairingHandle, PairingError> {
        let binding = require_binding(self.config.as_ref(), platform)?;
        let handle = self.syncing(user)?;
        start_pairing(&handle, binding, &self.pairing_context()).await
    }

    /// Ask the bridge bot to list linked devices. Returns the command's event id.
    pub async fn list_devices(&self, user: &str, platform: &str) -> Result<String, PairingError> {
        let binding = require_binding(self.config.as_ref(), platform)?;
        let command = binding.devices_command()?;
        let handle = self.syncing(user)?;

        let room = handle
            .lock()
            .await
            .management_room(platform)
            .cloned()
            .ok_or_else(|| PairingError::NoManagementRoom {
                user: user.to_string(),
                platform: platform.to_string(),
            })?;

        Ok(handle.client().send_text(&room, command).await?)
    }

    /// Send text to the contact room for `peer` on `platform`.
    ///
    /// A room attributed to the platform is preferred over one whose
    /// platform is unknown.
    pub async fn send_to_contact(
        &self,
        user: &str,
        platform: &str,
        peer: &str,
        text: &str,
    ) -> Result<String, PairingError> {
        let handle = self.syncing(user)?;
        let candidates: Vec<RoomRecord> = self
            .store
            .find_rooms_by_peer(user, peer)
            .await?
            .into_iter()
            .filter(|room| room.kind == RoomKind::Contact)
            .collect();

        let room = candidates
            .iter()
            .find(|room| room.platform.as_deref() == Some(platform))
            .or_else(|| candidates.iter().find(|room| room.platform.is_none()))
            .ok_or_else(|| PairingError::NoContactRoom {
                peer: peer.to_string(),
                platform: platform.to_string(),
            })?;

        Ok(handle.client().send_text(&room.room_id, text).await?)
    }

    /// Stop every dispatcher and the poll loop, and wait for them.
    ///
    /// Pending pairings resolve as interrupted.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let count = self.registry.shutdown_all();
        info!("Shutting down {} dispatcher(s)", count);
        self.tracker.close();
        self.tracker.wait().await;
    }
}
