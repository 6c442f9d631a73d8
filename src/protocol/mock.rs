//! Mock protocol client for testing.
//!
//! Records every outbound call and replays events pushed through `push` into
//! whichever `sync` call is currently running.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{ProtocolClient, ProtocolConnector};
use crate::common::error::{ProtocolError, ProtocolResult};
use crate::common::messages::{EventContent, MessageKind, SyncEvent};
use crate::common::types::{RoomId, User, UserId};

/// Item queued for the sync stream.
#[derive(Debug)]
pub enum FeedItem {
    Event(SyncEvent),
    /// Make the running `sync` call fail.
    Fail(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SentMessage {
    pub room: RoomId,
    pub text: String,
}

#[derive(Default)]
struct MockState {
    feed: Option<mpsc::UnboundedReceiver<FeedItem>>,
    sent: Vec<SentMessage>,
    joins: Vec<RoomId>,
    created: Vec<(UserId, RoomId)>,
    joined_rooms: Vec<RoomId>,
    members: HashMap<RoomId, Vec<UserId>>,
    spaces: HashSet<RoomId>,
    media: HashMap<String, Vec<u8>>,
    fail_sends: bool,
    stall_sends: bool,
    fail_joins: bool,
    syncs_started: usize,
    next_room: u32,
    next_event: u32,
}

/// Mock protocol client for testing.
#[derive(Clone)]
pub struct MockProtocolClient {
    user_id: UserId,
    feed_tx: mpsc::UnboundedSender<FeedItem>,
    state: Arc<Mutex<MockState>>,
}

impl MockProtocolClient {
    pub fn new(user_id: impl Into<String>) -> Self {
        let (feed_tx, feed_rx) = mpsc::unbounded_channel();
        let state = MockState {
            feed: Some(feed_rx),
            ..Default::default()
        };
        Self {
            user_id: UserId::new(user_id),
            feed_tx,
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Queue an event for the sync stream.
    pub fn push(&self, event: SyncEvent) {
        let _ = self.feed_tx.send(FeedItem::Event(event));
    }

    /// Queue a sync failure.
    pub fn fail_sync(&self, message: &str) {
        let _ = self.feed_tx.send(FeedItem::Fail(message.to_string()));
    }

    /// Register a joined room and its members.
    pub fn add_room(&self, room: &RoomId, members: &[&UserId]) {
        let mut state = self.state.lock().unwrap();
        if !state.joined_rooms.contains(room) {
            state.joined_rooms.push(room.clone());
        }
        state
            .members
            .insert(room.clone(), members.iter().map(|m| (*m).clone()).collect());
    }

    pub fn mark_space(&self, room: &RoomId) {
        self.state.lock().unwrap().spaces.insert(room.clone());
    }

    pub fn add_media(&self, uri: &str, bytes: &[u8]) {
        self.state
            .lock()
            .unwrap()
            .media
            .insert(uri.to_string(), bytes.to_vec());
    }

    pub fn fail_sends(&self, fail: bool) {
        self.state.lock().unwrap().fail_sends = fail;
    }

    /// Make `send_text` hang forever.
    pub fn stall_sends(&self, stall: bool) {
        self.state.lock().unwrap().stall_sends = stall;
    }

    pub fn fail_joins(&self, fail: bool) {
        self.state.lock().unwrap().fail_joins = fail;
    }

    /// Get sent messages for assertions
    pub fn sent_messages(&self) -> Vec<SentMessage> {
        self.state.lock().unwrap().sent.clone()
    }

    /// Texts sent into one room.
    pub fn sent_to(&self, room: &RoomId) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .sent
            .iter()
            .filter(|msg| &msg.room == room)
            .map(|msg| msg.text.clone())
            .collect()
    }

    pub fn joins(&self) -> Vec<RoomId> {
        self.state.lock().unwrap().joins.clone()
    }

    pub fn created_rooms(&self) -> Vec<(UserId, RoomId)> {
        self.state.lock().unwrap().created.clone()
    }

    pub fn syncs_started(&self) -> usize {
        self.state.lock().unwrap().syncs_started
    }
}

/// Returns the feed receiver to the client when a sync call ends or is dropped.
struct FeedGuard {
    state: Arc<Mutex<MockState>>,
    rx: Option<mpsc::UnboundedReceiver<FeedItem>>,
}

impl Drop for FeedGuard {
    fn drop(&mut self) {
        if let Some(rx) = self.rx.take() {
            if let Ok(mut state) = self.state.lock() {
                state.feed = Some(rx);
            }
        }
    }
}

#[async_trait]
impl ProtocolClient for MockProtocolClient {
    fn user_id(&self) -> &UserId {
        &self.user_id
    }

    async fn sync(&self, sink: mpsc::Sender<SyncEvent>) -> ProtocolResult<()> {
        let rx = {
            let mut state = self.state.lock().unwrap();
            let rx = state.feed.take().ok_or_else(|| ProtocolError::SyncAlreadyRunning {
                user: self.user_id.to_string(),
            })?;
            state.syncs_started += 1;
            rx
        };
        let mut guard = FeedGuard {
            state: Arc::clone(&self.state),
            rx: Some(rx),
        };

        loop {
            let Some(rx) = guard.rx.as_mut() else {
                return Err(ProtocolError::StreamClosed);
            };
            tokio::select! {
                item = rx.recv() => match item {
                    Some(FeedItem::Event(event)) => {
                        if sink.send(event).await.is_err() {
                            return Ok(());
                        }
                    }
                    Some(FeedItem::Fail(message)) => {
                        return Err(ProtocolError::Sync { message });
                    }
                    None => return Err(ProtocolError::StreamClosed),
                },
                _ = sink.closed() => return Ok(()),
            }
        }
    }

    async fn send_text(&self, room: &RoomId, text: &str) -> ProtocolResult<String> {
        let stalled = self.state.lock().unwrap().stall_sends;
        if stalled {
            std::future::pending::<()>().await;
        }
        let mut state = self.state.lock().unwrap();
        if state.fail_sends {
            return Err(ProtocolError::Send {
                room: room.to_string(),
                message: "mock send failure".to_string(),
            });
        }
        state.sent.push(SentMessage {
            room: room.clone(),
            text: text.to_string(),
        });
        state.next_event += 1;
        Ok(format!("$sent{}", state.next_event))
    }

    async fn join_room(&self, room: &RoomId) -> ProtocolResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_joins {
            return Err(ProtocolError::Join {
                room: room.to_string(),
                message: "mock join failure".to_string(),
            });
        }
        state.joins.push(room.clone());
        if !state.joined_rooms.contains(room) {
            state.joined_rooms.push(room.clone());
        }
        Ok(())
    }

    async fn create_direct_room(&self, invitee: &UserId) -> ProtocolResult<RoomId> {
        let mut state = self.state.lock().unwrap();
        state.next_room += 1;
        let room = RoomId::new(format!("!room{}:mock", state.next_room));
        state.created.push((invitee.clone(), room.clone()));
        state.joined_rooms.push(room.clone());
        state
            .members
            .insert(room.clone(), vec![self.user_id.clone(), invitee.clone()]);
        Ok(room)
    }

    async fn list_joined_rooms(&self) -> ProtocolResult<Vec<RoomId>> {
        Ok(self.state.lock().unwrap().joined_rooms.clone())
    }

    async fn list_members(&self, room: &RoomId) -> ProtocolResult<Vec<UserId>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .members
            .get(room)
            .cloned()
            .unwrap_or_default())
    }

    async fn is_space(&self, room: &RoomId) -> ProtocolResult<bool> {
        Ok(self.state.lock().unwrap().spaces.contains(room))
    }

    async fn download_media(&self, uri: &str) -> ProtocolResult<Vec<u8>> {
        self.state
            .lock()
            .unwrap()
            .media
            .get(uri)
            .cloned()
            .ok_or_else(|| ProtocolError::Media {
                uri: uri.to_string(),
                message: "not found".to_string(),
            })
    }
}

/// Connector handing out pre-registered mock clients.
#[derive(Default)]
pub struct MockConnector {
    clients: Mutex<HashMap<String, Arc<MockProtocolClient>>>,
    connects: AtomicUsize,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the client returned for `local_id`.
    pub fn add(&self, local_id: &str, client: Arc<MockProtocolClient>) {
        self.clients
            .lock()
            .unwrap()
            .insert(local_id.to_string(), client);
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProtocolConnector for MockConnector {
    async fn connect(&self, user: &User) -> ProtocolResult<Arc<dyn ProtocolClient>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let client = self
            .clients
            .lock()
            .unwrap()
            .get(&user.local_id)
            .cloned()
            .ok_or_else(|| ProtocolError::Sync {
                message: format!("no mock client for {}", user.local_id),
            })?;
        Ok(client)
    }
}

/// Notice from `sender` in `room`.
pub fn notice(id: &str, room: &RoomId, sender: &UserId, body: &str) -> SyncEvent {
    SyncEvent::new(
        id,
        room.clone(),
        sender.clone(),
        EventContent::Message {
            kind: MessageKind::Notice,
            body: body.to_string(),
        },
    )
}

/// Plain text message from `sender` in `room`.
pub fn text(id: &str, room: &RoomId, sender: &UserId, body: &str) -> SyncEvent {
    SyncEvent::new(
        id,
        room.clone(),
        sender.clone(),
        EventContent::Message {
            kind: MessageKind::Text,
            body: body.to_string(),
        },
    )
}

/// Image from `sender` in `room`.
pub fn image(id: &str, room: &RoomId, sender: &UserId, uri: &str) -> SyncEvent {
    SyncEvent::new(
        id,
        room.clone(),
        sender.clone(),
        EventContent::Media {
            msgtype: "m.image".to_string(),
            body: "qr.png".to_string(),
            uri: uri.to_string(),
            filename: Some("qr.png".to_string()),
        },
    )
}

/// Invite of `invitee` into `room`, sent by `sender`.
pub fn invite(
    id: &str,
    room: &RoomId,
    sender: &UserId,
    invitee: &UserId,
    display_name: Option<&str>,
) -> SyncEvent {
    SyncEvent::new(
        id,
        room.clone(),
        sender.clone(),
        EventContent::Invite {
            invitee: invitee.clone(),
            display_name: display_name.map(str::to_string),
        },
    )
}
