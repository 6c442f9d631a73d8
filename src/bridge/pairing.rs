//! Device-pairing conversation with a bridge bot.
//!
//! One `PairingSession` per (user, platform) attempt:
//!
//! ```text
//! Idle -> AwaitingReply -> Succeeded | Failed | Cancelled
//! ```
//!
//! Every transition out of a non-terminal state is a compare-and-set, so the
//! first resolution wins and the result is delivered exactly once no matter
//! how a bot reply, a cancel, a timeout and a dispatcher shutdown interleave.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::common::error::PairingError;
use crate::common::messages::{EventContent, MessageKind, SyncEvent};
use crate::common::types::{RoomId, UserId};
use crate::config::provider::{BridgeBinding, ConfigProvider, SharedConfigProvider};
use crate::protocol::ProtocolClient;

use super::registry::SyncHandle;

/// Pairing conversation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PairingState {
    Idle = 0,
    AwaitingReply = 1,
    Succeeded = 2,
    Failed = 3,
    Cancelled = 4,
}

impl PairingState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            1 => Self::AwaitingReply,
            2 => Self::Succeeded,
            3 => Self::Failed,
            _ => Self::Cancelled,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }
}

/// Terminal outcome delivered to the pairing consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairingResult {
    /// Bot sent a pairing artifact (QR code image).
    Linked(Vec<u8>),
    /// Bot confirmed the login.
    Completed,
    /// Bot reported failure, or the artifact could not be fetched.
    Failed,
    /// No terminal reply within the pairing timeout.
    TimedOut,
    /// Cancelled by the consumer.
    Cancelled,
    /// Dispatcher stopped before the bot answered.
    Interrupted,
}

impl PairingResult {
    /// The artifact bytes, `None` for every non-artifact outcome.
    pub fn artifact(&self) -> Option<&[u8]> {
        match self {
            Self::Linked(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn into_artifact(self) -> Option<Vec<u8>> {
        match self {
            Self::Linked(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// State a session lands in with this result.
    fn state(&self) -> PairingState {
        match self {
            Self::Linked(_) | Self::Completed => PairingState::Succeeded,
            Self::Cancelled => PairingState::Cancelled,
            Self::Failed | Self::TimedOut | Self::Interrupted => PairingState::Failed,
        }
    }
}

/// How a candidate bot event bears on the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Ignore,
    Success,
    Failure,
    /// Download this media URI and succeed with its bytes.
    Artifact(String),
}

/// Classify a bot event for a session on `platform`.
///
/// Events older than `not_before` are history replay and ignored. A notice
/// carrying the failure token fails the session even if it also matches the
/// success template.
pub fn evaluate(
    event: &SyncEvent,
    platform: &str,
    config: &dyn ConfigProvider,
    not_before: DateTime<Utc>,
) -> Verdict {
    if event.timestamp < not_before {
        return Verdict::Ignore;
    }

    match &event.content {
        EventContent::Message { kind, body } => {
            if *kind == MessageKind::Notice && config.matches_failure(platform, body) {
                Verdict::Failure
            } else if config.matches_success_pattern(platform, body) {
                Verdict::Success
            } else {
                Verdict::Ignore
            }
        }
        EventContent::Media { uri, .. } => Verdict::Artifact(uri.clone()),
        _ => Verdict::Ignore,
    }
}

/// One device-add attempt.
pub struct PairingSession {
    user: String,
    platform: String,
    room_id: RoomId,
    bot: UserId,
    cancel_command: Option<String>,
    state: AtomicU8,
    started_at: DateTime<Utc>,
    client: Arc<dyn ProtocolClient>,
    events_tx: mpsc::UnboundedSender<SyncEvent>,
    result_tx: Mutex<Option<oneshot::Sender<PairingResult>>>,
    cancel: CancellationToken,
}

impl PairingSession {
    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn platform(&self) -> &str {
        &self.platform
    }

    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    pub fn state(&self) -> PairingState {
        PairingState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn is_awaiting_reply(&self) -> bool {
        self.state() == PairingState::AwaitingReply
    }

    /// Whether an event in `room` from `sender` belongs to this session.
    pub fn accepts(&self, room: &RoomId, sender: &UserId) -> bool {
        &self.room_id == room && &self.bot == sender
    }

    /// Hand a bot event to the session task. Order is preserved per session.
    pub fn deliver(&self, event: SyncEvent) -> bool {
        self.events_tx.send(event).is_ok()
    }

    /// Move to `to` unless already terminal. Only the winner may deliver.
    fn transition(&self, to: PairingState) -> bool {
        self.state
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                if PairingState::from_u8(current).is_terminal() {
                    None
                } else {
                    Some(to as u8)
                }
            })
            .is_ok()
    }

    fn mark_awaiting_reply(&self) -> bool {
        self.state
            .compare_exchange(
                PairingState::Idle as u8,
                PairingState::AwaitingReply as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    fn send_result(&self, result: PairingResult) {
        let sender = self
            .result_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(tx) = sender {
            // Receiver may be gone if the consumer stopped listening.
            let _ = tx.send(result);
        }
    }

    /// Resolve the session with `result` if it is not already terminal.
    pub fn resolve(&self, result: PairingResult) -> bool {
        if !self.transition(result.state()) {
            return false;
        }
        info!(
            user = %self.user,
            platform = %self.platform,
            state = ?result.state(),
            "Pairing resolved"
        );
        self.send_result(result);
        self.cancel.cancel();
        true
    }

    /// Resolve as interrupted because the owning dispatcher stopped.
    pub fn interrupt(&self) -> bool {
        self.resolve(PairingResult::Interrupted)
    }

    /// Cancel from any non-terminal state.
    ///
    /// `Cancelled` is delivered before the bridge's cancel command goes out.
    /// The command is best-effort; failures are logged.
    pub async fn cancel(&self) -> bool {
        if !self.transition(PairingState::Cancelled) {
            return false;
        }
        info!(user = %self.user, platform = %self.platform, "Pairing cancelled");
        self.send_result(PairingResult::Cancelled);
        self.cancel.cancel();

        match self.cancel_command.as_deref() {
            Some(command) => {
                if let Err(e) = self.client.send_text(&self.room_id, command).await {
                    warn!(
                        user = %self.user,
                        platform = %self.platform,
                        "Failed to send cancel command: {}", e
                    );
                }
            }
            None => debug!(platform = %self.platform, "No cancel command configured"),
        }
        true
    }
}

/// Consumer side of a pairing session.
pub struct PairingHandle {
    session: Arc<PairingSession>,
    result_rx: Option<oneshot::Receiver<PairingResult>>,
    result: Option<PairingResult>,
}

impl PairingHandle {
    pub fn session(&self) -> &Arc<PairingSession> {
        &self.session
    }

    pub fn state(&self) -> PairingState {
        self.session.state()
    }

    /// Wait for the terminal result. Repeated calls return the same result,
    /// and dropping an unfinished wait loses nothing.
    pub async fn wait(&mut self) -> PairingResult {
        if let Some(result) = &self.result {
            return result.clone();
        }
        let result = match self.result_rx.as_mut() {
            Some(rx) => rx.await.unwrap_or(PairingResult::Interrupted),
            None => PairingResult::Interrupted,
        };
        self.result_rx = None;
        self.result = Some(result.clone());
        result
    }

    /// Wait and return only the artifact, `None` on every other outcome.
    pub async fn outcome(mut self) -> Option<Vec<u8>> {
        self.wait().await.into_artifact()
    }

    /// Cancel the attempt, e.g. when the consumer disconnects.
    pub async fn cancel(&self) -> bool {
        self.session.cancel().await
    }
}

/// Shared settings for pairing sessions.
#[derive(Clone)]
pub struct PairingContext {
    pub config: SharedConfigProvider,
    pub timeout: Duration,
    pub stale_event_grace: Duration,
    pub tracker: TaskTracker,
}

/// Start a pairing attempt on `handle`'s management room for `binding`.
///
/// The session is registered and awaiting a reply before the login command
/// goes out, so a fast bot reply is never missed.
pub async fn start_pairing(
    handle: &SyncHandle,
    binding: &BridgeBinding,
    ctx: &PairingContext,
) -> Result<PairingHandle, PairingError> {
    let login = binding.login_command()?.to_string();
    let local_id = handle.user().local_id.clone();

    let (session, result_rx, events_rx, room_id) = {
        let mut rooms = handle.lock().await;

        let room_id = rooms
            .management_room(&binding.platform)
            .cloned()
            .ok_or_else(|| PairingError::NoManagementRoom {
                user: local_id.clone(),
                platform: binding.platform.clone(),
            })?;

        if let Some(existing) = rooms.pairing(&binding.platform) {
            if !existing.state().is_terminal() {
                return Err(PairingError::AlreadyPairing {
                    user: local_id,
                    platform: binding.platform.clone(),
                });
            }
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (result_tx, result_rx) = oneshot::channel();
        let session = Arc::new(PairingSession {
            user: local_id.clone(),
            platform: binding.platform.clone(),
            room_id: room_id.clone(),
            bot: binding.bot.clone(),
            cancel_command: binding.cancel_command().ok().map(str::to_string),
            state: AtomicU8::new(PairingState::Idle as u8),
            started_at: Utc::now(),
            client: Arc::clone(handle.client()),
            events_tx,
            result_tx: Mutex::new(Some(result_tx)),
            cancel: handle.shutdown_token().child_token(),
        });
        rooms.register_pairing(&session);
        session.mark_awaiting_reply();
        (session, result_rx, events_rx, room_id)
    };

    ctx.tracker.spawn(run_session(
        Arc::clone(&session),
        events_rx,
        ctx.clone(),
    ));

    info!(
        user = %local_id,
        platform = %binding.platform,
        room = %room_id,
        "Starting pairing"
    );
    if let Err(e) = handle.client().send_text(&room_id, &login).await {
        session.resolve(PairingResult::Failed);
        return Err(e.into());
    }

    Ok(PairingHandle {
        session,
        result_rx: Some(result_rx),
        result: None,
    })
}

/// Oldest origin timestamp a session still considers. Saturates at the
/// earliest representable time for out-of-range grace periods.
fn stale_cutoff(started_at: DateTime<Utc>, grace: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(grace)
        .ok()
        .and_then(|grace| started_at.checked_sub_signed(grace))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

async fn run_session(
    session: Arc<PairingSession>,
    mut events: mpsc::UnboundedReceiver<SyncEvent>,
    ctx: PairingContext,
) {
    let not_before = stale_cutoff(session.started_at, ctx.stale_event_grace);
    let deadline = tokio::time::sleep(ctx.timeout);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            biased;

            _ = session.cancel.cancelled() => {
                session.interrupt();
                return;
            }

            _ = &mut deadline => {
                if session.resolve(PairingResult::TimedOut) {
                    warn!(
                        user = %session.user,
                        platform = %session.platform,
                        "Pairing timed out after {}s",
                        ctx.timeout.as_secs()
                    );
                }
                return;
            }

            event = events.recv() => {
                let Some(event) = event else {
                    session.interrupt();
                    return;
                };
                if session.state().is_terminal() {
                    return;
                }

                match evaluate(&event, &session.platform, ctx.config.as_ref(), not_before) {
                    Verdict::Ignore => {
                        debug!(
                            user = %session.user,
                            platform = %session.platform,
                            event = %event.event_id,
                            "Ignoring bot event"
                        );
                    }
                    Verdict::Success => {
                        session.resolve(PairingResult::Completed);
                        return;
                    }
                    Verdict::Failure => {
                        session.resolve(PairingResult::Failed);
                        return;
                    }
                    Verdict::Artifact(uri) => {
                        let result = match session.client.download_media(&uri).await {
                            Ok(bytes) => PairingResult::Linked(bytes),
                            Err(e) => {
                                warn!(
                                    user = %session.user,
                                    platform = %session.platform,
                                    "Failed to download pairing artifact: {}", e
                                );
                                PairingResult::Failed
                            }
                        };
                        session.resolve(result);
                        return;
                    }
                }
            }
        }
    }
}
