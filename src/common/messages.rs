//! Canonical event types flowing out of a user's sync stream.
//!
//! The protocol client translates wire events into `SyncEvent`s; the
//! dispatcher and pairing sessions pattern-match on `EventContent` instead of
//! keeping one channel per event type.

use chrono::{DateTime, Utc};

use crate::common::types::{RoomId, UserId};

/// Message subtype of a text-bearing event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// `m.text`
    Text,
    /// `m.notice` (what bridge bots use for status replies).
    Notice,
    /// `m.emote`
    Emote,
}

impl MessageKind {
    /// Parse a wire `msgtype`. Media types are not message kinds.
    pub fn from_msgtype(msgtype: &str) -> Option<Self> {
        match msgtype {
            "m.text" => Some(Self::Text),
            "m.notice" => Some(Self::Notice),
            "m.emote" => Some(Self::Emote),
            _ => None,
        }
    }
}

/// Payload of a sync event.
#[derive(Debug, Clone, PartialEq)]
pub enum EventContent {
    /// Text-bearing room message.
    Message { kind: MessageKind, body: String },
    /// Room message carrying an attachment (`m.image`, `m.file`, ...).
    Media {
        msgtype: String,
        body: String,
        uri: String,
        filename: Option<String>,
    },
    /// Membership invite; `invitee` is the state key.
    Invite {
        invitee: UserId,
        display_name: Option<String>,
    },
    /// Anything the bridge does not act on.
    Other { event_type: String },
}

/// One event from a user's sync stream, in protocol order.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncEvent {
    pub event_id: String,
    pub room_id: RoomId,
    pub sender: UserId,
    /// Origin server timestamp.
    pub timestamp: DateTime<Utc>,
    pub content: EventContent,
}

impl SyncEvent {
    pub fn new(
        event_id: impl Into<String>,
        room_id: RoomId,
        sender: UserId,
        content: EventContent,
    ) -> Self {
        Self {
            event_id: event_id.into(),
            room_id,
            sender,
            timestamp: Utc::now(),
            content,
        }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Body text for message and media events.
    pub fn body(&self) -> Option<&str> {
        match &self.content {
            EventContent::Message { body, .. } | EventContent::Media { body, .. } => Some(body),
            _ => None,
        }
    }

    /// Whether this is a room message (text or media) rather than state.
    pub fn is_room_message(&self) -> bool {
        matches!(
            self.content,
            EventContent::Message { .. } | EventContent::Media { .. }
        )
    }

    /// For an invite addressed to `user`, returns the invite's display name.
    pub fn invite_for(&self, user: &UserId) -> Option<Option<&str>> {
        match &self.content {
            EventContent::Invite {
                invitee,
                display_name,
            } if invitee == user => Some(display_name.as_deref()),
            _ => None,
        }
    }
}
