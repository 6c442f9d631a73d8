//! Shared types used across the crate.

use std::fmt;

/// Fully qualified chat-network user identifier (`@local:domain`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Localpart of the id (`alice` for `@alice:example.org`).
    pub fn localpart(&self) -> &str {
        let trimmed = self.0.strip_prefix('@').unwrap_or(&self.0);
        trimmed.split(':').next().unwrap_or(trimmed)
    }

    /// Whether this looks like a full `@local:domain` identifier.
    pub fn is_qualified(&self) -> bool {
        match self.0.strip_prefix('@') {
            Some(rest) => match rest.split_once(':') {
                Some((local, domain)) => !local.is_empty() && !domain.is_empty(),
                None => false,
            },
            None => false,
        }
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Chat-network room identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoomId(pub String);

impl RoomId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An end-user account on the chat network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    /// Local account name, used as the store key.
    pub local_id: String,
    /// Protocol-level identity.
    pub user_id: UserId,
    /// Access token for the protocol client.
    pub access_token: String,
}

impl User {
    pub fn new(
        local_id: impl Into<String>,
        user_id: impl Into<String>,
        access_token: impl Into<String>,
    ) -> Self {
        Self {
            local_id: local_id.into(),
            user_id: UserId::new(user_id),
            access_token: access_token.into(),
        }
    }
}

/// Persisted room classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoomKind {
    /// 1:1 control room between the user and a bridge bot.
    Management,
    /// Conversation with a third-party contact.
    Contact,
    /// Membership does not cleanly match either shape.
    Unclassified,
}

impl RoomKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Management => "management",
            Self::Contact => "contact",
            Self::Unclassified => "unclassified",
        }
    }
}

/// A room owned by a user, as stored.
///
/// Keyed by `(owner, room_id)`. Once written only `peer_label` may change,
/// and only from empty to set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomRecord {
    pub room_id: RoomId,
    /// `local_id` of the owning user.
    pub owner: String,
    pub platform: Option<String>,
    pub peer_label: Option<String>,
    pub kind: RoomKind,
    pub is_bridge: bool,
}

impl RoomRecord {
    /// Management room between `owner` and the bot of `platform`.
    pub fn management(
        owner: impl Into<String>,
        room_id: RoomId,
        platform: impl Into<String>,
        bot: &UserId,
    ) -> Self {
        Self {
            room_id,
            owner: owner.into(),
            platform: Some(platform.into()),
            peer_label: Some(bot.to_string()),
            kind: RoomKind::Management,
            is_bridge: true,
        }
    }

    /// Contact room for `owner`, optionally attributed to a platform.
    pub fn contact(
        owner: impl Into<String>,
        room_id: RoomId,
        platform: Option<String>,
        peer_label: Option<String>,
    ) -> Self {
        Self {
            room_id,
            owner: owner.into(),
            platform,
            peer_label,
            kind: RoomKind::Contact,
            is_bridge: false,
        }
    }
}
