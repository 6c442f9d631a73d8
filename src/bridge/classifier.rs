//! Room classification from membership and invites.
//!
//! A management room is the 1:1 room between the owner and exactly one
//! bridge bot. A contact room holds the owner, at most one bot and the
//! platform's puppet for the contact. Anything else is left unclassified and
//! never persisted.

use std::collections::HashMap;

use tracing::{debug, info, warn};

use crate::common::error::ProtocolResult;
use crate::common::messages::{EventContent, SyncEvent};
use crate::common::types::{RoomId, RoomRecord, UserId};
use crate::config::provider::ConfigProvider;
use crate::protocol::ProtocolClient;
use crate::store::SessionStore;

use super::registry::SyncHandle;

/// Outcome of classifying one room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomClass {
    Management { platform: String },
    Contact { platform: Option<String> },
    Unclassified,
}

/// Classify a room from its joined members.
pub fn classify_members(
    owner: &UserId,
    members: &[UserId],
    is_space: bool,
    config: &dyn ConfigProvider,
) -> RoomClass {
    if is_space || !members.contains(owner) {
        return RoomClass::Unclassified;
    }

    let bots: Vec<&str> = members
        .iter()
        .filter_map(|member| config.platform_for_bot(member))
        .collect();

    match (members.len(), bots.as_slice()) {
        (2, [platform]) => RoomClass::Management {
            platform: platform.to_string(),
        },
        (n, [platform]) if n >= 3 => RoomClass::Contact {
            platform: Some(platform.to_string()),
        },
        (n, []) if n >= 2 => {
            let puppets: Vec<&str> = members
                .iter()
                .filter_map(|member| config.platform_for_puppet(member))
                .collect();
            match puppets.as_slice() {
                [platform, rest @ ..] if rest.iter().all(|p| p == platform) => RoomClass::Contact {
                    platform: Some(platform.to_string()),
                },
                _ => RoomClass::Unclassified,
            }
        }
        _ => RoomClass::Unclassified,
    }
}

/// Fetch membership and classify `room` for the client's user.
pub async fn classify_room(
    client: &dyn ProtocolClient,
    room: &RoomId,
    config: &dyn ConfigProvider,
) -> ProtocolResult<RoomClass> {
    let is_space = client.is_space(room).await?;
    let members = client.list_members(room).await?;
    Ok(classify_members(client.user_id(), &members, is_space, config))
}

/// Platform of a bridge-initiated contact invite.
///
/// True when the sender is a configured bot and the room is not that bot's
/// management room.
pub fn is_bridge_invite_for_contact(
    event: &SyncEvent,
    management: &HashMap<RoomId, String>,
    config: &dyn ConfigProvider,
) -> Option<String> {
    if !matches!(event.content, EventContent::Invite { .. }) {
        return None;
    }
    let platform = config.platform_for_bot(&event.sender)?;
    match management.get(&event.room_id) {
        Some(existing) if existing == platform => None,
        _ => Some(platform.to_string()),
    }
}

/// Persist a classification for the handle's user.
///
/// Writes go through the user's mutex. A second management room for a
/// platform that already has one is not recorded. Store failures are logged
/// and the in-memory view is still updated.
pub async fn record_class(
    handle: &SyncHandle,
    store: &dyn SessionStore,
    config: &dyn ConfigProvider,
    room: &RoomId,
    class: &RoomClass,
    peer_label: Option<String>,
) -> RoomClass {
    let owner = handle.user().local_id.as_str();
    let mut rooms = handle.lock().await;

    let record = match class {
        RoomClass::Management { platform } => {
            match rooms.management_room(platform) {
                Some(existing) if existing != room => {
                    debug!(
                        user = owner,
                        platform = %platform,
                        room = %room,
                        "Management room already exists, not recording another"
                    );
                    return RoomClass::Unclassified;
                }
                _ => {}
            }
            let Some(binding) = config.binding(platform) else {
                return RoomClass::Unclassified;
            };
            rooms.management.insert(room.clone(), platform.clone());
            RoomRecord::management(owner, room.clone(), platform.as_str(), &binding.bot)
        }
        RoomClass::Contact { platform } => {
            if rooms.management.contains_key(room) {
                return RoomClass::Unclassified;
            }
            rooms.contacts.insert(room.clone());
            RoomRecord::contact(owner, room.clone(), platform.clone(), peer_label)
        }
        RoomClass::Unclassified => {
            debug!(user = owner, room = %room, "Room left unclassified");
            return RoomClass::Unclassified;
        }
    };

    match store.upsert_room(&record).await {
        Ok(true) => info!(
            user = owner,
            room = %room,
            kind = record.kind.as_str(),
            platform = ?record.platform,
            "Recorded room"
        ),
        Ok(false) => {}
        Err(e) => warn!(user = owner, room = %room, "Failed to store room: {}", e),
    }
    class.clone()
}
