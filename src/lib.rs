//! ShortMesh sync - bridge sync and device-pairing orchestrator.
//!
//! Keeps one protocol event stream alive per account, fans its events out to
//! per-platform pairing conversations and room bookkeeping, and drives the
//! scripted device-pairing dialogue with each platform's bridge bot.

pub mod bridge;
pub mod common;
pub mod config;
pub mod protocol;
pub mod store;

pub use bridge::{BridgeOrchestrator, PairingHandle, PairingResult, PairingState};
pub use common::error::{AppError, ConfigError, PairingError, ProtocolError, StoreError};
pub use common::types::{RoomId, RoomKind, RoomRecord, User, UserId};
pub use config::{load_and_validate, BridgeCatalog, Config, ConfigProvider};
pub use protocol::{ProtocolClient, ProtocolConnector};
pub use store::{MemoryStore, SessionStore, SharedSessionStore};
