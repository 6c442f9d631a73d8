//! Error types for the crate.

use thiserror::Error;

/// Top-level application error.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Pairing error: {0}")]
    Pairing(#[from] PairingError),
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    IoError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {message}")]
    ParseError { message: String },

    #[error("Config validation failed: {message}")]
    ValidationError { message: String },

    #[error("No bridge configured for platform '{platform}'")]
    MissingBinding { platform: String },

    #[error("Bridge '{platform}' has no '{command}' command configured")]
    MissingCommand { platform: String, command: String },
}

/// Chat-protocol errors (sync, send, join, media).
///
/// Any of these terminates the dispatcher that hit it; the orchestrator's
/// poll loop restarts it on a later scan.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Sync failed: {message}")]
    Sync { message: String },

    #[error("Sync already running for {user}")]
    SyncAlreadyRunning { user: String },

    #[error("Failed to send to {room}: {message}")]
    Send { room: String, message: String },

    #[error("Failed to join {room}: {message}")]
    Join { room: String, message: String },

    #[error("Failed to create room with {invitee}: {message}")]
    CreateRoom { invitee: String, message: String },

    #[error("Failed to download media '{uri}': {message}")]
    Media { uri: String, message: String },

    #[error("Event stream closed")]
    StreamClosed,
}

/// Session/room store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store backend error: {message}")]
    Backend { message: String },
}

/// Errors that stop a pairing attempt from starting, or a contact send.
///
/// Once a pairing session is running its failures are delivered through the
/// session result instead.
#[derive(Debug, Error)]
pub enum PairingError {
    #[error("No active sync for user '{user}'")]
    NotSyncing { user: String },

    #[error("No management room for '{user}' on '{platform}'")]
    NoManagementRoom { user: String, platform: String },

    #[error("A pairing for '{user}' on '{platform}' is already awaiting a reply")]
    AlreadyPairing { user: String, platform: String },

    #[error("No contact room for '{peer}' on '{platform}'")]
    NoContactRoom { peer: String, platform: String },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result type alias using AppError.
pub type Result<T> = std::result::Result<T, AppError>;

/// Result type alias for protocol operations.
pub type ProtocolResult<T> = std::result::Result<T, ProtocolError>;

/// Result type alias for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;
