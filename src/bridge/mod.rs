//! Bridge sync core.
//!
//! ## Module Structure
//!
//! - `patterns`: success-template compilation and failure-token matching
//! - `classifier`: management / contact room classification
//! - `pairing`: per (user, platform) device-pairing state machine
//! - `registry`: one `SyncHandle` per syncing user
//! - `dispatcher`: per-user sync fan-out
//! - `orchestrator`: account lifecycle and the transport-facing API

pub mod classifier;
pub mod dispatcher;
pub mod orchestrator;
pub mod pairing;
pub mod patterns;
pub mod registry;

pub use classifier::RoomClass;
pub use orchestrator::BridgeOrchestrator;
pub use pairing::{PairingHandle, PairingResult, PairingSession, PairingState};
pub use registry::{SyncHandle, SyncRegistry};
