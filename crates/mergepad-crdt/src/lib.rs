//! CRDT-backed save and sync for mergepad editing sessions.
//!
//! This crate provides:
//! - `ReplicatedDocument`: Loro-backed replica with plain-text splicing and deltas
//! - `DocumentRemote`: Trait for the server side, plus the in-process `MemoryRemote`
//! - `SyncCoordinator`: Save/sync state machine over one document's baseline
//! - `EditorSession`: Working/unstaged buffers, hunk accept/discard, dirty tracking

mod coordinator;
mod document;
mod error;
mod remote;
mod session;

pub use coordinator::{CoordinatorState, SaveOutcome, SyncCoordinator, SyncOutcome};
pub use document::{DocumentOptions, ReplicatedDocument};
pub use error::{CrdtError, RemoteError, SessionError};
pub use remote::{DocumentRemote, MemoryRemote, PushAck, RemoteState};
pub use session::EditorSession;

// Re-export Loro types that consumers need
pub use loro::VersionVector;
