//! Error types for CRDT and session operations.

use mergepad_core::DiffError;
use smol_str::SmolStr;
use thiserror::Error;

/// Errors that can occur during CRDT operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum CrdtError {
    /// Failed to import CRDT data.
    #[error("failed to import CRDT data: {0}")]
    Import(String),

    /// Failed to export CRDT data.
    #[error("failed to export CRDT data: {0}")]
    Export(String),

    /// The CRDT rejected the text splice computed from a plain-text update.
    #[error(
        "text splice rejected ({document_len} -> {target_len} bytes): {reason}"
    )]
    Splice {
        document_len: usize,
        target_len: usize,
        reason: String,
    },

    /// The remote side failed.
    #[error(transparent)]
    Remote(#[from] RemoteError),
}

impl From<loro::LoroError> for CrdtError {
    fn from(e: loro::LoroError) -> Self {
        CrdtError::Import(e.to_string())
    }
}

/// Failures reported by a [`DocumentRemote`](crate::DocumentRemote).
///
/// All of these are transient from the session's point of view: local state is
/// left untouched and the operation can be retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum RemoteError {
    /// The request never got a usable answer.
    #[error("transport error: {0}")]
    Transport(String),

    /// The server answered but refused the request.
    #[error("rejected by server: {0}")]
    Rejected(String),

    #[error("unknown document: {0}")]
    UnknownDocument(SmolStr),
}

/// Caller-side sequencing mistakes on an [`EditorSession`](crate::EditorSession).
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum SessionError {
    /// Hunk accept/discard with no mounted surface or no hunks.
    #[error("no active diff session")]
    NoActiveDiff,

    /// A save or sync is in flight.
    #[error("a save or sync is already in progress")]
    Busy,

    /// The session was torn down.
    #[error("session has been torn down")]
    TornDown,

    #[error(transparent)]
    Hunk(#[from] DiffError),

    #[error(transparent)]
    Crdt(#[from] CrdtError),
}
