//! The server side of save and sync.

use std::cell::RefCell;
use std::collections::HashMap;
use std::future::Future;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

use crate::document::{DocumentOptions, ReplicatedDocument};
use crate::{CrdtError, RemoteError};

/// Server reply to a pushed delta.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushAck {
    /// Server revision after applying the delta.
    pub new_sequence: u64,
}

/// Everything a client needs to rebuild its baseline.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteState {
    pub flattened_text: String,
    /// Snapshot bytes, as produced by [`ReplicatedDocument::export_snapshot`].
    pub replicated_state: Vec<u8>,
    pub sequence: u64,
}

/// Transport to the document server.
///
/// Every push carries the sender's session id so the server can attribute the
/// change. Each successful push bumps the server revision by one.
pub trait DocumentRemote {
    fn push_update(
        &self,
        document_id: &str,
        delta: &[u8],
        session_id: &str,
    ) -> impl Future<Output = Result<PushAck, RemoteError>>;

    fn fetch_document_state(
        &self,
        document_id: &str,
    ) -> impl Future<Output = Result<RemoteState, RemoteError>>;
}

impl<R: DocumentRemote> DocumentRemote for Rc<R> {
    fn push_update(
        &self,
        document_id: &str,
        delta: &[u8],
        session_id: &str,
    ) -> impl Future<Output = Result<PushAck, RemoteError>> {
        (**self).push_update(document_id, delta, session_id)
    }

    fn fetch_document_state(
        &self,
        document_id: &str,
    ) -> impl Future<Output = Result<RemoteState, RemoteError>> {
        (**self).fetch_document_state(document_id)
    }
}

struct StoredDocument {
    replica: ReplicatedDocument,
    sequence: u64,
    last_writer: Option<SmolStr>,
}

#[derive(Default)]
struct MemoryStore {
    documents: HashMap<SmolStr, StoredDocument>,
    fail_next: Option<RemoteError>,
}

/// In-process server holding one replica per document.
///
/// Clones share the same store, so several sessions can talk to it at once.
#[derive(Clone, Default)]
pub struct MemoryRemote {
    options: DocumentOptions,
    store: Rc<RefCell<MemoryStore>>,
}

impl MemoryRemote {
    pub fn new(options: DocumentOptions) -> Self {
        Self {
            options,
            store: Rc::default(),
        }
    }

    /// Create or replace a document at revision 0.
    pub fn insert_document(&self, document_id: &str, text: &str) -> Result<(), CrdtError> {
        let replica = ReplicatedDocument::from_plain_text(&self.options, text)?;
        self.store.borrow_mut().documents.insert(
            SmolStr::new(document_id),
            StoredDocument {
                replica,
                sequence: 0,
                last_writer: None,
            },
        );
        Ok(())
    }

    /// Make the next call of either kind fail with `error`.
    pub fn fail_next(&self, error: RemoteError) {
        self.store.borrow_mut().fail_next = Some(error);
    }

    pub fn text(&self, document_id: &str) -> Option<String> {
        let store = self.store.borrow();
        let stored = store.documents.get(document_id)?;
        Some(stored.replica.flatten().to_owned())
    }

    pub fn sequence(&self, document_id: &str) -> Option<u64> {
        let store = self.store.borrow();
        store.documents.get(document_id).map(|stored| stored.sequence)
    }

    /// Session id attached to the most recent accepted push.
    pub fn last_writer(&self, document_id: &str) -> Option<SmolStr> {
        let store = self.store.borrow();
        store.documents.get(document_id)?.last_writer.clone()
    }

    fn take_failure(&self) -> Result<(), RemoteError> {
        match self.store.borrow_mut().fail_next.take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

impl DocumentRemote for MemoryRemote {
    async fn push_update(
        &self,
        document_id: &str,
        delta: &[u8],
        session_id: &str,
    ) -> Result<PushAck, RemoteError> {
        self.take_failure()?;
        let mut store = self.store.borrow_mut();
        let stored = store
            .documents
            .get_mut(document_id)
            .ok_or_else(|| RemoteError::UnknownDocument(SmolStr::new(document_id)))?;

        stored
            .replica
            .apply_delta(delta)
            .map_err(|e| RemoteError::Rejected(e.to_string()))?;
        stored.sequence += 1;
        stored.last_writer = Some(SmolStr::new(session_id));

        tracing::debug!(
            document_id,
            session_id,
            sequence = stored.sequence,
            delta_len = delta.len(),
            "accepted update"
        );
        Ok(PushAck {
            new_sequence: stored.sequence,
        })
    }

    async fn fetch_document_state(&self, document_id: &str) -> Result<RemoteState, RemoteError> {
        self.take_failure()?;
        let store = self.store.borrow();
        let stored = store
            .documents
            .get(document_id)
            .ok_or_else(|| RemoteError::UnknownDocument(SmolStr::new(document_id)))?;

        let replicated_state = stored
            .replica
            .export_snapshot()
            .map_err(|e| RemoteError::Transport(e.to_string()))?;
        Ok(RemoteState {
            flattened_text: stored.replica.flatten().to_owned(),
            replicated_state,
            sequence: stored.sequence,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_push_bumps_sequence() {
        let remote = MemoryRemote::default();
        remote.insert_document("doc", "a\n").unwrap();

        let state = remote.fetch_document_state("doc").await.unwrap();
        assert_eq!(state.sequence, 0);
        let base =
            ReplicatedDocument::from_snapshot(&DocumentOptions::default(), &state.replicated_state)
                .unwrap();
        let mut edited = base.fork();
        edited.update_from_plain_text("a\nb\n").unwrap();
        let delta = ReplicatedDocument::diff_delta(&base, &edited).unwrap().unwrap();

        let ack = remote.push_update("doc", &delta, "s1").await.unwrap();
        assert_eq!(ack.new_sequence, 1);
        assert_eq!(remote.text("doc").as_deref(), Some("a\nb\n"));
        assert_eq!(remote.last_writer("doc").as_deref(), Some("s1"));
    }

    #[tokio::test]
    async fn test_unknown_document() {
        let remote = MemoryRemote::default();
        let err = remote.fetch_document_state("nope").await.unwrap_err();
        assert_eq!(err, RemoteError::UnknownDocument(SmolStr::new("nope")));
    }

    #[tokio::test]
    async fn test_injected_failure_is_one_shot() {
        let remote = MemoryRemote::default();
        remote.insert_document("doc", "").unwrap();
        remote.fail_next(RemoteError::Transport("offline".into()));

        assert!(remote.fetch_document_state("doc").await.is_err());
        assert!(remote.fetch_document_state("doc").await.is_ok());
    }

    #[tokio::test]
    async fn test_garbage_delta_rejected() {
        let remote = MemoryRemote::default();
        remote.insert_document("doc", "x").unwrap();
        let err = remote.push_update("doc", b"not a delta", "s1").await.unwrap_err();
        assert!(matches!(err, RemoteError::Rejected(_)));
        assert_eq!(remote.sequence("doc"), Some(0));
    }
}
