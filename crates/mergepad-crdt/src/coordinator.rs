//! Save and sync against a [`DocumentRemote`].
//!
//! The coordinator owns the local baseline: the last state agreed with the
//! server, as a replica plus its flattened text. Save pushes the working text
//! as a CRDT delta; sync pulls the server state and merges both local buffers
//! onto it. At most one of the two runs at a time, and nothing is written
//! back once the coordinator has been shut down.

use std::cell::{Cell, RefCell};

use loro::VersionVector;
use mergepad_core::{SequenceStatus, SequenceTracker};
use smol_str::SmolStr;

use crate::document::{DocumentOptions, ReplicatedDocument};
use crate::remote::{DocumentRemote, RemoteState};
use crate::{CrdtError, SessionError};

/// What the coordinator is doing right now.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CoordinatorState {
    #[default]
    Idle,
    Saving,
    Syncing,
    /// Shut down; results of in-flight calls are dropped.
    TornDown,
}

impl CoordinatorState {
    /// Returns true while a save or sync is in flight.
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Saving | Self::Syncing)
    }

    pub fn is_torn_down(&self) -> bool {
        matches!(self, Self::TornDown)
    }
}

/// Result of [`SyncCoordinator::save`].
#[derive(Debug)]
pub enum SaveOutcome {
    /// The server took the delta and no other writer got in between.
    Saved {
        sequence: u64,
        /// New baseline text (the working text that was pushed).
        baseline_text: String,
    },
    /// Working text already matches what the server has from us.
    NoChanges,
    /// The server took the delta but had moved on; a sync is needed.
    Diverged {
        local_sequence: u64,
        server_sequence: u64,
    },
    /// Another save or sync was in flight; nothing was done.
    Busy,
    /// Shut down while waiting on the server; the reply was dropped.
    Cancelled,
    /// Nothing changed locally; retrying is safe.
    Failed(CrdtError),
}

/// Result of [`SyncCoordinator::sync`].
#[derive(Debug)]
pub enum SyncOutcome {
    Synced {
        sequence: u64,
        baseline_text: String,
        /// Working text merged onto the server state.
        working: String,
        /// Unstaged text merged onto the server state.
        unstaged: String,
    },
    Busy,
    Cancelled,
    Failed(CrdtError),
}

struct SyncState {
    baseline: ReplicatedDocument,
    /// Version the server is known to hold everything up to.
    acknowledged: VersionVector,
    /// Replica pushed by a save that did not fast-forward. Until the next
    /// sync it is the merge base, so the pushed edits are not reapplied.
    pushed_ahead: Option<ReplicatedDocument>,
    sequence: SequenceTracker,
}

impl SyncState {
    fn merge_base(&self) -> &ReplicatedDocument {
        self.pushed_ahead.as_ref().unwrap_or(&self.baseline)
    }
}

/// Clears the busy state when the owning save or sync finishes, however it
/// finishes.
struct ActivityGuard<'a> {
    state: &'a Cell<CoordinatorState>,
}

impl Drop for ActivityGuard<'_> {
    fn drop(&mut self) {
        if self.state.get().is_busy() {
            self.state.set(CoordinatorState::Idle);
        }
    }
}

/// Per-session save/sync state machine.
pub struct SyncCoordinator<R> {
    remote: R,
    document_id: SmolStr,
    session_id: SmolStr,
    options: DocumentOptions,
    state: RefCell<SyncState>,
    activity: Cell<CoordinatorState>,
}

impl<R: DocumentRemote> SyncCoordinator<R> {
    /// Fetch the document and start from the server's state.
    pub async fn open(
        remote: R,
        document_id: impl Into<SmolStr>,
        session_id: impl Into<SmolStr>,
        options: DocumentOptions,
    ) -> Result<Self, CrdtError> {
        let document_id = document_id.into();
        let state = remote.fetch_document_state(&document_id).await?;
        Self::from_remote_state(remote, document_id, session_id, options, &state)
    }

    /// Start from an already fetched server state.
    pub fn from_remote_state(
        remote: R,
        document_id: impl Into<SmolStr>,
        session_id: impl Into<SmolStr>,
        options: DocumentOptions,
        state: &RemoteState,
    ) -> Result<Self, CrdtError> {
        let document_id = document_id.into();
        let baseline = decode_remote(&document_id, &options, state)?;
        let session_id = session_id.into();
        tracing::info!(
            document_id = %document_id,
            session_id = %session_id,
            sequence = state.sequence,
            len = baseline.flatten().len(),
            "opened document"
        );
        Ok(Self {
            remote,
            document_id,
            session_id,
            options,
            state: RefCell::new(SyncState {
                acknowledged: baseline.version(),
                baseline,
                pushed_ahead: None,
                sequence: SequenceTracker::synced(state.sequence),
            }),
            activity: Cell::new(CoordinatorState::Idle),
        })
    }

    pub fn remote(&self) -> &R {
        &self.remote
    }

    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn options(&self) -> &DocumentOptions {
        &self.options
    }

    pub fn state(&self) -> CoordinatorState {
        self.activity.get()
    }

    pub fn is_alive(&self) -> bool {
        !self.activity.get().is_torn_down()
    }

    pub fn baseline_text(&self) -> String {
        self.state.borrow().baseline.flatten().to_owned()
    }

    pub fn sequence(&self) -> SequenceTracker {
        self.state.borrow().sequence
    }

    /// True when the server is known to hold changes this session lacks.
    pub fn needs_sync(&self) -> bool {
        let state = self.state.borrow();
        state.sequence.status() == SequenceStatus::Stale || state.pushed_ahead.is_some()
    }

    /// Stop applying results. Idempotent.
    pub fn shutdown(&self) {
        if self.is_alive() {
            tracing::debug!(document_id = %self.document_id, "coordinator shut down");
        }
        self.activity.set(CoordinatorState::TornDown);
    }

    fn begin(&self, activity: CoordinatorState) -> Option<ActivityGuard<'_>> {
        if self.activity.get() != CoordinatorState::Idle {
            return None;
        }
        self.activity.set(activity);
        Some(ActivityGuard {
            state: &self.activity,
        })
    }

    /// Push the working text to the server.
    pub async fn save(&self, working: &str) -> SaveOutcome {
        if !self.is_alive() {
            return SaveOutcome::Cancelled;
        }
        let Some(_guard) = self.begin(CoordinatorState::Saving) else {
            tracing::debug!(document_id = %self.document_id, "save skipped, busy");
            return SaveOutcome::Busy;
        };
        tracing::debug!(
            document_id = %self.document_id,
            working_len = working.len(),
            "save started"
        );

        let (replica, delta) = {
            let state = self.state.borrow();
            let mut replica = state.merge_base().fork();
            if let Err(e) = replica.update_from_plain_text(working) {
                tracing::error!(
                    document_id = %self.document_id,
                    working_len = working.len(),
                    error = %e,
                    "could not apply working text to replica"
                );
                return SaveOutcome::Failed(e);
            }
            match replica.delta_since(&state.acknowledged) {
                Ok(Some(delta)) => (replica, delta),
                Ok(None) => return SaveOutcome::NoChanges,
                Err(e) => {
                    tracing::error!(
                        document_id = %self.document_id,
                        working_len = working.len(),
                        error = %e,
                        "could not export local changes"
                    );
                    return SaveOutcome::Failed(e);
                }
            }
        };

        let pushed = self
            .remote
            .push_update(&self.document_id, &delta, &self.session_id)
            .await;
        if !self.is_alive() {
            tracing::debug!(document_id = %self.document_id, "dropping save result after shutdown");
            return SaveOutcome::Cancelled;
        }
        let ack = match pushed {
            Ok(ack) => ack,
            Err(e) => {
                tracing::warn!(document_id = %self.document_id, error = %e, "save failed");
                return SaveOutcome::Failed(e.into());
            }
        };

        let mut state = self.state.borrow_mut();
        state.acknowledged = replica.version();
        if state.sequence.on_save_acknowledged(ack.new_sequence) {
            let baseline_text = replica.flatten().to_owned();
            state.baseline = replica;
            state.pushed_ahead = None;
            tracing::info!(
                document_id = %self.document_id,
                sequence = ack.new_sequence,
                delta_len = delta.len(),
                "saved"
            );
            SaveOutcome::Saved {
                sequence: ack.new_sequence,
                baseline_text,
            }
        } else {
            state.pushed_ahead = Some(replica);
            let local_sequence = state.sequence.local();
            tracing::info!(
                document_id = %self.document_id,
                local_sequence,
                server_sequence = ack.new_sequence,
                "saved, but the server moved on; sync required"
            );
            SaveOutcome::Diverged {
                local_sequence,
                server_sequence: ack.new_sequence,
            }
        }
    }

    /// Pull the server state and merge the local buffers onto it.
    ///
    /// `buffers` is called once the fetch has completed and must return the
    /// current `(working, unstaged)` texts, so edits made while the request
    /// was in flight are part of the merge.
    pub async fn sync<F>(&self, buffers: F) -> SyncOutcome
    where
        F: FnOnce() -> (String, String),
    {
        if !self.is_alive() {
            return SyncOutcome::Cancelled;
        }
        let Some(_guard) = self.begin(CoordinatorState::Syncing) else {
            tracing::debug!(document_id = %self.document_id, "sync skipped, busy");
            return SyncOutcome::Busy;
        };
        tracing::debug!(document_id = %self.document_id, "sync started");

        let fetched = self.remote.fetch_document_state(&self.document_id).await;
        if !self.is_alive() {
            tracing::debug!(document_id = %self.document_id, "dropping sync result after shutdown");
            return SyncOutcome::Cancelled;
        }
        let remote_state = match fetched {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!(document_id = %self.document_id, error = %e, "sync failed");
                return SyncOutcome::Failed(e.into());
            }
        };
        let server = match decode_remote(&self.document_id, &self.options, &remote_state) {
            Ok(server) => server,
            Err(e) => return SyncOutcome::Failed(e),
        };

        let (working, unstaged) = buffers();
        let mut state = self.state.borrow_mut();
        let merged = merge_onto(&server, &state, &working)
            .and_then(|working| Ok((working, merge_onto(&server, &state, &unstaged)?)));
        let (working, unstaged) = match merged {
            Ok(merged) => merged,
            Err(e) => {
                tracing::error!(
                    document_id = %self.document_id,
                    working_len = working.len(),
                    unstaged_len = unstaged.len(),
                    remote_len = server.flatten().len(),
                    error = %e,
                    "merge onto server state failed"
                );
                return SyncOutcome::Failed(e);
            }
        };

        let baseline_text = server.flatten().to_owned();
        state.acknowledged = server.version();
        state.baseline = server;
        state.pushed_ahead = None;
        state.sequence.on_sync_completed(remote_state.sequence);
        tracing::info!(
            document_id = %self.document_id,
            sequence = remote_state.sequence,
            len = baseline_text.len(),
            "synced"
        );
        SyncOutcome::Synced {
            sequence: remote_state.sequence,
            baseline_text,
            working,
            unstaged,
        }
    }

    /// Make `text` the baseline, as a local edit on top of the current one.
    ///
    /// The restore is recorded as ordinary operations, so the next save pushes
    /// it like any other change. The sequence is left alone.
    pub fn restore_snapshot(&self, text: &str) -> Result<(), SessionError> {
        match self.activity.get() {
            CoordinatorState::Idle => {}
            CoordinatorState::TornDown => return Err(SessionError::TornDown),
            CoordinatorState::Saving | CoordinatorState::Syncing => {
                return Err(SessionError::Busy);
            }
        }

        let mut state = self.state.borrow_mut();
        let mut restored = state.merge_base().fork();
        restored.update_from_plain_text(text).inspect_err(|e| {
            tracing::error!(
                document_id = %self.document_id,
                baseline_len = state.baseline.flatten().len(),
                target_len = text.len(),
                error = %e,
                "could not apply restored text to replica"
            );
        })?;
        state.baseline = restored;
        state.pushed_ahead = None;
        tracing::info!(document_id = %self.document_id, len = text.len(), "restored snapshot");
        Ok(())
    }
}

fn decode_remote(
    document_id: &str,
    options: &DocumentOptions,
    state: &RemoteState,
) -> Result<ReplicatedDocument, CrdtError> {
    let replica = ReplicatedDocument::from_snapshot(options, &state.replicated_state).inspect_err(
        |e| {
            tracing::error!(
                document_id,
                state_len = state.replicated_state.len(),
                error = %e,
                "undecodable server state"
            );
        },
    )?;
    if replica.flatten() != state.flattened_text {
        tracing::warn!(
            document_id,
            replicated_len = replica.flatten().len(),
            flattened_len = state.flattened_text.len(),
            "server text disagrees with its replicated state, using replicated state"
        );
    }
    Ok(replica)
}

/// Replay the local edits in `text` on top of the server replica.
fn merge_onto(
    server: &ReplicatedDocument,
    state: &SyncState,
    text: &str,
) -> Result<String, CrdtError> {
    let mut local = state.merge_base().fork();
    local.update_from_plain_text(text)?;

    let mut merged = server.fork();
    if let Some(delta) = local.delta_since(&state.acknowledged)? {
        merged.apply_delta(&delta)?;
    }
    Ok(merged.flatten().to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::MemoryRemote;

    async fn open(remote: &MemoryRemote, session: &str) -> SyncCoordinator<MemoryRemote> {
        SyncCoordinator::open(remote.clone(), "doc", session, DocumentOptions::default())
            .await
            .unwrap()
    }

    #[test]
    fn test_state_flags() {
        assert_eq!(CoordinatorState::default(), CoordinatorState::Idle);
        assert!(CoordinatorState::Saving.is_busy());
        assert!(!CoordinatorState::TornDown.is_busy());
        assert!(CoordinatorState::TornDown.is_torn_down());
    }

    #[tokio::test]
    async fn test_save_fast_forward() {
        let remote = MemoryRemote::default();
        remote.insert_document("doc", "a\nb\nc\n").unwrap();
        let coordinator = open(&remote, "s1").await;

        let outcome = coordinator.save("a\nX\nc\n").await;
        assert!(matches!(outcome, SaveOutcome::Saved { sequence: 1, .. }));
        assert_eq!(coordinator.baseline_text(), "a\nX\nc\n");
        assert_eq!(coordinator.sequence().local(), 1);
        assert_eq!(remote.text("doc").as_deref(), Some("a\nX\nc\n"));
        assert_eq!(coordinator.state(), CoordinatorState::Idle);
    }

    #[tokio::test]
    async fn test_save_unchanged() {
        let remote = MemoryRemote::default();
        remote.insert_document("doc", "same\n").unwrap();
        let coordinator = open(&remote, "s1").await;

        assert!(matches!(coordinator.save("same\n").await, SaveOutcome::NoChanges));
        assert_eq!(remote.sequence("doc"), Some(0));
    }

    #[tokio::test]
    async fn test_transient_failure_keeps_state() {
        let remote = MemoryRemote::default();
        remote.insert_document("doc", "a\n").unwrap();
        let coordinator = open(&remote, "s1").await;

        remote.fail_next(crate::RemoteError::Transport("offline".into()));
        let outcome = coordinator.save("b\n").await;
        assert!(matches!(
            outcome,
            SaveOutcome::Failed(CrdtError::Remote(crate::RemoteError::Transport(_)))
        ));
        assert_eq!(coordinator.baseline_text(), "a\n");
        assert_eq!(coordinator.sequence(), SequenceTracker::synced(0));
        assert_eq!(coordinator.state(), CoordinatorState::Idle);

        // Retry goes through.
        assert!(matches!(coordinator.save("b\n").await, SaveOutcome::Saved { .. }));
    }

    #[tokio::test]
    async fn test_diverged_then_sync() {
        let remote = MemoryRemote::default();
        remote.insert_document("doc", "a\nb\nc\n").unwrap();
        let first = open(&remote, "s1").await;
        let second = open(&remote, "s2").await;

        assert!(matches!(first.save("A\nb\nc\n").await, SaveOutcome::Saved { .. }));
        let outcome = second.save("a\nb\nC\n").await;
        assert!(matches!(
            outcome,
            SaveOutcome::Diverged {
                local_sequence: 0,
                server_sequence: 2,
            }
        ));
        assert!(second.needs_sync());
        // The pushed edit is not pushed a second time.
        assert!(matches!(second.save("a\nb\nC\n").await, SaveOutcome::NoChanges));

        let outcome = second
            .sync(|| ("a\nb\nC\n".to_owned(), "a\nb\nC\n".to_owned()))
            .await;
        let SyncOutcome::Synced {
            sequence,
            baseline_text,
            working,
            unstaged,
        } = outcome
        else {
            panic!("expected Synced, got {outcome:?}");
        };
        assert_eq!(sequence, 2);
        assert_eq!(baseline_text, "A\nb\nC\n");
        assert_eq!(working, "A\nb\nC\n");
        assert_eq!(unstaged, "A\nb\nC\n");
        assert!(!second.needs_sync());
    }

    #[tokio::test]
    async fn test_sync_keeps_unsaved_edits() {
        let remote = MemoryRemote::default();
        remote.insert_document("doc", "one\ntwo\nthree\n").unwrap();
        let writer = open(&remote, "s1").await;
        let reader = open(&remote, "s2").await;

        writer.save("ONE\ntwo\nthree\n").await;
        let outcome = reader
            .sync(|| {
                (
                    "one\ntwo\nthree\nfour\n".to_owned(),
                    "one\ntwo\nthree\n".to_owned(),
                )
            })
            .await;
        let SyncOutcome::Synced {
            working, unstaged, ..
        } = outcome
        else {
            panic!("expected Synced, got {outcome:?}");
        };
        assert_eq!(working, "ONE\ntwo\nthree\nfour\n");
        assert_eq!(unstaged, "ONE\ntwo\nthree\n");
        // Unsaved edits stay local.
        assert_eq!(remote.text("doc").as_deref(), Some("ONE\ntwo\nthree\n"));
    }

    #[tokio::test]
    async fn test_restore_pushes_on_next_save() {
        let remote = MemoryRemote::default();
        remote.insert_document("doc", "v2\n").unwrap();
        let coordinator = open(&remote, "s1").await;

        coordinator.restore_snapshot("v1\n").unwrap();
        assert_eq!(coordinator.baseline_text(), "v1\n");
        assert_eq!(coordinator.sequence().local(), 0);

        // Working equals the new baseline, but the restore itself is unpublished.
        let outcome = coordinator.save("v1\n").await;
        assert!(matches!(outcome, SaveOutcome::Saved { sequence: 1, .. }));
        assert_eq!(remote.text("doc").as_deref(), Some("v1\n"));
    }

    #[tokio::test]
    async fn test_shutdown_refuses_work() {
        let remote = MemoryRemote::default();
        remote.insert_document("doc", "x\n").unwrap();
        let coordinator = open(&remote, "s1").await;

        coordinator.shutdown();
        coordinator.shutdown();
        assert!(matches!(coordinator.save("y\n").await, SaveOutcome::Cancelled));
        assert!(matches!(
            coordinator.sync(|| (String::new(), String::new())).await,
            SyncOutcome::Cancelled
        ));
        assert!(matches!(
            coordinator.restore_snapshot("z\n"),
            Err(SessionError::TornDown)
        ));
        assert_eq!(remote.sequence("doc"), Some(0));
    }
}
