//! One open document: working and unstaged buffers, their diff, and save/sync.
//!
//! The working buffer is what the user edits; the unstaged buffer holds a
//! proposed version (for example from an assistant) shown against it as a
//! line diff. Hunks move between the two through accept and discard. Buffer
//! writes that come from outside the user's own typing (sync results,
//! restores, queued proposals) go through a hunk-based rewrite so they
//! behave like an accept-all on the editor side.

use std::cell::RefCell;

use mergepad_common::EngineConfig;
use mergepad_core::{
    AnchorRenderer, DiffOptions, DirtyState, DirtyTracker, Hunk, HunkAnchor, HunkWidgets,
    apply_hunks, apply_hunks_except, apply_single_hunk, compute_hunks_with,
};
use smol_str::SmolStr;
use web_time::Instant;

use crate::SessionError;
use crate::coordinator::{SaveOutcome, SyncCoordinator, SyncOutcome};
use crate::document::DocumentOptions;
use crate::remote::DocumentRemote;

enum Surface<A: AnchorRenderer> {
    /// No diff surface yet. An unstaged proposal that arrives now waits here.
    Unmounted { pending_unstaged: Option<String> },
    Mounted(HunkWidgets<A>),
    TornDown,
}

struct Buffers<A: AnchorRenderer> {
    working: String,
    unstaged: String,
    hunks: Vec<Hunk>,
    dirty: DirtyTracker,
    surface: Surface<A>,
}

impl<A: AnchorRenderer> Buffers<A> {
    fn refresh_hunks(&mut self, options: DiffOptions) {
        self.hunks = compute_hunks_with(&self.working, &self.unstaged, options);
        if let Surface::Mounted(widgets) = &mut self.surface {
            let transitions = widgets.reconcile(&self.hunks);
            tracing::trace!(
                hunks = self.hunks.len(),
                transitions = transitions.len(),
                "hunks refreshed"
            );
        }
    }

    /// The unstaged text as it will be once mounted: a queued proposal if
    /// there is one, else the current unstaged buffer.
    fn proposal(&self) -> &str {
        match &self.surface {
            Surface::Unmounted {
                pending_unstaged: Some(pending),
            } => pending,
            _ => &self.unstaged,
        }
    }

    fn is_torn_down(&self) -> bool {
        matches!(self.surface, Surface::TornDown)
    }

    /// After the baseline moved: restart the dirty check against it.
    fn rebase_dirty(&mut self, baseline: &str) {
        self.dirty.reset_baseline(baseline);
        if self.working != baseline {
            self.dirty.on_content_changed(Instant::now());
        }
    }
}

/// Rewrite `current` into `target` by applying every hunk between them.
fn rewrite_through_hunks(current: &str, target: &str, options: DiffOptions) -> String {
    let hunks = compute_hunks_with(current, target, options);
    apply_hunks(current, target, &hunks)
}

/// An editing session bound to one document and one host surface.
pub struct EditorSession<R: DocumentRemote, A: AnchorRenderer> {
    coordinator: SyncCoordinator<R>,
    diff_options: DiffOptions,
    buffers: RefCell<Buffers<A>>,
}

impl<R: DocumentRemote, A: AnchorRenderer> EditorSession<R, A> {
    /// Open `document_id` on `remote` with both buffers at the server text.
    pub async fn open(
        remote: R,
        document_id: impl Into<SmolStr>,
        session_id: impl Into<SmolStr>,
        config: &EngineConfig,
    ) -> Result<Self, crate::CrdtError> {
        let coordinator =
            SyncCoordinator::open(remote, document_id, session_id, DocumentOptions::from(config))
                .await?;
        Ok(Self::new(coordinator, config))
    }

    pub fn new(coordinator: SyncCoordinator<R>, config: &EngineConfig) -> Self {
        let baseline = coordinator.baseline_text();
        let diff_options = DiffOptions {
            split_paired_lines: config.split_paired_lines,
        };
        Self {
            coordinator,
            diff_options,
            buffers: RefCell::new(Buffers {
                working: baseline.clone(),
                unstaged: baseline.clone(),
                hunks: Vec::new(),
                dirty: DirtyTracker::new(baseline, config.dirty_debounce()),
                surface: Surface::Unmounted {
                    pending_unstaged: None,
                },
            }),
        }
    }

    pub fn coordinator(&self) -> &SyncCoordinator<R> {
        &self.coordinator
    }

    pub fn working(&self) -> String {
        self.buffers.borrow().working.clone()
    }

    pub fn unstaged(&self) -> String {
        self.buffers.borrow().unstaged.clone()
    }

    pub fn hunks(&self) -> Vec<Hunk> {
        self.buffers.borrow().hunks.clone()
    }

    /// Anchors of the mounted surface; empty before mount and after teardown.
    pub fn anchors(&self) -> Vec<HunkAnchor> {
        match &self.buffers.borrow().surface {
            Surface::Mounted(widgets) => widgets.anchors(),
            _ => Vec::new(),
        }
    }

    pub fn is_mounted(&self) -> bool {
        matches!(self.buffers.borrow().surface, Surface::Mounted(_))
    }

    pub fn dirty_state(&self) -> DirtyState {
        self.buffers.borrow().dirty.state()
    }

    /// Attach the diff surface. Any queued unstaged proposal is applied now.
    ///
    /// Mounting again replaces the previous surface and disposes its widgets.
    pub fn mount(&self, renderer: A) -> Result<(), SessionError> {
        let mut guard = self.buffers.borrow_mut();
        let buffers = &mut *guard;
        let pending = match &mut buffers.surface {
            Surface::TornDown => return Err(SessionError::TornDown),
            Surface::Unmounted { pending_unstaged } => pending_unstaged.take(),
            Surface::Mounted(_) => None,
        };
        if let Surface::Mounted(mut old) =
            std::mem::replace(&mut buffers.surface, Surface::Mounted(HunkWidgets::new(renderer)))
        {
            old.dispose_all();
        }

        if let Some(text) = pending {
            tracing::debug!(len = text.len(), "applying queued unstaged content");
            buffers.unstaged = rewrite_through_hunks(&buffers.unstaged, &text, self.diff_options);
        }
        buffers.refresh_hunks(self.diff_options);
        Ok(())
    }

    /// The user changed the working buffer.
    pub fn edit_working(&self, text: impl Into<String>) {
        let mut buffers = self.buffers.borrow_mut();
        if buffers.is_torn_down() {
            return;
        }
        buffers.working = text.into();
        buffers.dirty.on_content_changed(Instant::now());
        buffers.refresh_hunks(self.diff_options);
    }

    /// Propose new unstaged content. Before mount, the latest proposal is
    /// kept and applied when the surface arrives.
    pub fn set_unstaged_content(&self, text: impl Into<String>) {
        let text = text.into();
        let mut guard = self.buffers.borrow_mut();
        let buffers = &mut *guard;
        if let Surface::Unmounted { pending_unstaged } = &mut buffers.surface {
            tracing::debug!(len = text.len(), "queued unstaged content until mount");
            *pending_unstaged = Some(text);
            return;
        }
        if buffers.is_torn_down() {
            return;
        }
        buffers.unstaged = rewrite_through_hunks(&buffers.unstaged, &text, self.diff_options);
        buffers.refresh_hunks(self.diff_options);
    }

    /// Copy hunk `index` from unstaged into working.
    pub fn accept_hunk(&self, index: usize) -> Result<(), SessionError> {
        let mut buffers = self.buffers.borrow_mut();
        self.check_diff_active(&buffers)?;
        let working = apply_single_hunk(&buffers.working, &buffers.unstaged, &buffers.hunks, index)
            .inspect_err(|e| tracing::error!(index, error = %e, "accept failed"))?;
        buffers.working = working;
        buffers.dirty.on_content_changed(Instant::now());
        buffers.refresh_hunks(self.diff_options);
        Ok(())
    }

    /// Drop hunk `index` from unstaged, reverting it to the working text.
    pub fn discard_hunk(&self, index: usize) -> Result<(), SessionError> {
        let mut buffers = self.buffers.borrow_mut();
        self.check_diff_active(&buffers)?;
        let unstaged =
            apply_hunks_except(&buffers.working, &buffers.unstaged, &buffers.hunks, index)
                .inspect_err(|e| tracing::error!(index, error = %e, "discard failed"))?;
        buffers.unstaged = unstaged;
        buffers.refresh_hunks(self.diff_options);
        Ok(())
    }

    fn check_diff_active(&self, buffers: &Buffers<A>) -> Result<(), SessionError> {
        if !matches!(buffers.surface, Surface::Mounted(_)) || buffers.hunks.is_empty() {
            tracing::error!(
                document_id = %self.coordinator.document_id(),
                hunks = buffers.hunks.len(),
                "hunk action with no active diff"
            );
            return Err(SessionError::NoActiveDiff);
        }
        Ok(())
    }

    /// Run the dirty check if its debounce has elapsed.
    pub fn poll_dirty(&self) -> DirtyState {
        let mut buffers = self.buffers.borrow_mut();
        let Buffers { working, dirty, .. } = &mut *buffers;
        dirty.poll(Instant::now(), working)
    }

    /// Wait out pending debounces and return the settled state.
    pub async fn settle_dirty(&self) -> DirtyState {
        loop {
            let deadline = {
                let buffers = self.buffers.borrow();
                if buffers.is_torn_down() {
                    return buffers.dirty.state();
                }
                buffers.dirty.deadline()
            };
            let Some(deadline) = deadline else {
                return self.dirty_state();
            };
            let now = Instant::now();
            if deadline > now {
                n0_future::time::sleep(deadline - now).await;
            }
            self.poll_dirty();
        }
    }

    /// Push the working buffer.
    pub async fn save(&self) -> SaveOutcome {
        if self.buffers.borrow().is_torn_down() {
            return SaveOutcome::Cancelled;
        }
        let working = self.working();
        let outcome = self.coordinator.save(&working).await;
        if let SaveOutcome::Saved { baseline_text, .. } = &outcome {
            self.buffers.borrow_mut().rebase_dirty(baseline_text);
        }
        outcome
    }

    /// Pull the server state and merge both buffers onto it. A proposal still
    /// queued for mount is merged in place of the unstaged buffer.
    pub async fn sync(&self) -> SyncOutcome {
        if self.buffers.borrow().is_torn_down() {
            return SyncOutcome::Cancelled;
        }
        let outcome = self
            .coordinator
            .sync(|| {
                let buffers = self.buffers.borrow();
                (buffers.working.clone(), buffers.proposal().to_owned())
            })
            .await;

        if let SyncOutcome::Synced {
            baseline_text,
            working,
            unstaged,
            ..
        } = &outcome
        {
            let mut guard = self.buffers.borrow_mut();
            let buffers = &mut *guard;
            buffers.working = rewrite_through_hunks(&buffers.working, working, self.diff_options);
            match &mut buffers.surface {
                Surface::Unmounted {
                    pending_unstaged: Some(pending),
                } => {
                    *pending = unstaged.clone();
                    buffers.unstaged =
                        rewrite_through_hunks(&buffers.unstaged, baseline_text, self.diff_options);
                }
                _ => {
                    buffers.unstaged =
                        rewrite_through_hunks(&buffers.unstaged, unstaged, self.diff_options);
                }
            }
            buffers.rebase_dirty(baseline_text);
            buffers.refresh_hunks(self.diff_options);
        }
        outcome
    }

    /// Roll the document back to `text`: baseline, working and unstaged all
    /// become `text`, the dirty state resets, and the next save publishes it.
    pub fn restore_snapshot(&self, text: &str) -> Result<(), SessionError> {
        self.coordinator.restore_snapshot(text)?;
        let mut buffers = self.buffers.borrow_mut();
        buffers.working = rewrite_through_hunks(&buffers.working, text, self.diff_options);
        buffers.unstaged = rewrite_through_hunks(&buffers.unstaged, text, self.diff_options);
        if let Surface::Unmounted { pending_unstaged } = &mut buffers.surface {
            *pending_unstaged = None;
        }
        buffers.dirty.reset_baseline(text);
        buffers.refresh_hunks(self.diff_options);
        Ok(())
    }

    /// Cancel pending debounces, dispose every anchor, and drop the results of
    /// any in-flight save or sync. Idempotent.
    pub fn teardown(&self) {
        self.coordinator.shutdown();
        let mut buffers = self.buffers.borrow_mut();
        buffers.dirty.cancel();
        if let Surface::Mounted(mut widgets) =
            std::mem::replace(&mut buffers.surface, Surface::TornDown)
        {
            widgets.dispose_all();
        }
    }
}

impl<R: DocumentRemote, A: AnchorRenderer> Drop for EditorSession<R, A> {
    fn drop(&mut self) {
        self.teardown();
    }
}
