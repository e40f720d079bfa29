//! Debounced dirty-state tracking for the working buffer.
//!
//! Comparing the whole buffer against the baseline on every keystroke is
//! wasteful, so a content change only arms a deadline and moves the tracker to
//! [`DirtyState::Checking`]. When the deadline passes, the next [`DirtyTracker::poll`]
//! compares the text *as it is then* against the baseline.
//!
//! Time is passed in explicitly so hosts can drive the tracker from whatever
//! clock they have and tests can step it deterministically.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use web_time::Instant;

/// Default debounce between the last edit and the dirty check.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(250);

/// Whether the working buffer differs from the baseline.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirtyState {
    /// Matches the baseline as of the last check or reset.
    #[default]
    Clean,
    /// Edited since the last check; the comparison is pending.
    Checking,
    /// Differs from the baseline.
    Dirty,
}

/// Clean/checking/dirty classifier for one buffer against one baseline.
#[derive(Clone, Debug)]
pub struct DirtyTracker {
    state: DirtyState,
    baseline: String,
    debounce: Duration,
    deadline: Option<Instant>,
}

impl DirtyTracker {
    /// Create a clean tracker for `baseline`.
    pub fn new(baseline: impl Into<String>, debounce: Duration) -> Self {
        Self {
            state: DirtyState::Clean,
            baseline: baseline.into(),
            debounce,
            deadline: None,
        }
    }

    pub fn state(&self) -> DirtyState {
        self.state
    }

    pub fn is_dirty(&self) -> bool {
        self.state == DirtyState::Dirty
    }

    /// The text the buffer is compared against.
    pub fn baseline(&self) -> &str {
        &self.baseline
    }

    /// When the pending check fires, if one is armed.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn debounce(&self) -> Duration {
        self.debounce
    }

    /// Record an edit: go to `Checking` and (re)start the debounce.
    pub fn on_content_changed(&mut self, now: Instant) {
        self.state = DirtyState::Checking;
        self.deadline = Some(now + self.debounce);
    }

    /// Fire the check if its deadline has passed.
    ///
    /// `current` is the buffer text at the moment of the call; before the
    /// deadline it is ignored and the state is unchanged.
    pub fn poll(&mut self, now: Instant, current: &str) -> DirtyState {
        match self.deadline {
            Some(deadline) if now >= deadline => self.fire(current),
            _ => {}
        }
        self.state
    }

    fn fire(&mut self, current: &str) {
        self.deadline = None;
        self.state = if current == self.baseline {
            DirtyState::Clean
        } else {
            DirtyState::Dirty
        };
        tracing::trace!(state = ?self.state, "dirty check fired");
    }

    /// Adopt a new baseline after a save or sync.
    ///
    /// Cancels any pending check and forces `Clean` in the same step, so a
    /// check armed before the reset can never compare against the old baseline.
    pub fn reset_baseline(&mut self, baseline: impl Into<String>) {
        self.deadline = None;
        self.baseline = baseline.into();
        self.state = DirtyState::Clean;
    }

    /// Drop any pending check without changing the state.
    pub fn cancel(&mut self) {
        self.deadline = None;
    }
}
