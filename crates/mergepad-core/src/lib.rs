//! mergepad-core: editor-side merge logic without CRDT or framework dependencies.
//!
//! This crate provides:
//! - `Hunk`, `Side`, `HunkAnchor` - line-range differences and where their controls go
//! - `diff` - line diff between working and unstaged text, and partial hunk application
//! - `DirtyTracker` - debounced clean/checking/dirty state against a baseline
//! - `SequenceTracker` - optimistic-concurrency revision bookkeeping
//! - `HunkWidgets` - per-hunk anchor slots that survive recomputation

pub mod diff;
pub mod dirty;
mod error;
pub mod sequence;
pub mod types;
pub mod widgets;

pub use diff::{
    DiffOptions, apply_hunks, apply_hunks_except, apply_single_hunk, compute_hunks,
    compute_hunks_with, rebase_after_accept,
};
pub use dirty::{DEFAULT_DEBOUNCE, DirtyState, DirtyTracker};
pub use error::DiffError;
pub use sequence::{SequenceStatus, SequenceTracker};
pub use types::{Hunk, HunkAnchor, Side};
pub use widgets::{AnchorRenderer, HunkWidgets, SlotTransition};
