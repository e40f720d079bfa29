//! Core diff types: hunks, sides, and the anchors the host UI renders.
//!
//! These types are framework-agnostic and carry no text; they only describe
//! line ranges in the working (original) and unstaged (modified) buffers.

use serde::{Deserialize, Serialize};

/// A contiguous line-range difference between two buffers.
///
/// Line numbers are 1-based. An end line of 0 marks the side that has no
/// lines in this hunk: `original_end == 0` is a pure insertion (and
/// `original_start` is the line *after which* the insertion sits, 0 for the
/// top of the document), `modified_end == 0` is a pure deletion (with the
/// same convention for `modified_start`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Hunk {
    pub original_start: usize,
    pub original_end: usize,
    pub modified_start: usize,
    pub modified_end: usize,
}

impl Hunk {
    /// Create a hunk from raw line numbers.
    pub fn new(
        original_start: usize,
        original_end: usize,
        modified_start: usize,
        modified_end: usize,
    ) -> Self {
        Self {
            original_start,
            original_end,
            modified_start,
            modified_end,
        }
    }

    /// Lines only exist on the modified side.
    pub fn is_insertion(&self) -> bool {
        self.original_end == 0
    }

    /// Lines only exist on the original side.
    pub fn is_deletion(&self) -> bool {
        self.modified_end == 0
    }

    /// Number of original lines this hunk replaces.
    pub fn original_len(&self) -> usize {
        if self.is_insertion() {
            0
        } else {
            (self.original_end + 1).saturating_sub(self.original_start)
        }
    }

    /// Number of modified lines this hunk introduces.
    pub fn modified_len(&self) -> usize {
        if self.is_deletion() {
            0
        } else {
            (self.modified_end + 1).saturating_sub(self.modified_start)
        }
    }

    /// Change in original line count once this hunk is accepted.
    pub fn line_delta(&self) -> isize {
        self.modified_len() as isize - self.original_len() as isize
    }

    /// Which side a UI anchor for this hunk attaches to.
    ///
    /// Pure deletions have nothing to point at on the modified side, so they
    /// anchor to the original line; everything else anchors to the modified line.
    pub fn anchor_side(&self) -> Side {
        if self.is_deletion() {
            Side::Original
        } else {
            Side::Modified
        }
    }

    /// Line number on [`Self::anchor_side`].
    pub fn anchor_line(&self) -> usize {
        match self.anchor_side() {
            Side::Original => self.original_start,
            Side::Modified => self.modified_start,
        }
    }
}

/// Which buffer of a diff pair a line number refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    /// The working buffer.
    Original,
    /// The unstaged buffer.
    Modified,
}

/// Where the host UI should draw accept/discard controls for one hunk.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HunkAnchor {
    /// Position of the hunk in the current hunk list.
    pub index: usize,
    pub side: Side,
    pub line_number: usize,
}

impl HunkAnchor {
    /// Anchor for the hunk at `index`.
    pub fn for_hunk(index: usize, hunk: &Hunk) -> Self {
        Self {
            index,
            side: hunk.anchor_side(),
            line_number: hunk.anchor_line(),
        }
    }
}
