//! Error types for diff operations.

use thiserror::Error;

/// Errors from applying a subset of hunks.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum DiffError {
    /// A hunk index that is not in the current hunk list.
    #[error("hunk {index} out of range ({len} hunks)")]
    HunkOutOfRange { index: usize, len: usize },
}
