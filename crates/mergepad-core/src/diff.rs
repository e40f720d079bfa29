//! Line-oriented diff between the working and unstaged buffers.
//!
//! Texts are split on `'\n'` into `count('\n') + 1` lines, so a trailing
//! newline shows up as a final empty line and joining with `'\n'` restores the
//! text exactly. Working on whole line vectors means an insertion at the end of
//! the document or a deletion running to the end never needs an out-of-range
//! position: the trailing empty line (or its absence) is an ordinary line that
//! is either kept or replaced.

use std::iter;
use std::ops::{Index, IndexMut};

use crate::error::DiffError;
use crate::types::Hunk;

/// Knobs for [`compute_hunks_with`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DiffOptions {
    /// Report a changed region with as many removed as added lines as one
    /// single-line hunk per pair, so each line can be accepted on its own.
    pub split_paired_lines: bool,
}

impl Default for DiffOptions {
    fn default() -> Self {
        Self {
            split_paired_lines: true,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Op {
    Equal,
    Delete,
    Insert,
}

/// Split a text into the line model used by hunks.
pub fn split_lines(text: &str) -> Vec<&str> {
    text.split('\n').collect()
}

/// Compute hunks with the default [`DiffOptions`].
pub fn compute_hunks(original: &str, modified: &str) -> Vec<Hunk> {
    compute_hunks_with(original, modified, DiffOptions::default())
}

/// Compute the hunks that turn `original` into `modified`.
///
/// Hunks are ordered by original line and never overlap.
pub fn compute_hunks_with(original: &str, modified: &str, options: DiffOptions) -> Vec<Hunk> {
    if original == modified {
        return Vec::new();
    }

    let a = split_lines(original);
    let b = split_lines(modified);

    let mut hunks = Vec::new();
    let (mut i, mut j) = (0usize, 0usize);
    let mut region: Option<(usize, usize)> = None;

    for op in diff_ops(&a, &b) {
        match op {
            Op::Equal => {
                if let Some((start_i, start_j)) = region.take() {
                    push_region(&mut hunks, start_i, i - start_i, start_j, j - start_j, options);
                }
                i += 1;
                j += 1;
            }
            Op::Delete => {
                region.get_or_insert((i, j));
                i += 1;
            }
            Op::Insert => {
                region.get_or_insert((i, j));
                j += 1;
            }
        }
    }
    if let Some((start_i, start_j)) = region {
        push_region(&mut hunks, start_i, i - start_i, start_j, j - start_j, options);
    }

    tracing::trace!(
        original_lines = a.len(),
        modified_lines = b.len(),
        hunks = hunks.len(),
        "computed line hunks"
    );
    hunks
}

/// Turn one changed region (0-based starts, line counts) into hunks.
fn push_region(
    hunks: &mut Vec<Hunk>,
    start_i: usize,
    deleted: usize,
    start_j: usize,
    inserted: usize,
    options: DiffOptions,
) {
    if deleted == 0 {
        hunks.push(Hunk::new(start_i, 0, start_j + 1, start_j + inserted));
    } else if inserted == 0 {
        hunks.push(Hunk::new(start_i + 1, start_i + deleted, start_j, 0));
    } else if deleted == inserted && options.split_paired_lines {
        hunks.extend((1..=deleted).map(|t| {
            Hunk::new(start_i + t, start_i + t, start_j + t, start_j + t)
        }));
    } else {
        hunks.push(Hunk::new(
            start_i + 1,
            start_i + deleted,
            start_j + 1,
            start_j + inserted,
        ));
    }
}

/// Shortest edit script from `a` to `b`.
///
/// Linear-space Myers: each level trims the common prefix and suffix, finds
/// the middle snake of what is left, and recurses on both halves. Memory is
/// O(N + M) regardless of how far apart the texts are.
fn diff_ops(a: &[&str], b: &[&str]) -> Vec<Op> {
    let max_d = (a.len() + b.len()).div_ceil(2) + 1;
    let mut forward = Frontier::new(max_d);
    let mut backward = Frontier::new(max_d);
    let mut ops = Vec::with_capacity(a.len() + b.len());
    conquer(a, b, &mut forward, &mut backward, &mut ops);
    ops
}

/// Furthest-reaching x per diagonal, indexed by signed diagonal.
struct Frontier {
    v: Vec<usize>,
    offset: isize,
}

impl Frontier {
    fn new(max_d: usize) -> Self {
        Self {
            v: vec![0; 2 * max_d + 3],
            offset: max_d as isize + 1,
        }
    }
}

impl Index<isize> for Frontier {
    type Output = usize;

    fn index(&self, k: isize) -> &usize {
        &self.v[(k + self.offset) as usize]
    }
}

impl IndexMut<isize> for Frontier {
    fn index_mut(&mut self, k: isize) -> &mut usize {
        &mut self.v[(k + self.offset) as usize]
    }
}

fn common_prefix(a: &[&str], b: &[&str]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}

fn common_suffix(a: &[&str], b: &[&str]) -> usize {
    a.iter()
        .rev()
        .zip(b.iter().rev())
        .take_while(|(x, y)| x == y)
        .count()
}

fn conquer(
    a: &[&str],
    b: &[&str],
    forward: &mut Frontier,
    backward: &mut Frontier,
    ops: &mut Vec<Op>,
) {
    let prefix = common_prefix(a, b);
    ops.extend(iter::repeat_n(Op::Equal, prefix));
    let (a, b) = (&a[prefix..], &b[prefix..]);
    let suffix = common_suffix(a, b);
    let (a, b) = (&a[..a.len() - suffix], &b[..b.len() - suffix]);

    if a.is_empty() {
        ops.extend(iter::repeat_n(Op::Insert, b.len()));
    } else if b.is_empty() {
        ops.extend(iter::repeat_n(Op::Delete, a.len()));
    } else {
        // Both sides non-empty with differing ends, so the edit distance is
        // at least 2 and the split point is strictly inside.
        match middle_snake(a, b, forward, backward) {
            Some((x, y)) => {
                conquer(&a[..x], &b[..y], forward, backward, ops);
                conquer(&a[x..], &b[y..], forward, backward, ops);
            }
            None => {
                ops.extend(iter::repeat_n(Op::Delete, a.len()));
                ops.extend(iter::repeat_n(Op::Insert, b.len()));
            }
        }
    }

    ops.extend(iter::repeat_n(Op::Equal, suffix));
}

/// A point on a shortest edit path from `(0, 0)` to `(a.len(), b.len())`
/// that splits the edit distance roughly in half.
///
/// `backward` holds x measured from the end of both slices, on diagonals of
/// the reversed problem.
fn middle_snake(
    a: &[&str],
    b: &[&str],
    forward: &mut Frontier,
    backward: &mut Frontier,
) -> Option<(usize, usize)> {
    let n = a.len();
    let m = b.len();
    let delta = n as isize - m as isize;
    let odd = delta & 1 == 1;
    forward[1] = 0;
    backward[1] = 0;

    let max_d = (n + m).div_ceil(2) as isize + 1;
    for d in 0..max_d {
        let mut k = d;
        while k >= -d {
            let mut x = if k == -d || (k != d && forward[k - 1] < forward[k + 1]) {
                forward[k + 1]
            } else {
                forward[k - 1] + 1
            };
            let y = (x as isize - k) as usize;
            let (x0, y0) = (x, y);
            if x < n && y < m {
                x += common_prefix(&a[x..], &b[y..]);
            }
            forward[k] = x;
            if odd && (k - delta).abs() < d && forward[k] + backward[delta - k] >= n {
                return Some((x0, y0));
            }
            k -= 2;
        }

        let mut k = d;
        while k >= -d {
            let mut x = if k == -d || (k != d && backward[k - 1] < backward[k + 1]) {
                backward[k + 1]
            } else {
                backward[k - 1] + 1
            };
            let mut y = (x as isize - k) as usize;
            if x < n && y < m {
                let run = common_suffix(&a[..n - x], &b[..m - y]);
                x += run;
                y += run;
            }
            backward[k] = x;
            if !odd && (k - delta).abs() <= d && backward[k] + forward[delta - k] >= n {
                return Some((n - x, m - y));
            }
            k -= 2;
        }
    }
    None
}

/// Rebuild a text from `original`, taking the spans of `hunks` from `modified`.
///
/// Walks the hunks in order: copies the untouched original lines up to each
/// hunk, then the hunk's modified lines (nothing for a pure deletion), then
/// moves past the replaced original lines. Whatever is left of `original`
/// after the last hunk is appended. Line numbers past the end of either text
/// are clamped to the last valid line.
pub fn apply_hunks(original: &str, modified: &str, hunks: &[Hunk]) -> String {
    if hunks.is_empty() {
        return original.to_string();
    }

    let a = split_lines(original);
    let b = split_lines(modified);
    let mut out: Vec<&str> = Vec::with_capacity(a.len().max(b.len()));
    let mut cursor = 0usize;

    for hunk in hunks {
        let keep_until = if hunk.is_insertion() {
            hunk.original_start
        } else {
            hunk.original_start.saturating_sub(1)
        }
        .clamp(cursor, a.len());
        out.extend_from_slice(&a[cursor..keep_until]);
        cursor = keep_until;

        if !hunk.is_deletion() {
            let from = hunk.modified_start.saturating_sub(1).min(b.len());
            let to = hunk.modified_end.clamp(from, b.len());
            out.extend_from_slice(&b[from..to]);
        }
        if !hunk.is_insertion() {
            cursor = hunk.original_end.clamp(cursor, a.len());
        }
    }
    out.extend_from_slice(&a[cursor..]);
    out.join("\n")
}

/// Apply only the hunk at `index` (per-hunk accept).
pub fn apply_single_hunk(
    original: &str,
    modified: &str,
    hunks: &[Hunk],
    index: usize,
) -> Result<String, DiffError> {
    let hunk = hunks.get(index).ok_or(DiffError::HunkOutOfRange {
        index,
        len: hunks.len(),
    })?;
    Ok(apply_hunks(original, modified, std::slice::from_ref(hunk)))
}

/// Apply every hunk except the one at `index` (per-hunk discard).
pub fn apply_hunks_except(
    original: &str,
    modified: &str,
    hunks: &[Hunk],
    index: usize,
) -> Result<String, DiffError> {
    if index >= hunks.len() {
        return Err(DiffError::HunkOutOfRange {
            index,
            len: hunks.len(),
        });
    }
    let rest: Vec<Hunk> = hunks
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != index)
        .map(|(_, hunk)| *hunk)
        .collect();
    Ok(apply_hunks(original, modified, &rest))
}

/// The remaining hunks once hunk `index` has been applied to the original.
///
/// Hunks after `index` have their original-side lines shifted by the accepted
/// hunk's line delta; modified-side lines are untouched.
pub fn rebase_after_accept(hunks: &[Hunk], index: usize) -> Result<Vec<Hunk>, DiffError> {
    let accepted = hunks.get(index).ok_or(DiffError::HunkOutOfRange {
        index,
        len: hunks.len(),
    })?;
    let delta = accepted.line_delta();
    let shift = |line: usize| line.saturating_add_signed(delta);

    Ok(hunks
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != index)
        .map(|(i, hunk)| {
            if i < index {
                return *hunk;
            }
            Hunk {
                original_start: shift(hunk.original_start),
                original_end: if hunk.is_insertion() {
                    0
                } else {
                    shift(hunk.original_end)
                },
                ..*hunk
            }
        })
        .collect())
}
