//! Line-level diff grouped into runs.
//!
//! Pairing a removed run with the added run right after it is a heuristic:
//! an unrelated deletion followed by an unrelated insertion of similar size
//! is reported as `Modified`, and moved blocks are reported as a removal
//! plus an addition. Neither affects correctness of re-indexing, only
//! which chunk kind is reported.
//!
//! The diff runs under a deadline. Past it, the remaining region is
//! reported as one replacement, which re-chunks more lines than strictly
//! needed but keeps large rewrites from stalling a worker.

use std::ops::Range;
use std::time::Duration;

use similar::{Algorithm, DiffTag, TextDiff};

/// Kind of a diff run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunKind {
    /// Lines present in both versions
    Unchanged,
    /// Lines only in the new version
    Added,
    /// Lines only in the old version
    Removed,
    /// Removed lines replaced by a comparable run of added lines
    Modified,
}

/// A contiguous run of lines of one kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffRun {
    /// Kind of the run
    pub kind: RunKind,
    /// Line range in the old content
    pub old: Range<usize>,
    /// Line range in the new content
    pub new: Range<usize>,
}

impl DiffRun {
    /// Whether the run's new lines need re-embedding.
    pub fn needs_chunking(&self) -> bool {
        matches!(self.kind, RunKind::Added | RunKind::Modified) && !self.new.is_empty()
    }
}

/// Diff `old` against `new` line by line.
///
/// `modified_ratio` bounds how different in size a removed and an added
/// run may be and still count as one modification (e.g. `2.0` accepts up
/// to twice as many lines on either side). `timeout` bounds the time spent
/// searching for a minimal diff.
pub fn diff_lines(old: &str, new: &str, modified_ratio: f64, timeout: Duration) -> Vec<DiffRun> {
    let diff = TextDiff::configure()
        .algorithm(Algorithm::Myers)
        .timeout(timeout)
        .diff_lines(old, new);

    let mut raw: Vec<DiffRun> = Vec::new();
    for op in diff.ops() {
        let (old_range, new_range) = (op.old_range(), op.new_range());
        match op.tag() {
            DiffTag::Equal => push_run(&mut raw, RunKind::Unchanged, old_range, new_range),
            DiffTag::Delete => push_run(
                &mut raw,
                RunKind::Removed,
                old_range,
                new_range.start..new_range.start,
            ),
            DiffTag::Insert => push_run(
                &mut raw,
                RunKind::Added,
                old_range.start..old_range.start,
                new_range,
            ),
            DiffTag::Replace => {
                push_run(
                    &mut raw,
                    RunKind::Removed,
                    old_range.clone(),
                    new_range.start..new_range.start,
                );
                push_run(&mut raw, RunKind::Added, old_range.end..old_range.end, new_range);
            }
        }
    }

    pair_modifications(raw, modified_ratio)
}

/// Append a run, merging it into the previous one when the kinds match.
fn push_run(runs: &mut Vec<DiffRun>, kind: RunKind, old: Range<usize>, new: Range<usize>) {
    if old.is_empty() && new.is_empty() {
        return;
    }
    if let Some(last) = runs.last_mut() {
        if last.kind == kind && last.old.end == old.start && last.new.end == new.start {
            last.old.end = old.end;
            last.new.end = new.end;
            return;
        }
    }
    runs.push(DiffRun { kind, old, new });
}

fn pair_modifications(runs: Vec<DiffRun>, modified_ratio: f64) -> Vec<DiffRun> {
    let mut out: Vec<DiffRun> = Vec::with_capacity(runs.len());
    let mut iter = runs.into_iter().peekable();

    while let Some(run) = iter.next() {
        if run.kind == RunKind::Removed {
            if let Some(next) = iter.peek() {
                if next.kind == RunKind::Added && comparable(run.old.len(), next.new.len(), modified_ratio) {
                    let added = iter.next().map(|a| a.new).unwrap_or_default();
                    out.push(DiffRun {
                        kind: RunKind::Modified,
                        old: run.old,
                        new: added,
                    });
                    continue;
                }
            }
        }
        out.push(run);
    }

    out
}

fn comparable(removed: usize, added: usize, ratio: f64) -> bool {
    if removed == 0 || added == 0 {
        return false;
    }
    let (small, large) = if removed < added {
        (removed as f64, added as f64)
    } else {
        (added as f64, removed as f64)
    };
    large / small <= ratio.max(1.0)
}
