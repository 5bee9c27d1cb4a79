//! Interval merging of scored segments into replacement windows.
//!
//! Segments are sorted by start and swept once. A segment whose start lies
//! within `gap_tolerance` of the running window's end (inclusive) is folded
//! into it, so overlap and near-adjacency are handled the same way. The
//! result is sorted and every pair of windows is more than `gap_tolerance`
//! apart.

use recut_models::{MergedWindow, ScoredSegment};

/// Merge `segments` into non-overlapping windows.
///
/// Input is assumed valid; malformed segments are rejected when they are
/// constructed or parsed, never here.
pub fn merge(segments: &[ScoredSegment], gap_tolerance: f64) -> Vec<MergedWindow> {
    let mut sorted: Vec<&ScoredSegment> = segments.iter().collect();
    sorted.sort_by(|a, b| a.start.total_cmp(&b.start).then(a.end.total_cmp(&b.end)));

    let mut windows: Vec<MergedWindow> = Vec::new();
    for seg in sorted {
        match windows.last_mut() {
            Some(acc) if seg.start <= acc.end + gap_tolerance => acc.absorb(seg),
            _ => windows.push(MergedWindow::from(seg)),
        }
    }
    windows
}

/// Re-merge already merged windows, e.g. after loading them from a record.
pub fn remerge(windows: &[MergedWindow], gap_tolerance: f64) -> Vec<MergedWindow> {
    let segments: Vec<ScoredSegment> = windows.iter().map(MergedWindow::as_segment).collect();
    merge(&segments, gap_tolerance)
}
