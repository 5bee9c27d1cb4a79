//! Timeline segments: the assembler's ordered working units.

use std::path::PathBuf;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// One piece of the reconstructed output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TimelineSegment {
    /// Untouched source footage
    Original { source_start: f64, source_end: f64 },
    /// A processed replacement clip standing in for `[window_start, window_end)`
    Replacement {
        window_index: usize,
        window_start: f64,
        window_end: f64,
        clip_path: PathBuf,
        actual_duration: f64,
    },
}

impl TimelineSegment {
    /// Seconds this segment contributes to the output.
    pub fn span(&self) -> f64 {
        match self {
            TimelineSegment::Original {
                source_start,
                source_end,
            } => source_end - source_start,
            TimelineSegment::Replacement {
                actual_duration, ..
            } => *actual_duration,
        }
    }

    /// Source range this segment covers.
    pub fn source_range(&self) -> (f64, f64) {
        match self {
            TimelineSegment::Original {
                source_start,
                source_end,
            } => (*source_start, *source_end),
            TimelineSegment::Replacement {
                window_start,
                window_end,
                ..
            } => (*window_start, *window_end),
        }
    }

    pub fn is_replacement(&self) -> bool {
        matches!(self, TimelineSegment::Replacement { .. })
    }
}

/// Sum of output spans.
pub fn total_span(segments: &[TimelineSegment]) -> f64 {
    segments.iter().map(TimelineSegment::span).sum()
}
