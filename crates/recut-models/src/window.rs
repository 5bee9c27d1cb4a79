//! Merged windows, cut contracts, and per-window replacement outcomes.

use std::collections::BTreeSet;
use std::path::PathBuf;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::segment::{ScoredSegment, Severity, SuggestedAction};

/// A consolidated, non-overlapping range slated for replacement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MergedWindow {
    pub start: f64,
    pub end: f64,
    /// Most restrictive severity among contributing segments
    pub severity: Severity,
    /// Union of contributing segments' issues
    pub issues: BTreeSet<String>,
    /// Most restrictive action among contributing segments
    pub suggested_action: SuggestedAction,
    /// Highest contributing score
    pub score: f64,
    /// Distinct contributing descriptions joined by ` | `
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl MergedWindow {
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    /// Fold another segment into this window.
    pub fn absorb(&mut self, seg: &ScoredSegment) {
        self.end = self.end.max(seg.end);
        self.severity = self.severity.max(seg.severity);
        self.suggested_action = self.suggested_action.max(seg.suggested_action);
        self.score = self.score.max(seg.score);
        self.issues.extend(seg.issues.iter().cloned());

        if let Some(desc) = &seg.description {
            match &mut self.description {
                Some(existing) => {
                    if !existing.split(" | ").any(|part| part == desc) {
                        existing.push_str(" | ");
                        existing.push_str(desc);
                    }
                }
                None => self.description = Some(desc.clone()),
            }
        }
    }

    /// Treat this window as a segment again, e.g. to re-merge.
    pub fn as_segment(&self) -> ScoredSegment {
        ScoredSegment {
            start: self.start,
            end: self.end,
            severity: self.severity,
            issues: self.issues.clone(),
            suggested_action: self.suggested_action,
            score: self.score,
            description: self.description.clone(),
        }
    }
}

impl From<&ScoredSegment> for MergedWindow {
    fn from(seg: &ScoredSegment) -> Self {
        Self {
            start: seg.start,
            end: seg.end,
            severity: seg.severity,
            issues: seg.issues.clone(),
            suggested_action: seg.suggested_action,
            score: seg.score,
            description: seg.description.clone(),
        }
    }
}

/// The cut contract for one window: the exact source timestamps the
/// reconstruction replaces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ReplacementTask {
    /// Position of the window in the merged list; names every intermediate file
    pub window_index: usize,
    pub window_start: f64,
    pub window_end: f64,
    pub was_trimmed: bool,
    /// How much of the buffered range was given up to fit the synthesis limit
    pub trimmed_seconds: f64,
    /// Flagged range this task was derived from
    pub flagged_start: f64,
    pub flagged_end: f64,
}

impl ReplacementTask {
    pub fn span(&self) -> f64 {
        self.window_end - self.window_start
    }
}

/// A recoverable problem a window ran into on its way to the timeline.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum Degradation {
    /// Duration re-encode failed; the normalized clip was used unmodified.
    DurationMismatched(String),
    /// Original audio overlay failed; the clip keeps its own audio.
    AudioSyncFailed(String),
    /// The clip was accepted shorter than its window.
    AcceptedShorter,
}

/// Output of synthesis, normalization and reconciliation for one task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ReplacementResult {
    /// Final clip; `None` when the window could not be filled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clip_path: Option<PathBuf>,
    pub actual_duration: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub degradations: Vec<Degradation>,
}

impl ReplacementResult {
    pub fn ready(clip_path: impl Into<PathBuf>, actual_duration: f64) -> Self {
        Self {
            clip_path: Some(clip_path.into()),
            actual_duration,
            error: None,
            degradations: Vec::new(),
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            clip_path: None,
            actual_duration: 0.0,
            error: Some(error.into()),
            degradations: Vec::new(),
        }
    }

    pub fn is_usable(&self) -> bool {
        self.clip_path.is_some() && self.actual_duration > 0.0
    }

    pub fn degrade(&mut self, degradation: Degradation) {
        self.degradations.push(degradation);
    }
}

/// How a window ended up in the final output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WindowStatus {
    Replaced,
    Degraded { degradations: Vec<Degradation> },
    /// Original footage kept for the window
    Skipped { reason: String },
}

impl WindowStatus {
    pub fn from_result(result: &ReplacementResult) -> Self {
        if !result.is_usable() {
            WindowStatus::Skipped {
                reason: result
                    .error
                    .clone()
                    .unwrap_or_else(|| "no replacement clip".to_string()),
            }
        } else if result.degradations.is_empty() {
            WindowStatus::Replaced
        } else {
            WindowStatus::Degraded {
                degradations: result.degradations.clone(),
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WindowStatus::Replaced => "replaced",
            WindowStatus::Degraded { .. } => "degraded",
            WindowStatus::Skipped { .. } => "skipped",
        }
    }
}
