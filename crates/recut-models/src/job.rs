//! Reconstruction jobs, their state machine, and the final report.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::ReconstructionConfig;
use crate::record::WindowRecord;
use crate::window::{MergedWindow, WindowStatus};

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of one reconstruction job.
///
/// `Created → ProcessingReplacements → ExtractingOriginals → Concatenating
/// → [Succeeded | ConcatenatingFallback → [Succeeded | Failed]]`.
/// Any non-terminal state may move to `Failed`. No state is re-entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    #[default]
    Created,
    ProcessingReplacements,
    ExtractingOriginals,
    Concatenating,
    ConcatenatingFallback,
    Succeeded,
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Created => "created",
            JobState::ProcessingReplacements => "processing_replacements",
            JobState::ExtractingOriginals => "extracting_originals",
            JobState::Concatenating => "concatenating",
            JobState::ConcatenatingFallback => "concatenating_fallback",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed)
    }

    pub fn can_transition_to(&self, next: JobState) -> bool {
        use JobState::*;
        match (self, next) {
            (s, Failed) => !s.is_terminal(),
            (Created, ProcessingReplacements)
            | (ProcessingReplacements, ExtractingOriginals)
            | (ExtractingOriginals, Concatenating)
            | (Concatenating, Succeeded)
            | (Concatenating, ConcatenatingFallback)
            | (ConcatenatingFallback, Succeeded) => true,
            _ => false,
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which concatenation path produced the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ConcatStrategy {
    /// Only one segment; it was copied to the output
    SingleSegment,
    StreamCopy,
    Reencode,
}

impl ConcatStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConcatStrategy::SingleSegment => "single_segment",
            ConcatStrategy::StreamCopy => "stream_copy",
            ConcatStrategy::Reencode => "reencode",
        }
    }
}

/// Source media facts recorded with the job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SourceInfo {
    pub path: PathBuf,
    pub duration: f64,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub has_audio: bool,
}

/// Outcome of one window in the final output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct WindowOutcome {
    pub window_index: usize,
    pub window_start: f64,
    pub window_end: f64,
    /// Duration of the clip placed in the output, 0 when skipped
    pub actual_duration: f64,
    #[serde(flatten)]
    pub status: WindowStatus,
}

/// Result of assembling a job's output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AssemblyReport {
    pub success: bool,
    pub output_path: PathBuf,
    pub segments_count: usize,
    pub replacements_applied: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concat_strategy: Option<ConcatStrategy>,
    pub windows: Vec<WindowOutcome>,
    /// Output runtime minus source runtime, from replaced windows only
    pub runtime_delta: f64,
    pub work_dir: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AssemblyReport {
    pub fn skipped_count(&self) -> usize {
        self.windows
            .iter()
            .filter(|w| matches!(w.status, WindowStatus::Skipped { .. }))
            .count()
    }

    pub fn degraded_count(&self) -> usize {
        self.windows
            .iter()
            .filter(|w| matches!(w.status, WindowStatus::Degraded { .. }))
            .count()
    }
}

/// Persisted state of a reconstruction job.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct JobRecord {
    pub id: JobId,
    pub state: JobState,
    pub config: ReconstructionConfig,
    pub source: SourceInfo,
    pub output_path: PathBuf,
    #[serde(default)]
    pub merged_windows: Vec<MergedWindow>,
    #[serde(default)]
    pub windows: Vec<WindowRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report: Option<AssemblyReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    pub fn new(
        config: ReconstructionConfig,
        source: SourceInfo,
        output_path: impl Into<PathBuf>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            state: JobState::Created,
            config,
            source,
            output_path: output_path.into(),
            merged_windows: Vec::new(),
            windows: Vec::new(),
            report: None,
            error: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Move to `next`, returning the rejected pair when the transition is illegal.
    pub fn transition(&mut self, next: JobState) -> Result<(), (JobState, JobState)> {
        if !self.state.can_transition_to(next) {
            return Err((self.state, next));
        }
        self.state = next;
        self.updated_at = Utc::now();
        if next.is_terminal() {
            self.completed_at = Some(self.updated_at);
        }
        Ok(())
    }

    pub fn window(&self, index: usize) -> Option<&WindowRecord> {
        self.windows.iter().find(|w| w.window_index == index)
    }

    /// Insert or replace the record for a window index.
    pub fn upsert_window(&mut self, record: WindowRecord) {
        match self
            .windows
            .iter_mut()
            .find(|w| w.window_index == record.window_index)
        {
            Some(existing) => *existing = record,
            None => {
                self.windows.push(record);
                self.windows.sort_by_key(|w| w.window_index);
            }
        }
        self.updated_at = Utc::now();
    }
}
