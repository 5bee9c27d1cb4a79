//! Flat, versioned per-window records persisted with each job.
//!
//! A record holds enough to resume or audit a window without calling the
//! classifier or synthesis service again.

use std::path::PathBuf;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::window::{Degradation, ReplacementResult, ReplacementTask};

/// Current [`WindowRecord`] schema version.
pub const SCHEMA_VERSION: u32 = 2;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RecordError {
    #[error("window record is not a JSON object")]
    NotAnObject,

    #[error("window record missing field '{0}'")]
    MissingField(&'static str),

    #[error("unsupported window record schema version {0}")]
    UnsupportedVersion(u64),

    #[error("malformed window record: {0}")]
    Malformed(String),
}

/// Persisted state of one window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct WindowRecord {
    pub schema_version: u32,
    pub window_index: usize,
    pub window_start: f64,
    pub window_end: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flagged_start: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flagged_end: Option<f64>,
    #[serde(default)]
    pub was_trimmed: bool,
    #[serde(default)]
    pub trimmed_seconds: f64,
    /// Final processed clip, if one was produced
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clip_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_duration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub degradations: Vec<Degradation>,
}

impl WindowRecord {
    /// Record for a window that has not been processed yet.
    pub fn pending(window_index: usize, window_start: f64, window_end: f64) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            window_index,
            window_start,
            window_end,
            flagged_start: None,
            flagged_end: None,
            was_trimmed: false,
            trimmed_seconds: 0.0,
            clip_path: None,
            actual_duration: None,
            error: None,
            degradations: Vec::new(),
        }
    }

    pub fn from_task(task: &ReplacementTask) -> Self {
        Self {
            flagged_start: Some(task.flagged_start),
            flagged_end: Some(task.flagged_end),
            was_trimmed: task.was_trimmed,
            trimmed_seconds: task.trimmed_seconds,
            ..Self::pending(task.window_index, task.window_start, task.window_end)
        }
    }

    pub fn with_result(mut self, result: &ReplacementResult) -> Self {
        self.clip_path = result.clip_path.clone();
        self.actual_duration = result.clip_path.as_ref().map(|_| result.actual_duration);
        self.error = result.error.clone();
        self.degradations = result.degradations.clone();
        self
    }

    /// The result this record describes, if a clip was produced.
    pub fn to_result(&self) -> Option<ReplacementResult> {
        let clip_path = self.clip_path.clone()?;
        Some(ReplacementResult {
            clip_path: Some(clip_path),
            actual_duration: self.actual_duration.unwrap_or(0.0),
            error: None,
            degradations: self.degradations.clone(),
        })
    }

    /// Task shape reconstructed from the record.
    pub fn to_task(&self) -> ReplacementTask {
        ReplacementTask {
            window_index: self.window_index,
            window_start: self.window_start,
            window_end: self.window_end,
            was_trimmed: self.was_trimmed,
            trimmed_seconds: self.trimmed_seconds,
            flagged_start: self.flagged_start.unwrap_or(self.window_start),
            flagged_end: self.flagged_end.unwrap_or(self.window_end),
        }
    }
}

fn number(obj: &serde_json::Map<String, Value>, key: &str) -> Option<f64> {
    obj.get(key).and_then(Value::as_f64)
}

/// Read a window record of any known shape.
///
/// Version 1 records are the flat dictionaries written by earlier tooling:
/// `replacement_start`/`replacement_end` for the cut, `original_start`/
/// `original_end` for the flagged range, `replacement_path`, `was_trimmed`,
/// `trimmed_seconds`, `error`, and an optional `scene_index`. `fallback_index`
/// is used when the record does not name its own position.
pub fn migrate_window_record(value: Value, fallback_index: usize) -> Result<WindowRecord, RecordError> {
    let obj = value.as_object().ok_or(RecordError::NotAnObject)?;

    match obj.get("schema_version").and_then(Value::as_u64) {
        Some(v) if v == u64::from(SCHEMA_VERSION) => {
            return serde_json::from_value(value).map_err(|e| RecordError::Malformed(e.to_string()));
        }
        Some(v) if v != 1 => return Err(RecordError::UnsupportedVersion(v)),
        _ => {}
    }

    let flagged_start = number(obj, "original_start");
    let flagged_end = number(obj, "original_end");

    // Failed legacy windows only carry the flagged range.
    let window_start = number(obj, "replacement_start")
        .or(flagged_start)
        .ok_or(RecordError::MissingField("replacement_start"))?;
    let window_end = number(obj, "replacement_end")
        .or(flagged_end)
        .ok_or(RecordError::MissingField("replacement_end"))?;

    let window_index = obj
        .get("window_index")
        .or_else(|| obj.get("scene_index"))
        .and_then(Value::as_u64)
        .map(|i| i as usize)
        .unwrap_or(fallback_index);

    let clip_path = obj
        .get("replacement_path")
        .and_then(Value::as_str)
        .filter(|p| !p.is_empty())
        .map(PathBuf::from);

    Ok(WindowRecord {
        schema_version: SCHEMA_VERSION,
        window_index,
        window_start,
        window_end,
        flagged_start,
        flagged_end,
        was_trimmed: obj.get("was_trimmed").and_then(Value::as_bool).unwrap_or(false),
        trimmed_seconds: number(obj, "trimmed_seconds").unwrap_or(0.0),
        // Legacy records only held the synthesis service's claimed duration;
        // the clip is re-probed on resume.
        actual_duration: None,
        clip_path,
        error: obj.get("error").and_then(Value::as_str).map(str::to_string),
        degradations: Vec::new(),
    })
}

/// Migrate a whole persisted list, using list position as the fallback index.
pub fn migrate_window_records(values: Vec<Value>) -> Result<Vec<WindowRecord>, RecordError> {
    values
        .into_iter()
        .enumerate()
        .map(|(i, v)| migrate_window_record(v, i))
        .collect()
}
