//! Per-job reconstruction configuration.
//!
//! Built once per job and persisted alongside it so a run can be audited.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::encoding::EncodingConfig;

/// Invalid configuration value.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("invalid config: {field}: {message}")]
pub struct ConfigError {
    pub field: &'static str,
    pub message: String,
}

impl ConfigError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Duration reconciliation bounds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ReconcilePolicy {
    /// Clips within this many seconds of the target are copied as-is
    #[serde(default = "default_copy_tolerance")]
    pub copy_tolerance_secs: f64,
    /// Shorter clips at or above this duration ratio are time-stretched;
    /// below it they are accepted shorter
    #[serde(default = "default_min_stretch_ratio")]
    pub min_stretch_ratio: f64,
}

fn default_copy_tolerance() -> f64 {
    0.2
}
fn default_min_stretch_ratio() -> f64 {
    0.8
}

impl Default for ReconcilePolicy {
    fn default() -> Self {
        Self {
            copy_tolerance_secs: default_copy_tolerance(),
            min_stretch_ratio: default_min_stretch_ratio(),
        }
    }
}

/// Configuration for one reconstruction job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ReconstructionConfig {
    /// Segments whose gap is at most this are merged
    #[serde(default = "default_gap_tolerance")]
    pub gap_tolerance_secs: f64,

    /// Padding added on both sides of a window before cutting
    #[serde(default = "default_buffer")]
    pub buffer_secs: f64,

    /// Longest clip the synthesis service will produce
    #[serde(default = "default_max_synthesis")]
    pub max_synthesis_duration_secs: f64,

    /// Trimming never leaves less than this much of the flagged onset covered
    #[serde(default = "default_min_coverage")]
    pub min_flagged_coverage_secs: f64,

    #[serde(default)]
    pub reconcile: ReconcilePolicy,

    /// Overlay the source's audio under replacement clips
    #[serde(default = "default_true")]
    pub keep_original_audio: bool,

    /// Minimum classifier score for a scene to be flagged
    #[serde(default = "default_score_threshold")]
    pub score_threshold: f64,

    /// Strict mode lowers the threshold to [`STRICT_SCORE_THRESHOLD`]
    #[serde(default)]
    pub strict: bool,

    /// Scenes shorter than this are folded into their predecessor
    #[serde(default = "default_min_scene_length")]
    pub min_scene_length_secs: f64,

    /// Only the first N windows are replaced when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_windows: Option<usize>,

    #[serde(default = "default_parallel")]
    pub max_segment_parallel: usize,

    #[serde(default = "default_parallel")]
    pub max_classify_parallel: usize,

    #[serde(default)]
    pub encoding: EncodingConfig,
}

/// Score threshold used in strict mode.
pub const STRICT_SCORE_THRESHOLD: f64 = 0.2;

fn default_gap_tolerance() -> f64 {
    2.0
}
fn default_buffer() -> f64 {
    1.5
}
fn default_max_synthesis() -> f64 {
    8.0
}
fn default_min_coverage() -> f64 {
    1.0
}
fn default_true() -> bool {
    true
}
fn default_score_threshold() -> f64 {
    0.4
}
fn default_min_scene_length() -> f64 {
    1.0
}
fn default_parallel() -> usize {
    4
}

impl Default for ReconstructionConfig {
    fn default() -> Self {
        Self {
            gap_tolerance_secs: default_gap_tolerance(),
            buffer_secs: default_buffer(),
            max_synthesis_duration_secs: default_max_synthesis(),
            min_flagged_coverage_secs: default_min_coverage(),
            reconcile: ReconcilePolicy::default(),
            keep_original_audio: true,
            score_threshold: default_score_threshold(),
            strict: false,
            min_scene_length_secs: default_min_scene_length(),
            max_windows: None,
            max_segment_parallel: default_parallel(),
            max_classify_parallel: default_parallel(),
            encoding: EncodingConfig::default(),
        }
    }
}

fn non_negative(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if !value.is_finite() || value < 0.0 {
        return Err(ConfigError::new(field, format!("must be >= 0, got {value}")));
    }
    Ok(())
}

fn positive(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if !value.is_finite() || value <= 0.0 {
        return Err(ConfigError::new(field, format!("must be > 0, got {value}")));
    }
    Ok(())
}

impl ReconstructionConfig {
    /// Threshold actually applied, accounting for strict mode.
    pub fn effective_threshold(&self) -> f64 {
        if self.strict {
            STRICT_SCORE_THRESHOLD
        } else {
            self.score_threshold
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        non_negative("gap_tolerance_secs", self.gap_tolerance_secs)?;
        non_negative("buffer_secs", self.buffer_secs)?;
        positive("max_synthesis_duration_secs", self.max_synthesis_duration_secs)?;
        positive("min_flagged_coverage_secs", self.min_flagged_coverage_secs)?;
        non_negative("min_scene_length_secs", self.min_scene_length_secs)?;
        non_negative(
            "reconcile.copy_tolerance_secs",
            self.reconcile.copy_tolerance_secs,
        )?;

        if self.max_synthesis_duration_secs < self.min_flagged_coverage_secs {
            return Err(ConfigError::new(
                "max_synthesis_duration_secs",
                format!(
                    "{} is below min_flagged_coverage_secs {}",
                    self.max_synthesis_duration_secs, self.min_flagged_coverage_secs
                ),
            ));
        }

        let ratio = self.reconcile.min_stretch_ratio;
        if !(ratio > 0.0 && ratio <= 1.0) {
            return Err(ConfigError::new(
                "reconcile.min_stretch_ratio",
                format!("must be in (0, 1], got {ratio}"),
            ));
        }

        if !(0.0..=1.0).contains(&self.score_threshold) {
            return Err(ConfigError::new(
                "score_threshold",
                format!("must be in [0, 1], got {}", self.score_threshold),
            ));
        }

        if self.max_segment_parallel == 0 {
            return Err(ConfigError::new("max_segment_parallel", "must be at least 1"));
        }
        if self.max_classify_parallel == 0 {
            return Err(ConfigError::new("max_classify_parallel", "must be at least 1"));
        }
        Ok(())
    }
}
