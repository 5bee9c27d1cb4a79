//! Error types for media operations.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors that can occur during media processing.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("FFmpeg not found in PATH")]
    FfmpegNotFound,

    #[error("FFprobe not found in PATH")]
    FfprobeNotFound,

    #[error("FFmpeg command failed: {message}")]
    FfmpegFailed {
        message: String,
        stderr: Option<String>,
        exit_code: Option<i32>,
    },

    #[error("FFprobe command failed: {message}")]
    FfprobeFailed {
        message: String,
        stderr: Option<String>,
    },

    #[error("extraction of {start:.3}s-{end:.3}s failed: {message}")]
    ExtractionFailed { start: f64, end: f64, message: String },

    #[error("normalization of {path} failed: {message}")]
    NormalizationFailed { path: PathBuf, message: String },

    #[error("duration reconciliation failed: {0}")]
    ReconciliationFailed(String),

    #[error("audio sync failed: {0}")]
    AudioSyncFailed(String),

    #[error("concatenation failed ({strategy}): {message}")]
    ConcatenationFailed {
        strategy: &'static str,
        message: String,
    },

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Operation timed out after {0} seconds")]
    Timeout(u64),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Invalid video file: {0}")]
    InvalidVideo(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MediaError {
    /// Create an FFmpeg failure error.
    pub fn ffmpeg_failed(
        message: impl Into<String>,
        stderr: Option<String>,
        exit_code: Option<i32>,
    ) -> Self {
        Self::FfmpegFailed {
            message: message.into(),
            stderr,
            exit_code,
        }
    }

    pub fn normalization_failed(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::NormalizationFailed {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn concat_failed(strategy: &'static str, message: impl Into<String>) -> Self {
        Self::ConcatenationFailed {
            strategy,
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Tail of the tool's stderr, when the failure carried one.
    pub fn stderr(&self) -> Option<&str> {
        match self {
            Self::FfmpegFailed { stderr, .. } | Self::FfprobeFailed { stderr, .. } => {
                stderr.as_deref()
            }
            _ => None,
        }
    }
}
