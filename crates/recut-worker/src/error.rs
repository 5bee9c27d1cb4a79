//! Worker error types.

use std::path::PathBuf;

use thiserror::Error;

use recut_models::{ConfigError, JobState, RecordError, SegmentError};

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Invalid segment: {0}")]
    InvalidSegment(#[from] SegmentError),

    #[error("Assembly failed: {message} (intermediates kept in {})", work_dir.display())]
    AssemblyFailed { message: String, work_dir: PathBuf },

    #[error("Synthesis failed: {0}")]
    SynthesisFailed(String),

    #[error("Classification failed: {0}")]
    ClassificationFailed(String),

    #[error("Scene detection failed: {0}")]
    DetectionFailed(String),

    #[error("Window {index} lies outside the source ({message})")]
    WindowOutOfRange { index: usize, message: String },

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Invalid job transition: {from} -> {to}")]
    InvalidTransition { from: JobState, to: JobState },

    #[error("Job cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Job record error: {0}")]
    Record(#[from] RecordError),

    #[error("Media error: {0}")]
    Media(#[from] recut_media::MediaError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ConfigError> for WorkerError {
    fn from(e: ConfigError) -> Self {
        Self::ConfigError(e.to_string())
    }
}

impl From<(JobState, JobState)> for WorkerError {
    fn from((from, to): (JobState, JobState)) -> Self {
        Self::InvalidTransition { from, to }
    }
}

impl WorkerError {
    pub fn assembly_failed(message: impl Into<String>, work_dir: impl Into<PathBuf>) -> Self {
        Self::AssemblyFailed {
            message: message.into(),
            work_dir: work_dir.into(),
        }
    }

    pub fn synthesis_failed(msg: impl Into<String>) -> Self {
        Self::SynthesisFailed(msg.into())
    }

    pub fn classification_failed(msg: impl Into<String>) -> Self {
        Self::ClassificationFailed(msg.into())
    }

    pub fn detection_failed(msg: impl Into<String>) -> Self {
        Self::DetectionFailed(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Check if error is retryable.
    ///
    /// Only calls to external collaborators are; anything the engine itself
    /// rejected will fail the same way again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            WorkerError::SynthesisFailed(_)
                | WorkerError::ClassificationFailed(_)
                | WorkerError::DetectionFailed(_)
                | WorkerError::Io(_)
        )
    }

    /// Working directory preserved for diagnosis, if any.
    pub fn preserved_work_dir(&self) -> Option<&std::path::Path> {
        match self {
            WorkerError::AssemblyFailed { work_dir, .. } => Some(work_dir),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assembly_failed_mentions_work_dir() {
        let err = WorkerError::assembly_failed("re-encode failed", "/tmp/recut/job-1");
        assert!(err.to_string().contains("/tmp/recut/job-1"));
        assert_eq!(
            err.preserved_work_dir(),
            Some(std::path::Path::new("/tmp/recut/job-1"))
        );
    }

    #[test]
    fn test_retryable() {
        assert!(WorkerError::synthesis_failed("timeout").is_retryable());
        assert!(!WorkerError::Cancelled.is_retryable());
        assert!(!WorkerError::from(SegmentError::invalid("end <= start")).is_retryable());
    }

    #[test]
    fn test_transition_conversion() {
        let err = WorkerError::from((JobState::Succeeded, JobState::Failed));
        assert_eq!(err.to_string(), "Invalid job transition: succeeded -> failed");
    }
}
