//! Worker configuration.

use std::path::PathBuf;
use std::time::Duration;

use recut_models::{ReconcilePolicy, ReconstructionConfig};

use crate::error::{WorkerError, WorkerResult};

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Per-job reconstruction settings, persisted with every job
    pub reconstruction: ReconstructionConfig,
    /// Work directory for intermediate files; each job gets a subdirectory
    pub work_dir: PathBuf,
    /// Where job records are stored
    pub jobs_dir: PathBuf,
    /// Synthesis attempts after the first before a window is skipped
    pub synthesis_retries: u32,
    /// Base delay for synthesis retry backoff
    pub synthesis_retry_delay: Duration,
    /// Per FFmpeg invocation timeout
    pub ffmpeg_timeout: Duration,
    /// Keep intermediates after a successful job
    pub keep_intermediates: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            reconstruction: ReconstructionConfig::default(),
            work_dir: PathBuf::from("/tmp/recut"),
            jobs_dir: PathBuf::from("/tmp/recut/jobs"),
            synthesis_retries: 2,
            synthesis_retry_delay: Duration::from_secs(2),
            ffmpeg_timeout: Duration::from_secs(1800), // 30 minutes
            keep_intermediates: false,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

fn env_flag(key: &str) -> Option<bool> {
    std::env::var(key)
        .ok()
        .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let base = ReconstructionConfig::default();

        let reconstruction = ReconstructionConfig {
            gap_tolerance_secs: env_parse("RECUT_GAP_TOLERANCE").unwrap_or(base.gap_tolerance_secs),
            buffer_secs: env_parse("RECUT_BUFFER_SECS").unwrap_or(base.buffer_secs),
            max_synthesis_duration_secs: env_parse("RECUT_MAX_SYNTHESIS_SECS")
                .unwrap_or(base.max_synthesis_duration_secs),
            reconcile: ReconcilePolicy {
                copy_tolerance_secs: env_parse("RECUT_COPY_TOLERANCE")
                    .unwrap_or(base.reconcile.copy_tolerance_secs),
                min_stretch_ratio: env_parse("RECUT_MIN_STRETCH_RATIO")
                    .unwrap_or(base.reconcile.min_stretch_ratio),
            },
            keep_original_audio: env_flag("RECUT_KEEP_ORIGINAL_AUDIO")
                .unwrap_or(base.keep_original_audio),
            score_threshold: env_parse("RECUT_SCORE_THRESHOLD").unwrap_or(base.score_threshold),
            strict: env_flag("RECUT_STRICT").unwrap_or(base.strict),
            max_windows: env_parse("RECUT_MAX_WINDOWS").or(base.max_windows),
            max_segment_parallel: env_parse("RECUT_MAX_SEGMENT_PARALLEL")
                .unwrap_or(base.max_segment_parallel),
            max_classify_parallel: env_parse("RECUT_MAX_CLASSIFY_PARALLEL")
                .unwrap_or(base.max_classify_parallel),
            ..base
        };

        Self {
            reconstruction,
            work_dir: std::env::var("RECUT_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            jobs_dir: std::env::var("RECUT_JOBS_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.jobs_dir),
            synthesis_retries: env_parse("RECUT_SYNTHESIS_RETRIES")
                .unwrap_or(defaults.synthesis_retries),
            synthesis_retry_delay: defaults.synthesis_retry_delay,
            ffmpeg_timeout: Duration::from_secs(
                env_parse("RECUT_FFMPEG_TIMEOUT").unwrap_or(defaults.ffmpeg_timeout.as_secs()),
            ),
            keep_intermediates: env_flag("RECUT_KEEP_INTERMEDIATES")
                .unwrap_or(defaults.keep_intermediates),
        }
    }

    pub fn validate(&self) -> WorkerResult<()> {
        self.reconstruction.validate()?;
        if self.ffmpeg_timeout.is_zero() {
            return Err(WorkerError::config_error("RECUT_FFMPEG_TIMEOUT must be > 0"));
        }
        Ok(())
    }

    /// Working directory for one job.
    pub fn job_work_dir(&self, job_id: &recut_models::JobId) -> PathBuf {
        self.work_dir.join(job_id.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = WorkerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.synthesis_retries, 2);
        assert!(!config.keep_intermediates);
    }

    #[test]
    fn test_invalid_reconstruction_is_rejected() {
        let mut config = WorkerConfig::default();
        config.reconstruction.reconcile.min_stretch_ratio = 0.0;
        assert!(matches!(
            config.validate(),
            Err(WorkerError::ConfigError(_))
        ));
    }

    #[test]
    fn test_job_work_dir_is_per_job() {
        let config = WorkerConfig::default();
        let id = recut_models::JobId::from_string("abc");
        assert_eq!(config.job_work_dir(&id), PathBuf::from("/tmp/recut/abc"));
    }
}
