//! Seams to the external services the engine depends on.
//!
//! Scene detection, classification and clip synthesis are provided by
//! adapters; the engine only sees these traits. Every call must return or
//! error, never block indefinitely.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use recut_media::MediaError;
use recut_models::ScoredSegment;

use crate::error::WorkerResult;
use crate::prompt::DescriptionHints;

/// A candidate scene on the source timeline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SceneRange {
    pub index: usize,
    pub start: f64,
    pub end: f64,
}

impl SceneRange {
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

#[async_trait]
pub trait SceneDetector: Send + Sync {
    /// Ordered, non-overlapping scene ranges covering the source.
    async fn detect(&self, source: &Path, min_scene_length: f64) -> WorkerResult<Vec<(f64, f64)>>;
}

#[async_trait]
pub trait Classifier: Send + Sync {
    /// Score one scene.
    async fn classify(&self, source: &Path, scene: &SceneRange) -> WorkerResult<ScoredSegment>;
}

/// Everything the synthesis service gets for one window.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisRequest {
    pub window_index: usize,
    pub first_frame: PathBuf,
    pub last_frame: PathBuf,
    pub target_duration: f64,
    pub hints: DescriptionHints,
    /// Where the service should put its clip
    pub output: PathBuf,
}

/// A clip as delivered, before any conforming.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesizedClip {
    pub path: PathBuf,
    /// Duration the service claims; the clip is probed regardless
    pub claimed_duration: Option<f64>,
}

#[async_trait]
pub trait Synthesizer: Send + Sync {
    async fn synthesize(&self, request: &SynthesisRequest) -> WorkerResult<SynthesizedClip>;
}

/// Serves clips rendered ahead of time as `replacement_<index>.mp4`.
#[derive(Debug, Clone)]
pub struct PrerenderedSynthesizer {
    clips_dir: PathBuf,
}

impl PrerenderedSynthesizer {
    pub fn new(clips_dir: impl Into<PathBuf>) -> Self {
        Self {
            clips_dir: clips_dir.into(),
        }
    }

    pub fn clip_path(&self, window_index: usize) -> PathBuf {
        self.clips_dir
            .join(format!("replacement_{window_index}.mp4"))
    }
}

#[async_trait]
impl Synthesizer for PrerenderedSynthesizer {
    async fn synthesize(&self, request: &SynthesisRequest) -> WorkerResult<SynthesizedClip> {
        let path = self.clip_path(request.window_index);
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(MediaError::FileNotFound(path).into());
        }
        debug!(
            window_index = request.window_index,
            clip = %path.display(),
            "Using pre-rendered replacement"
        );
        Ok(SynthesizedClip {
            path,
            claimed_duration: None,
        })
    }
}
