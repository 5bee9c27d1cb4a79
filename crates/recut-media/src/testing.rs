//! In-memory stand-in for FFmpeg used by tests.
//!
//! "Media" files are small JSON documents describing duration, resolution,
//! frame rate and audio presence. Each primitive reads its inputs, derives the
//! output description the real tool would produce, and writes it. Operations
//! can be told to fail, and every call is recorded.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{MediaError, MediaResult};
use crate::probe::VideoInfo;
use crate::transcoder::{AudioTarget, ConcatMode, ExtractMode, NormalizeTarget, Transcoder};

/// Description stored in a fake media file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FakeMedia {
    pub duration: f64,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub has_audio: bool,
}

impl FakeMedia {
    pub fn new(duration: f64, width: u32, height: u32, fps: f64) -> Self {
        Self {
            duration,
            width,
            height,
            fps,
            has_audio: true,
        }
    }

    pub fn silent(mut self) -> Self {
        self.has_audio = false;
        self
    }

    pub async fn write(&self, path: impl AsRef<Path>) -> MediaResult<()> {
        tokio::fs::write(path, serde_json::to_vec(self)?).await?;
        Ok(())
    }

    pub async fn read(path: impl AsRef<Path>) -> MediaResult<Self> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|_| MediaError::FileNotFound(path.to_path_buf()))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| MediaError::InvalidVideo(format!("{}: {e}", path.display())))
    }

    fn params(&self) -> (u32, u32, i64, bool) {
        (self.width, self.height, (self.fps * 1000.0).round() as i64, self.has_audio)
    }
}

/// Transcoder operation names, for failure injection and call counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FakeOp {
    Probe,
    ExtractReencode,
    ExtractFastCopy,
    ExtractFrame,
    Normalize,
    Trim,
    Stretch,
    OverlayAudio,
    ConcatCopy,
    ConcatReencode,
}

#[derive(Debug, Clone)]
struct FailRule {
    op: FakeOp,
    /// Only fail when a path argument contains this
    path_contains: Option<String>,
}

/// One recorded transcoder call.
#[derive(Debug, Clone, PartialEq)]
pub struct FakeCall {
    pub op: FakeOp,
    pub paths: Vec<PathBuf>,
}

/// Scriptable [`Transcoder`] that never shells out.
#[derive(Debug, Default)]
pub struct FakeTranscoder {
    rules: Mutex<Vec<FailRule>>,
    calls: Mutex<Vec<FakeCall>>,
    /// Stream copy concat fails when segment parameters differ, like the real tool
    strict_stream_copy: bool,
}

impl FakeTranscoder {
    pub fn new() -> Self {
        Self {
            strict_stream_copy: true,
            ..Default::default()
        }
    }

    /// Fail every call of `op`.
    pub fn fail_on(self, op: FakeOp) -> Self {
        self.push_rule(FailRule {
            op,
            path_contains: None,
        });
        self
    }

    /// Fail calls of `op` that touch a path containing `needle`.
    pub fn fail_on_path(self, op: FakeOp, needle: impl Into<String>) -> Self {
        self.push_rule(FailRule {
            op,
            path_contains: Some(needle.into()),
        });
        self
    }

    fn push_rule(&self, rule: FailRule) {
        if let Ok(mut rules) = self.rules.lock() {
            rules.push(rule);
        }
    }

    pub fn calls(&self) -> Vec<FakeCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn call_count(&self, op: FakeOp) -> usize {
        self.calls().iter().filter(|c| c.op == op).count()
    }

    fn enter(&self, op: FakeOp, paths: &[&Path]) -> MediaResult<()> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(FakeCall {
                op,
                paths: paths.iter().map(|p| p.to_path_buf()).collect(),
            });
        }

        let rules = self.rules.lock().map(|r| r.clone()).unwrap_or_default();
        let fails = rules.iter().any(|rule| {
            rule.op == op
                && match &rule.path_contains {
                    None => true,
                    Some(needle) => paths
                        .iter()
                        .any(|p| p.to_string_lossy().contains(needle.as_str())),
                }
        });

        if fails {
            Err(MediaError::ffmpeg_failed(
                format!("simulated {op:?} failure"),
                Some("simulated".to_string()),
                Some(1),
            ))
        } else {
            Ok(())
        }
    }
}

/// Files named in a concat demuxer list, in order.
pub fn parse_concat_list(contents: &str) -> Vec<PathBuf> {
    contents
        .lines()
        .filter_map(|line| {
            let quoted = line.trim().strip_prefix("file ")?;
            let inner = quoted.strip_prefix('\'')?.strip_suffix('\'')?;
            Some(PathBuf::from(inner.replace("'\\''", "'")))
        })
        .collect()
}

#[async_trait]
impl Transcoder for FakeTranscoder {
    async fn probe(&self, path: &Path) -> MediaResult<VideoInfo> {
        self.enter(FakeOp::Probe, &[path])?;
        let media = FakeMedia::read(path).await?;
        Ok(VideoInfo {
            duration: media.duration,
            width: media.width,
            height: media.height,
            fps: media.fps,
            codec: "fake".to_string(),
            has_audio: media.has_audio,
            audio_codec: media.has_audio.then(|| "fake".to_string()),
        })
    }

    async fn extract(
        &self,
        source: &Path,
        start: f64,
        end: f64,
        output: &Path,
        mode: ExtractMode,
    ) -> MediaResult<()> {
        let op = match mode {
            ExtractMode::Reencode => FakeOp::ExtractReencode,
            ExtractMode::FastCopy => FakeOp::ExtractFastCopy,
        };
        self.enter(op, &[source, output])?;
        let src = FakeMedia::read(source).await?;
        let end = end.min(src.duration);
        if end <= start {
            return Err(MediaError::ffmpeg_failed("empty range", None, Some(1)));
        }
        FakeMedia {
            duration: end - start,
            ..src
        }
        .write(output)
        .await
    }

    async fn extract_frame(&self, source: &Path, at: f64, output: &Path) -> MediaResult<()> {
        self.enter(FakeOp::ExtractFrame, &[source, output])?;
        let src = FakeMedia::read(source).await?;
        if at < 0.0 || at > src.duration {
            return Err(MediaError::ffmpeg_failed("seek past end", None, Some(1)));
        }
        tokio::fs::write(output, format!("frame@{at:.3}")).await?;
        Ok(())
    }

    async fn normalize(
        &self,
        input: &Path,
        output: &Path,
        target: &NormalizeTarget,
    ) -> MediaResult<()> {
        self.enter(FakeOp::Normalize, &[input, output])?;
        let clip = FakeMedia::read(input).await?;
        FakeMedia {
            duration: clip.duration,
            width: target.width,
            height: target.height,
            fps: target.fps,
            has_audio: match target.audio {
                AudioTarget::Keep => clip.has_audio,
                AudioTarget::Silent => true,
                AudioTarget::Drop => false,
            },
        }
        .write(output)
        .await
    }

    async fn trim(&self, input: &Path, duration: f64, output: &Path) -> MediaResult<()> {
        self.enter(FakeOp::Trim, &[input, output])?;
        let clip = FakeMedia::read(input).await?;
        FakeMedia {
            duration: clip.duration.min(duration),
            ..clip
        }
        .write(output)
        .await
    }

    async fn stretch(
        &self,
        input: &Path,
        factor: f64,
        _has_audio: bool,
        output: &Path,
    ) -> MediaResult<()> {
        self.enter(FakeOp::Stretch, &[input, output])?;
        let clip = FakeMedia::read(input).await?;
        FakeMedia {
            duration: clip.duration * factor,
            ..clip
        }
        .write(output)
        .await
    }

    async fn overlay_audio(
        &self,
        video: &Path,
        source: &Path,
        start: f64,
        duration: f64,
        output: &Path,
    ) -> MediaResult<()> {
        self.enter(FakeOp::OverlayAudio, &[video, source, output])?;
        let clip = FakeMedia::read(video).await?;
        let src = FakeMedia::read(source).await?;
        if !src.has_audio {
            return Err(MediaError::ffmpeg_failed(
                "source has no audio stream",
                None,
                Some(1),
            ));
        }
        let available = (src.duration - start).max(0.0).min(duration);
        FakeMedia {
            duration: clip.duration.min(available),
            has_audio: true,
            ..clip
        }
        .write(output)
        .await
    }

    async fn concat(&self, list_file: &Path, output: &Path, mode: ConcatMode) -> MediaResult<()> {
        let op = match mode {
            ConcatMode::StreamCopy => FakeOp::ConcatCopy,
            ConcatMode::Reencode => FakeOp::ConcatReencode,
        };
        self.enter(op, &[list_file, output])?;

        let contents = tokio::fs::read_to_string(list_file).await?;
        let files = parse_concat_list(&contents);
        let first_path = files
            .first()
            .ok_or_else(|| MediaError::ffmpeg_failed("empty concat list", None, Some(1)))?;

        let mut parts = Vec::with_capacity(files.len());
        for file in &files {
            parts.push(FakeMedia::read(file).await?);
        }
        let first = parts[0].clone();

        if mode == ConcatMode::StreamCopy
            && self.strict_stream_copy
            && parts.iter().any(|p| p.params() != first.params())
        {
            return Err(MediaError::ffmpeg_failed(
                format!("codec parameters differ from {}", first_path.display()),
                None,
                Some(1),
            ));
        }

        FakeMedia {
            duration: parts.iter().map(|p| p.duration).sum(),
            ..first
        }
        .write(output)
        .await
    }
}
