//! The transcoding seam and its FFmpeg implementation.
//!
//! Every primitive either succeeds, fails, or times out; none of them can be
//! cancelled once started.

use std::path::Path;

use async_trait::async_trait;
use tracing::debug;

use recut_models::EncodingConfig;

use crate::command::{format_fps, FfmpegCommand, FfmpegRunner};
use crate::error::MediaResult;
use crate::probe::{probe_video, VideoInfo};

/// How a source range is cut out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractMode {
    /// Stream copy; cuts snap to keyframes
    FastCopy,
    /// Re-encode for frame-accurate cuts
    Reencode,
}

/// How a concat list is joined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConcatMode {
    StreamCopy,
    Reencode,
}

impl ConcatMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConcatMode::StreamCopy => "stream_copy",
            ConcatMode::Reencode => "reencode",
        }
    }
}

/// Audio handling while normalizing a clip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioTarget {
    /// Re-encode the clip's own audio
    Keep,
    /// The clip has no audio but the output needs a track: add silence
    Silent,
    /// Drop audio entirely
    Drop,
}

/// Format a replacement clip is conformed to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalizeTarget {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub audio: AudioTarget,
}

/// Transcoding primitives the reconstruction depends on.
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Media metadata.
    async fn probe(&self, path: &Path) -> MediaResult<VideoInfo>;

    /// Cut `[start, end)` of `source` into `output`.
    async fn extract(
        &self,
        source: &Path,
        start: f64,
        end: f64,
        output: &Path,
        mode: ExtractMode,
    ) -> MediaResult<()>;

    /// Write the frame at `at` seconds as a still image.
    async fn extract_frame(&self, source: &Path, at: f64, output: &Path) -> MediaResult<()>;

    /// Scale, letterbox and frame-rate conform `input`.
    async fn normalize(
        &self,
        input: &Path,
        output: &Path,
        target: &NormalizeTarget,
    ) -> MediaResult<()>;

    /// Hard cut at `duration` seconds, re-encoded.
    async fn trim(&self, input: &Path, duration: f64, output: &Path) -> MediaResult<()>;

    /// Slow the clip down by `factor` (> 1 lengthens it), adjusting audio tempo
    /// when the clip has audio.
    async fn stretch(
        &self,
        input: &Path,
        factor: f64,
        has_audio: bool,
        output: &Path,
    ) -> MediaResult<()>;

    /// Replace the audio of `video` with `source`'s audio from
    /// `[start, start + duration)`.
    async fn overlay_audio(
        &self,
        video: &Path,
        source: &Path,
        start: f64,
        duration: f64,
        output: &Path,
    ) -> MediaResult<()>;

    /// Join the files named in a concat demuxer list.
    async fn concat(&self, list_file: &Path, output: &Path, mode: ConcatMode) -> MediaResult<()>;
}

/// [`Transcoder`] backed by the FFmpeg CLI.
#[derive(Debug, Clone, Default)]
pub struct FfmpegTranscoder {
    encoding: EncodingConfig,
    runner: FfmpegRunner,
}

impl FfmpegTranscoder {
    pub fn new(encoding: EncodingConfig) -> Self {
        Self {
            encoding,
            runner: FfmpegRunner::new(),
        }
    }

    /// Kill any single FFmpeg invocation running longer than `secs`.
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.runner = self.runner.with_timeout(secs);
        self
    }

    pub fn encoding(&self) -> &EncodingConfig {
        &self.encoding
    }
}

/// Scale to fit inside the target, pad to exactly the target, conform fps.
pub fn letterbox_filter(width: u32, height: u32, fps: f64) -> String {
    format!(
        "scale={w}:{h}:force_original_aspect_ratio=decrease,\
         pad={w}:{h}:(ow-iw)/2:(oh-ih)/2:color=black,setsar=1,fps={fps}",
        w = width,
        h = height,
        fps = format_fps(fps),
    )
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn probe(&self, path: &Path) -> MediaResult<VideoInfo> {
        probe_video(path).await
    }

    async fn extract(
        &self,
        source: &Path,
        start: f64,
        end: f64,
        output: &Path,
        mode: ExtractMode,
    ) -> MediaResult<()> {
        let cmd = FfmpegCommand::new(source, output)
            .seek(start)
            .duration(end - start)
            .operation("extract");
        let cmd = match mode {
            ExtractMode::FastCopy => cmd.codec_copy(),
            ExtractMode::Reencode => cmd
                .encode_with(&self.encoding)
                .output_args(["-pix_fmt", "yuv420p"]),
        };
        let cmd = cmd.output_args(["-avoid_negative_ts", "make_zero"]);
        self.runner.run(&cmd).await
    }

    async fn extract_frame(&self, source: &Path, at: f64, output: &Path) -> MediaResult<()> {
        let cmd = FfmpegCommand::new(source, output)
            .seek(at)
            .single_frame()
            .output_args(["-q:v", "2"])
            .operation("extract_frame");
        self.runner.run(&cmd).await
    }

    async fn normalize(
        &self,
        input: &Path,
        output: &Path,
        target: &NormalizeTarget,
    ) -> MediaResult<()> {
        let filter = letterbox_filter(target.width, target.height, target.fps);
        let mut cmd = FfmpegCommand::new(input, output).operation("normalize");

        cmd = match target.audio {
            AudioTarget::Keep => cmd
                .video_filter(filter)
                .map("0:v:0")
                .map("0:a:0")
                .encode_with(&self.encoding),
            AudioTarget::Silent => cmd
                .lavfi_input(format!(
                    "anullsrc=channel_layout=stereo:sample_rate={}",
                    self.encoding.audio_sample_rate
                ))
                .video_filter(filter)
                .map("0:v:0")
                .map("1:a:0")
                .encode_with(&self.encoding)
                .shortest(),
            AudioTarget::Drop => cmd
                .video_filter(filter)
                .map("0:v:0")
                .encode_video_only(&self.encoding),
        };
        let cmd = cmd.output_args(["-pix_fmt", "yuv420p"]);

        debug!(input = %input.display(), ?target, "Normalizing clip");
        self.runner.run(&cmd).await
    }

    async fn trim(&self, input: &Path, duration: f64, output: &Path) -> MediaResult<()> {
        let cmd = FfmpegCommand::new(input, output)
            .output_duration(duration)
            .encode_with(&self.encoding)
            .output_args(["-pix_fmt", "yuv420p"])
            .operation("trim");
        self.runner.run(&cmd).await
    }

    async fn stretch(
        &self,
        input: &Path,
        factor: f64,
        has_audio: bool,
        output: &Path,
    ) -> MediaResult<()> {
        let cmd = FfmpegCommand::new(input, output)
            .video_filter(format!("setpts={:.6}*PTS", factor))
            .operation("stretch");
        let cmd = if has_audio {
            cmd.audio_filter(format!("atempo={:.6}", 1.0 / factor))
                .encode_with(&self.encoding)
        } else {
            cmd.encode_video_only(&self.encoding)
        };
        let cmd = cmd.output_args(["-pix_fmt", "yuv420p"]);
        self.runner.run(&cmd).await
    }

    async fn overlay_audio(
        &self,
        video: &Path,
        source: &Path,
        start: f64,
        duration: f64,
        output: &Path,
    ) -> MediaResult<()> {
        let cmd = FfmpegCommand::new(video, output)
            .input(source)
            .seek(start)
            .duration(duration)
            .map("0:v:0")
            .map("1:a:0")
            .output_args(["-c:v", "copy"])
            .output_args(self.encoding.audio_args())
            .shortest()
            .operation("overlay_audio");
        self.runner.run(&cmd).await
    }

    async fn concat(&self, list_file: &Path, output: &Path, mode: ConcatMode) -> MediaResult<()> {
        let cmd = FfmpegCommand::new(list_file, output)
            .concat_list()
            .operation(match mode {
                ConcatMode::StreamCopy => "concat_copy",
                ConcatMode::Reencode => "concat_reencode",
            });
        let cmd = match mode {
            ConcatMode::StreamCopy => cmd.codec_copy(),
            ConcatMode::Reencode => cmd
                .encode_with(&self.encoding)
                .output_args(["-pix_fmt", "yuv420p"]),
        };
        self.runner
            .run_with_progress(&cmd, |p| {
                if p.is_complete {
                    debug!(frames = p.frame, speed = p.speed, "Concatenation finished");
                }
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_letterbox_filter() {
        let filter = letterbox_filter(1920, 1080, 23.976);
        assert!(filter.starts_with("scale=1920:1080:force_original_aspect_ratio=decrease,"));
        assert!(filter.contains("pad=1920:1080:(ow-iw)/2:(oh-ih)/2"));
        assert!(filter.ends_with("fps=23.976"));
    }

    #[test]
    fn test_concat_mode_labels() {
        assert_eq!(ConcatMode::StreamCopy.as_str(), "stream_copy");
        assert_eq!(ConcatMode::Reencode.as_str(), "reencode");
    }
}
