//! Put the source's original audio under a replacement clip.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::error::MediaError;
use crate::transcoder::Transcoder;

/// Result of an audio overlay attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioSync {
    pub path: PathBuf,
    pub duration: f64,
    /// Set when the overlay failed and `path` is the untouched input
    pub failure: Option<String>,
}

/// Replace the audio of `video` with the source's audio sampled from
/// `[audio_start, audio_start + audio_duration)`.
///
/// On failure the input video is returned unchanged; a failed overlay never
/// fails the window.
pub async fn overlay_original_audio(
    transcoder: &dyn Transcoder,
    video: &Path,
    video_duration: f64,
    source: &Path,
    audio_start: f64,
    audio_duration: f64,
    output: &Path,
) -> AudioSync {
    let attempt = async {
        transcoder
            .overlay_audio(video, source, audio_start, audio_duration, output)
            .await?;
        let info = transcoder.probe(output).await?;
        if !info.has_audio {
            return Err(MediaError::AudioSyncFailed(
                "output has no audio stream".to_string(),
            ));
        }
        Ok(info.duration)
    };

    match attempt.await {
        Ok(duration) => {
            info!(
                audio_start,
                audio_duration,
                duration,
                "Original audio restored under replacement"
            );
            AudioSync {
                path: output.to_path_buf(),
                duration,
                failure: None,
            }
        }
        Err(e) => {
            let e = match e {
                e @ MediaError::AudioSyncFailed(_) => e,
                other => MediaError::AudioSyncFailed(other.to_string()),
            };
            warn!(video = %video.display(), error = %e, "Keeping clip audio");
            AudioSync {
                path: video.to_path_buf(),
                duration: video_duration,
                failure: Some(e.to_string()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeMedia, FakeOp, FakeTranscoder};
    use tempfile::TempDir;

    async fn setup(dir: &TempDir, source_audio: bool) -> (PathBuf, PathBuf) {
        let source = dir.path().join("source.mp4");
        let mut media = FakeMedia::new(60.0, 1920, 1080, 24.0);
        media.has_audio = source_audio;
        media.write(&source).await.unwrap();

        let video = dir.path().join("window_001_reconciled.mp4");
        FakeMedia::new(6.0, 1920, 1080, 24.0)
            .silent()
            .write(&video)
            .await
            .unwrap();
        (source, video)
    }

    #[tokio::test]
    async fn test_overlay_uses_window_audio() {
        let dir = TempDir::new().unwrap();
        let (source, video) = setup(&dir, true).await;
        let fake = FakeTranscoder::new();
        let out = dir.path().join("window_001_final.mp4");

        let sync = overlay_original_audio(&fake, &video, 6.0, &source, 20.0, 6.0, &out).await;

        assert_eq!(sync.path, out);
        assert!(sync.failure.is_none());
        assert!(FakeMedia::read(&out).await.unwrap().has_audio);
    }

    #[tokio::test]
    async fn test_overlay_failure_returns_input() {
        let dir = TempDir::new().unwrap();
        let (source, video) = setup(&dir, true).await;
        let fake = FakeTranscoder::new().fail_on(FakeOp::OverlayAudio);
        let out = dir.path().join("window_001_final.mp4");

        let sync = overlay_original_audio(&fake, &video, 6.0, &source, 20.0, 6.0, &out).await;

        assert_eq!(sync.path, video);
        assert_eq!(sync.duration, 6.0);
        assert!(sync.failure.is_some());
    }

    #[tokio::test]
    async fn test_overlay_from_silent_source_fails_open() {
        let dir = TempDir::new().unwrap();
        let (source, video) = setup(&dir, false).await;
        let fake = FakeTranscoder::new();
        let out = dir.path().join("window_001_final.mp4");

        let sync = overlay_original_audio(&fake, &video, 6.0, &source, 20.0, 6.0, &out).await;
        assert_eq!(sync.path, video);
    }
}
