//! Conform a replacement clip to the source's resolution and frame rate.

use std::path::Path;

use tracing::{debug, info};

use crate::error::{MediaError, MediaResult};
use crate::probe::VideoInfo;
use crate::transcoder::{AudioTarget, NormalizeTarget, Transcoder};

/// Frame-rate difference below which two rates are considered equal.
const FPS_EPSILON: f64 = 0.01;

/// Pick how audio is handled so the normalized clip matches the source's
/// stream layout.
pub fn audio_target(source: &VideoInfo, clip: &VideoInfo) -> AudioTarget {
    match (source.has_audio, clip.has_audio) {
        (true, true) => AudioTarget::Keep,
        (true, false) => AudioTarget::Silent,
        (false, _) => AudioTarget::Drop,
    }
}

/// Letterbox and frame-rate conform `clip` into `output`.
///
/// Any failure is reported as [`MediaError::NormalizationFailed`]; callers
/// treat the window as unfillable instead of retrying with weaker settings.
pub async fn normalize_clip(
    transcoder: &dyn Transcoder,
    clip: &Path,
    output: &Path,
    source: &VideoInfo,
) -> MediaResult<VideoInfo> {
    let fail = |message: String| MediaError::normalization_failed(clip, message);

    let clip_info = transcoder
        .probe(clip)
        .await
        .map_err(|e| fail(format!("probe failed: {e}")))?;

    if clip_info.duration <= 0.0 {
        return Err(fail("clip has no duration".to_string()));
    }

    let target = NormalizeTarget {
        width: source.width,
        height: source.height,
        fps: source.fps,
        audio: audio_target(source, &clip_info),
    };

    debug!(
        clip = %clip.display(),
        from = %format!("{}x{}@{:.3}", clip_info.width, clip_info.height, clip_info.fps),
        to = %format!("{}x{}@{:.3}", target.width, target.height, target.fps),
        audio = ?target.audio,
        "Normalizing replacement clip"
    );

    transcoder
        .normalize(clip, output, &target)
        .await
        .map_err(|e| fail(e.to_string()))?;

    let out = transcoder
        .probe(output)
        .await
        .map_err(|e| fail(format!("normalized output unreadable: {e}")))?;

    if out.width != target.width
        || out.height != target.height
        || (out.fps - target.fps).abs() > FPS_EPSILON
    {
        return Err(fail(format!(
            "output is {}x{}@{:.3}, expected {}x{}@{:.3}",
            out.width, out.height, out.fps, target.width, target.height, target.fps
        )));
    }

    info!(
        clip = %clip.display(),
        duration = out.duration,
        "Replacement clip normalized"
    );
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeMedia, FakeOp, FakeTranscoder};
    use tempfile::TempDir;

    fn source_info() -> VideoInfo {
        VideoInfo {
            duration: 120.0,
            width: 1920,
            height: 1080,
            fps: 23.976,
            codec: "h264".into(),
            has_audio: true,
            audio_codec: Some("aac".into()),
        }
    }

    #[tokio::test]
    async fn test_normalize_conforms_and_pads_silence() {
        let dir = TempDir::new().unwrap();
        let clip = dir.path().join("replacement_0.mp4");
        FakeMedia::new(6.0, 1280, 720, 30.0).silent().write(&clip).await.unwrap();

        let fake = FakeTranscoder::new();
        let out = dir.path().join("window_000_normalized.mp4");
        let info = normalize_clip(&fake, &clip, &out, &source_info()).await.unwrap();

        assert_eq!((info.width, info.height), (1920, 1080));
        assert!((info.fps - 23.976).abs() < FPS_EPSILON);
        assert!(info.has_audio);
        assert_eq!(info.duration, 6.0);
    }

    #[tokio::test]
    async fn test_normalize_failure_is_normalization_failed() {
        let dir = TempDir::new().unwrap();
        let clip = dir.path().join("clip.mp4");
        FakeMedia::new(6.0, 1280, 720, 30.0).write(&clip).await.unwrap();

        let fake = FakeTranscoder::new().fail_on(FakeOp::Normalize);
        let out = dir.path().join("out.mp4");
        let err = normalize_clip(&fake, &clip, &out, &source_info())
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::NormalizationFailed { .. }));
    }

    #[tokio::test]
    async fn test_unreadable_clip_is_normalization_failed() {
        let dir = TempDir::new().unwrap();
        let clip = dir.path().join("garbage.mp4");
        tokio::fs::write(&clip, b"not media").await.unwrap();

        let fake = FakeTranscoder::new();
        let err = normalize_clip(&fake, &clip, &dir.path().join("o.mp4"), &source_info())
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::NormalizationFailed { .. }));
    }

    #[test]
    fn test_audio_target() {
        let mut source = source_info();
        let mut clip = source_info();
        clip.has_audio = false;
        assert_eq!(audio_target(&source, &clip), AudioTarget::Silent);
        source.has_audio = false;
        assert_eq!(audio_target(&source, &clip), AudioTarget::Drop);
        clip.has_audio = true;
        source.has_audio = true;
        assert_eq!(audio_target(&source, &clip), AudioTarget::Keep);
    }
}
