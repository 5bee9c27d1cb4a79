//! Concatenation of ordered segments with a re-encode fallback.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use recut_models::ConcatStrategy;

use crate::error::{MediaError, MediaResult};
use crate::fs_utils::{copy_file, write_atomic};
use crate::transcoder::{ConcatMode, Transcoder};

/// Quote a path for the concat demuxer (`'` becomes `'\''`).
pub fn escape_concat_path(path: &Path) -> String {
    format!("'{}'", path.to_string_lossy().replace('\'', "'\\''"))
}

/// Render a concat demuxer list for `segments`, in order.
pub fn render_concat_list(segments: &[PathBuf]) -> String {
    let mut out = String::from("ffconcat version 1.0\n");
    for segment in segments {
        out.push_str("file ");
        out.push_str(&escape_concat_path(segment));
        out.push('\n');
    }
    out
}

/// Write the concat list with absolute paths, so the list can live anywhere.
pub async fn write_concat_list(segments: &[PathBuf], list_file: &Path) -> MediaResult<()> {
    let mut absolute = Vec::with_capacity(segments.len());
    for segment in segments {
        absolute.push(
            tokio::fs::canonicalize(segment)
                .await
                .map_err(|_| MediaError::FileNotFound(segment.clone()))?,
        );
    }
    write_atomic(list_file, render_concat_list(&absolute).into_bytes()).await
}

/// Join `segments` into `output`.
///
/// Tries a stream copy first. When that fails, `on_fallback` is called with
/// the error and the same ordered list is re-encoded. A single segment is
/// copied straight to the output. The list file is left in place either way.
pub async fn concatenate<F>(
    transcoder: &dyn Transcoder,
    segments: &[PathBuf],
    list_file: &Path,
    output: &Path,
    on_fallback: F,
) -> MediaResult<ConcatStrategy>
where
    F: FnOnce(&MediaError) + Send,
{
    match segments {
        [] => return Err(MediaError::concat_failed("none", "no segments to join")),
        [only] => {
            copy_file(only, output)
                .await
                .map_err(|e| MediaError::concat_failed("single_segment", e.to_string()))?;
            info!(output = %output.display(), "Single segment copied to output");
            return Ok(ConcatStrategy::SingleSegment);
        }
        _ => {}
    }

    write_concat_list(segments, list_file).await?;

    let copy_err = match transcoder
        .concat(list_file, output, ConcatMode::StreamCopy)
        .await
    {
        Ok(()) => {
            info!(
                segments = segments.len(),
                strategy = ConcatMode::StreamCopy.as_str(),
                "Segments concatenated"
            );
            metrics::counter!("recut_concat_total", "strategy" => "stream_copy").increment(1);
            return Ok(ConcatStrategy::StreamCopy);
        }
        Err(e) => e,
    };

    warn!(
        error = %copy_err,
        stderr = copy_err.stderr().unwrap_or(""),
        "Stream copy concatenation failed, re-encoding"
    );
    on_fallback(&copy_err);

    match transcoder
        .concat(list_file, output, ConcatMode::Reencode)
        .await
    {
        Ok(()) => {
            info!(
                segments = segments.len(),
                strategy = ConcatMode::Reencode.as_str(),
                "Segments concatenated"
            );
            metrics::counter!("recut_concat_total", "strategy" => "reencode").increment(1);
            Ok(ConcatStrategy::Reencode)
        }
        Err(e) => {
            metrics::counter!("recut_concat_total", "strategy" => "failed").increment(1);
            let _ = tokio::fs::remove_file(output).await;
            Err(MediaError::concat_failed(
                "reencode",
                format!("stream copy: {copy_err}; re-encode: {e}"),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{parse_concat_list, FakeMedia, FakeOp, FakeTranscoder};
    use std::sync::atomic::{AtomicBool, Ordering};
    use tempfile::TempDir;

    #[test]
    fn test_escape_concat_path() {
        assert_eq!(escape_concat_path(Path::new("/w/a.mp4")), "'/w/a.mp4'");
        assert_eq!(
            escape_concat_path(Path::new("/w/it's.mp4")),
            "'/w/it'\\''s.mp4'"
        );
    }

    #[test]
    fn test_rendered_list_parses_back() {
        let paths = vec![PathBuf::from("/w/a.mp4"), PathBuf::from("/w/o'k.mp4")];
        assert_eq!(parse_concat_list(&render_concat_list(&paths)), paths);
    }

    async fn segments(dir: &TempDir, specs: &[FakeMedia]) -> Vec<PathBuf> {
        let mut out = Vec::new();
        for (i, media) in specs.iter().enumerate() {
            let path = dir.path().join(format!("segment_{i:03}.mp4"));
            media.write(&path).await.unwrap();
            out.push(path);
        }
        out
    }

    #[tokio::test]
    async fn test_stream_copy_when_compatible() {
        let dir = TempDir::new().unwrap();
        let media = FakeMedia::new(10.0, 1920, 1080, 24.0);
        let segs = segments(&dir, &[media.clone(), media.clone(), media]).await;
        let fake = FakeTranscoder::new();
        let out = dir.path().join("out.mp4");

        let strategy = concatenate(&fake, &segs, &dir.path().join("list.txt"), &out, |_| {})
            .await
            .unwrap();

        assert_eq!(strategy, ConcatStrategy::StreamCopy);
        assert_eq!(FakeMedia::read(&out).await.unwrap().duration, 30.0);
        assert_eq!(fake.call_count(FakeOp::ConcatReencode), 0);
    }

    #[tokio::test]
    async fn test_mismatch_falls_back_to_reencode() {
        let dir = TempDir::new().unwrap();
        let segs = segments(
            &dir,
            &[
                FakeMedia::new(10.0, 1920, 1080, 24.0),
                FakeMedia::new(4.0, 1920, 1080, 30.0),
                FakeMedia::new(10.0, 1920, 1080, 24.0),
            ],
        )
        .await;
        let fake = FakeTranscoder::new();
        let out = dir.path().join("out.mp4");
        let fell_back = AtomicBool::new(false);

        let strategy = concatenate(&fake, &segs, &dir.path().join("list.txt"), &out, |_| {
            fell_back.store(true, Ordering::SeqCst)
        })
        .await
        .unwrap();

        assert_eq!(strategy, ConcatStrategy::Reencode);
        assert!(fell_back.load(Ordering::SeqCst));
        assert_eq!(FakeMedia::read(&out).await.unwrap().duration, 24.0);
    }

    #[tokio::test]
    async fn test_both_strategies_failing_keeps_list() {
        let dir = TempDir::new().unwrap();
        let media = FakeMedia::new(10.0, 1920, 1080, 24.0);
        let segs = segments(&dir, &[media.clone(), media]).await;
        let fake = FakeTranscoder::new()
            .fail_on(FakeOp::ConcatCopy)
            .fail_on(FakeOp::ConcatReencode);
        let list = dir.path().join("list.txt");

        let err = concatenate(&fake, &segs, &list, &dir.path().join("out.mp4"), |_| {})
            .await
            .unwrap_err();

        assert!(matches!(err, MediaError::ConcatenationFailed { .. }));
        assert!(list.exists());
        assert!(segs.iter().all(|s| s.exists()));
    }

    #[tokio::test]
    async fn test_single_segment_is_copied() {
        let dir = TempDir::new().unwrap();
        let segs = segments(&dir, &[FakeMedia::new(12.0, 1280, 720, 25.0)]).await;
        let fake = FakeTranscoder::new();
        let out = dir.path().join("out.mp4");

        let strategy = concatenate(&fake, &segs, &dir.path().join("list.txt"), &out, |_| {})
            .await
            .unwrap();

        assert_eq!(strategy, ConcatStrategy::SingleSegment);
        assert!(fake.calls().is_empty());
        assert_eq!(FakeMedia::read(&out).await.unwrap().duration, 12.0);
    }
}
