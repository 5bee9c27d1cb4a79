//! Cutting original footage and boundary frames out of the source.

use std::path::Path;

use tracing::{debug, warn};

use crate::error::{MediaError, MediaResult};
use crate::transcoder::{ExtractMode, Transcoder};

/// Shortest range worth extracting; anything smaller is a rounding artifact.
pub const MIN_SEGMENT_SECS: f64 = 0.01;

/// Extract `[start, end)` of the source as a standalone segment.
///
/// Cuts are arbitrary and must be frame-accurate, so the segment is
/// re-encoded. If that fails a stream copy is attempted, trading accuracy for
/// a usable file. Returns the mode that succeeded.
pub async fn extract_original(
    transcoder: &dyn Transcoder,
    source: &Path,
    start: f64,
    end: f64,
    output: &Path,
) -> MediaResult<ExtractMode> {
    if end - start < MIN_SEGMENT_SECS {
        return Err(MediaError::ExtractionFailed {
            start,
            end,
            message: "empty range".to_string(),
        });
    }

    debug!(start, end, output = %output.display(), "Extracting original footage");
    match transcoder
        .extract(source, start, end, output, ExtractMode::Reencode)
        .await
    {
        Ok(()) => Ok(ExtractMode::Reencode),
        Err(first) => {
            warn!(start, end, error = %first, "Re-encoded extraction failed, trying stream copy");
            transcoder
                .extract(source, start, end, output, ExtractMode::FastCopy)
                .await
                .map(|()| ExtractMode::FastCopy)
                .map_err(|second| MediaError::ExtractionFailed {
                    start,
                    end,
                    message: format!("re-encode: {first}; stream copy: {second}"),
                })
        }
    }
}

/// Extract the frames at exactly `start` and `end` of a window.
///
/// The closing frame is pulled back inside the source when `end` coincides
/// with its last timestamp.
pub async fn extract_boundary_frames(
    transcoder: &dyn Transcoder,
    source: &Path,
    start: f64,
    end: f64,
    source_duration: f64,
    fps: f64,
    (first_out, last_out): (&Path, &Path),
) -> MediaResult<()> {
    let frame = if fps > 0.0 { 1.0 / fps } else { 0.04 };
    let last_at = end.min((source_duration - frame).max(start));

    transcoder.extract_frame(source, start, first_out).await?;
    transcoder.extract_frame(source, last_at, last_out).await?;
    Ok(())
}
