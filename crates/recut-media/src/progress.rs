//! FFmpeg progress parsing.

use serde::{Deserialize, Serialize};

/// Progress information from FFmpeg's `-progress` stream.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FfmpegProgress {
    /// Current frame number
    pub frame: u64,
    /// Output time in milliseconds
    pub out_time_ms: i64,
    /// Encoding speed (e.g., 1.5 = 1.5x realtime)
    pub speed: f64,
    /// Whether encoding is complete
    pub is_complete: bool,
}

impl FfmpegProgress {
    /// Progress percentage given the expected output duration in seconds.
    pub fn percentage(&self, expected_secs: f64) -> f64 {
        if expected_secs <= 0.0 {
            return 0.0;
        }
        ((self.out_time_ms as f64 / 1000.0 / expected_secs) * 100.0).clamp(0.0, 100.0)
    }
}

/// Fold one `key=value` line into `current`.
///
/// Returns a snapshot at every `progress=` line, which closes a block.
/// Returns `None` for lines that are not part of the progress protocol.
pub(crate) fn parse_progress_line(
    line: &str,
    current: &mut FfmpegProgress,
) -> Option<ProgressLine> {
    let (key, value) = line.trim().split_once('=')?;
    match key {
        "out_time_us" => {
            // Despite the name, out_time_ms is also in microseconds.
            current.out_time_ms = value.parse::<i64>().ok()? / 1000;
        }
        "out_time_ms" => {
            current.out_time_ms = value.parse::<i64>().ok()? / 1000;
        }
        "frame" => current.frame = value.parse().ok()?,
        "speed" => {
            if let Some(speed) = value.strip_suffix('x').and_then(|s| s.trim().parse().ok()) {
                current.speed = speed;
            }
        }
        "progress" => {
            current.is_complete = value == "end";
            return Some(ProgressLine::Snapshot(current.clone()));
        }
        "fps" | "bitrate" | "total_size" | "out_time" | "dup_frames" | "drop_frames"
        | "stream_0_0_q" => {}
        _ if key.starts_with("stream_") => {}
        _ => return None,
    }
    Some(ProgressLine::Field)
}

/// Classification of a stderr line.
#[derive(Debug, Clone)]
pub(crate) enum ProgressLine {
    /// A progress field that does not close a block
    Field,
    /// End of a progress block
    Snapshot(FfmpegProgress),
}
