//! Media introspection via FFprobe, with a degraded `ffmpeg -i` fallback.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, warn};

use recut_models::SourceInfo;

use crate::command::{check_ffmpeg, check_ffprobe};
use crate::error::{MediaError, MediaResult};

/// Video file information.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoInfo {
    /// Duration in seconds
    pub duration: f64,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Frame rate (fps)
    pub fps: f64,
    /// Video codec
    pub codec: String,
    pub has_audio: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_codec: Option<String>,
}

impl VideoInfo {
    pub fn to_source_info(&self, path: &Path) -> SourceInfo {
        SourceInfo {
            path: path.to_path_buf(),
            duration: self.duration,
            width: self.width,
            height: self.height,
            fps: self.fps,
            has_audio: self.has_audio,
        }
    }
}

/// FFprobe JSON output format.
#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: FfprobeFormat,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: String,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
    duration: Option<String>,
}

/// Probe a media file, falling back to parsing `ffmpeg -i` diagnostics when
/// FFprobe is unavailable or fails.
pub async fn probe_video(path: impl AsRef<Path>) -> MediaResult<VideoInfo> {
    let path = path.as_ref();

    if !path.exists() {
        return Err(MediaError::FileNotFound(path.to_path_buf()));
    }

    match probe_with_ffprobe(path).await {
        Ok(info) => Ok(info),
        Err(e @ MediaError::InvalidVideo(_)) => Err(e),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "FFprobe unavailable, using ffmpeg fallback");
            probe_with_ffmpeg(path).await
        }
    }
}

async fn probe_with_ffprobe(path: &Path) -> MediaResult<VideoInfo> {
    check_ffprobe()?;

    let output = Command::new("ffprobe")
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ])
        .arg(path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await?;

    if !output.status.success() {
        return Err(MediaError::FfprobeFailed {
            message: "FFprobe failed".to_string(),
            stderr: Some(String::from_utf8_lossy(&output.stderr).to_string()),
        });
    }

    parse_ffprobe_json(&output.stdout)
}

fn parse_ffprobe_json(bytes: &[u8]) -> MediaResult<VideoInfo> {
    let probe: FfprobeOutput = serde_json::from_slice(bytes)?;

    let video_stream = probe
        .streams
        .iter()
        .find(|s| s.codec_type == "video")
        .ok_or_else(|| MediaError::InvalidVideo("No video stream found".to_string()))?;
    let audio_stream = probe.streams.iter().find(|s| s.codec_type == "audio");

    // Container duration first; some muxers only report it per stream.
    let duration = probe
        .format
        .duration
        .as_deref()
        .or(video_stream.duration.as_deref())
        .and_then(|d| d.parse::<f64>().ok())
        .unwrap_or(0.0);

    let fps = video_stream
        .avg_frame_rate
        .as_deref()
        .and_then(parse_frame_rate)
        .or_else(|| video_stream.r_frame_rate.as_deref().and_then(parse_frame_rate))
        .unwrap_or(30.0);

    Ok(VideoInfo {
        duration,
        width: video_stream.width.unwrap_or(0),
        height: video_stream.height.unwrap_or(0),
        fps,
        codec: video_stream.codec_name.clone().unwrap_or_default(),
        has_audio: audio_stream.is_some(),
        audio_codec: audio_stream.and_then(|s| s.codec_name.clone()),
    })
}

async fn probe_with_ffmpeg(path: &Path) -> MediaResult<VideoInfo> {
    check_ffmpeg()?;

    // `ffmpeg -i` with no output exits non-zero but still prints stream info.
    let output = Command::new("ffmpeg")
        .arg("-hide_banner")
        .arg("-i")
        .arg(path)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .await?;

    let stderr = String::from_utf8_lossy(&output.stderr);
    debug!(path = %path.display(), "Parsing ffmpeg -i diagnostics");
    parse_ffmpeg_banner(&stderr).ok_or_else(|| MediaError::FfprobeFailed {
        message: "could not read media info from ffmpeg output".to_string(),
        stderr: Some(stderr.to_string()),
    })
}

/// Parse the stream summary FFmpeg prints for `-i`.
fn parse_ffmpeg_banner(text: &str) -> Option<VideoInfo> {
    let duration = text
        .lines()
        .find_map(|l| l.trim().strip_prefix("Duration:"))
        .and_then(|rest| rest.split(',').next())
        .and_then(|ts| recut_models::parse_timestamp(ts.trim()).ok())?;

    let video_line = text
        .lines()
        .find(|l| l.contains("Stream #") && l.contains("Video:"))?;

    let codec = video_line
        .split("Video:")
        .nth(1)
        .and_then(|rest| rest.split_whitespace().next())
        .map(|c| c.trim_end_matches(',').to_string())
        .unwrap_or_default();

    let (width, height) = video_line
        .split(|c: char| c == ',' || c.is_whitespace())
        .find_map(parse_dimensions)
        .unwrap_or((0, 0));

    let fps = video_line
        .split(',')
        .find_map(|part| {
            let part = part.trim();
            part.strip_suffix(" fps")
                .or_else(|| part.strip_suffix(" tbr"))
                .and_then(|v| v.trim().parse::<f64>().ok())
        })
        .unwrap_or(30.0);

    let audio_line = text
        .lines()
        .find(|l| l.contains("Stream #") && l.contains("Audio:"));
    let audio_codec = audio_line.and_then(|l| {
        l.split("Audio:")
            .nth(1)
            .and_then(|rest| rest.split_whitespace().next())
            .map(|c| c.trim_end_matches(',').to_string())
    });

    Some(VideoInfo {
        duration,
        width,
        height,
        fps,
        codec,
        has_audio: audio_line.is_some(),
        audio_codec,
    })
}

fn parse_dimensions(token: &str) -> Option<(u32, u32)> {
    let (w, h) = token.trim().split_once('x')?;
    let w: u32 = w.parse().ok()?;
    let h: u32 = h.parse().ok()?;
    (w > 0 && h > 0).then_some((w, h))
}

/// Parse frame rate string (e.g., "30/1" or "29.97").
fn parse_frame_rate(s: &str) -> Option<f64> {
    if let Some((num, den)) = s.split_once('/') {
        let num: f64 = num.parse().ok()?;
        let den: f64 = den.parse().ok()?;
        if den > 0.0 && num > 0.0 {
            return Some(num / den);
        }
        return None;
    }
    s.parse().ok().filter(|fps: &f64| *fps > 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_frame_rate() {
        assert!((parse_frame_rate("30/1").unwrap() - 30.0).abs() < 0.01);
        assert!((parse_frame_rate("30000/1001").unwrap() - 29.97).abs() < 0.01);
        assert!((parse_frame_rate("29.97").unwrap() - 29.97).abs() < 0.01);
        assert!(parse_frame_rate("0/0").is_none());
    }

    #[test]
    fn test_parse_ffprobe_json() {
        let json = br#"{
            "streams": [
                {"codec_type": "video", "codec_name": "h264", "width": 1280, "height": 720,
                 "avg_frame_rate": "0/0", "r_frame_rate": "24/1"},
                {"codec_type": "audio", "codec_name": "aac"}
            ],
            "format": {"duration": "61.500000"}
        }"#;
        let info = parse_ffprobe_json(json).unwrap();
        assert_eq!(info.duration, 61.5);
        assert_eq!((info.width, info.height), (1280, 720));
        assert_eq!(info.fps, 24.0);
        assert!(info.has_audio);
        assert_eq!(info.audio_codec.as_deref(), Some("aac"));
    }

    #[test]
    fn test_parse_ffprobe_json_without_video() {
        let json = br#"{"streams": [{"codec_type": "audio"}], "format": {}}"#;
        assert!(matches!(
            parse_ffprobe_json(json),
            Err(MediaError::InvalidVideo(_))
        ));
    }

    #[test]
    fn test_parse_ffmpeg_banner() {
        let banner = "\
Input #0, mov,mp4,m4a,3gp,3g2,mj2, from 'movie.mp4':
  Duration: 00:01:30.25, start: 0.000000, bitrate: 1205 kb/s
  Stream #0:0[0x1](und): Video: h264 (High) (avc1 / 0x31637661), yuv420p(progressive), 1920x1080 [SAR 1:1 DAR 16:9], 1002 kb/s, 23.98 fps, 23.98 tbr, 24k tbn (default)
  Stream #0:1[0x2](und): Audio: aac (LC) (mp4a / 0x6134706D), 48000 Hz, stereo, fltp, 192 kb/s (default)
At least one output file must be specified";
        let info = parse_ffmpeg_banner(banner).unwrap();
        assert!((info.duration - 90.25).abs() < 1e-6);
        assert_eq!((info.width, info.height), (1920, 1080));
        assert!((info.fps - 23.98).abs() < 1e-6);
        assert_eq!(info.codec, "h264");
        assert!(info.has_audio);
        assert_eq!(info.audio_codec.as_deref(), Some("aac"));
    }

    #[test]
    fn test_parse_ffmpeg_banner_silent_clip() {
        let banner = "\
  Duration: 00:00:04.20, start: 0.000000, bitrate: 900 kb/s
  Stream #0:0: Video: vp9 (Profile 0), yuv420p(tv), 1280x720, 30 fps, 30 tbr, 1k tbn";
        let info = parse_ffmpeg_banner(banner).unwrap();
        assert!((info.duration - 4.2).abs() < 1e-6);
        assert!(!info.has_audio);
        assert_eq!(info.fps, 30.0);
    }

    #[test]
    fn test_parse_ffmpeg_banner_requires_duration() {
        assert!(parse_ffmpeg_banner("movie.mp4: No such file or directory").is_none());
    }

    #[test]
    fn test_probe_missing_file() {
        let result = tokio_test::block_on(probe_video("/definitely/not/here.mp4"));
        assert!(matches!(result, Err(MediaError::FileNotFound(_))));
    }
}
