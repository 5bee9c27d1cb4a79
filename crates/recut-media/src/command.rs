//! FFmpeg command builder and runner.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use recut_models::timestamp::ffmpeg_seconds;
use recut_models::EncodingConfig;

use crate::error::{MediaError, MediaResult};
use crate::progress::{parse_progress_line, FfmpegProgress, ProgressLine};

/// Number of diagnostic stderr lines kept for error reports.
const STDERR_TAIL_LINES: usize = 40;

/// One `-i` input with the arguments that precede it.
#[derive(Debug, Clone)]
struct FfmpegInput {
    args: Vec<String>,
    source: String,
}

/// Builder for FFmpeg commands.
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    inputs: Vec<FfmpegInput>,
    output: PathBuf,
    output_args: Vec<String>,
    overwrite: bool,
    log_level: String,
    /// Operation name used in logs and metrics
    operation: &'static str,
}

impl FfmpegCommand {
    /// Create a new FFmpeg command with a single input.
    pub fn new(input: impl AsRef<Path>, output: impl AsRef<Path>) -> Self {
        Self {
            inputs: vec![FfmpegInput {
                args: Vec::new(),
                source: input.as_ref().to_string_lossy().to_string(),
            }],
            output: output.as_ref().to_path_buf(),
            output_args: Vec::new(),
            overwrite: true,
            log_level: "error".to_string(),
            operation: "ffmpeg",
        }
    }

    /// Add another input file. Input arguments added afterwards apply to it.
    pub fn input(mut self, input: impl AsRef<Path>) -> Self {
        self.inputs.push(FfmpegInput {
            args: Vec::new(),
            source: input.as_ref().to_string_lossy().to_string(),
        });
        self
    }

    /// Add a libavfilter virtual input, e.g. `anullsrc=...`.
    pub fn lavfi_input(mut self, spec: impl Into<String>) -> Self {
        self.inputs.push(FfmpegInput {
            args: vec!["-f".to_string(), "lavfi".to_string()],
            source: spec.into(),
        });
        self
    }

    /// Add an argument before the most recently added input.
    pub fn input_arg(mut self, arg: impl Into<String>) -> Self {
        if let Some(input) = self.inputs.last_mut() {
            input.args.push(arg.into());
        }
        self
    }

    /// Add output arguments (after every -i).
    pub fn output_arg(mut self, arg: impl Into<String>) -> Self {
        self.output_args.push(arg.into());
        self
    }

    /// Add multiple output arguments.
    pub fn output_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Input seek on the most recent input.
    pub fn seek(self, seconds: f64) -> Self {
        self.input_arg("-ss").input_arg(ffmpeg_seconds(seconds))
    }

    /// Read at most this many seconds of the most recent input.
    pub fn duration(self, seconds: f64) -> Self {
        self.input_arg("-t").input_arg(ffmpeg_seconds(seconds))
    }

    /// Cap output duration.
    pub fn output_duration(self, seconds: f64) -> Self {
        self.output_arg("-t").output_arg(ffmpeg_seconds(seconds))
    }

    /// Read the most recent input as a concat demuxer list.
    pub fn concat_list(self) -> Self {
        self.input_arg("-f")
            .input_arg("concat")
            .input_arg("-safe")
            .input_arg("0")
    }

    /// Set video filter.
    pub fn video_filter(self, filter: impl Into<String>) -> Self {
        self.output_arg("-vf").output_arg(filter)
    }

    /// Set audio filter.
    pub fn audio_filter(self, filter: impl Into<String>) -> Self {
        self.output_arg("-af").output_arg(filter)
    }

    /// Select a stream for the output.
    pub fn map(self, spec: impl Into<String>) -> Self {
        self.output_arg("-map").output_arg(spec)
    }

    /// Copy every selected stream without re-encoding.
    pub fn codec_copy(self) -> Self {
        self.output_arg("-c").output_arg("copy")
    }

    /// Re-encode with the shared encoding parameters.
    pub fn encode_with(self, encoding: &EncodingConfig) -> Self {
        self.output_args(encoding.to_ffmpeg_args())
    }

    /// Re-encode video only, with no audio stream.
    pub fn encode_video_only(self, encoding: &EncodingConfig) -> Self {
        self.output_args(encoding.video_args()).output_arg("-an")
    }

    /// Stop when the shortest input ends.
    pub fn shortest(self) -> Self {
        self.output_arg("-shortest")
    }

    /// Extract single frame.
    pub fn single_frame(self) -> Self {
        self.output_arg("-frames:v").output_arg("1")
    }

    /// Name the operation for logs and metrics.
    pub fn operation(mut self, operation: &'static str) -> Self {
        self.operation = operation;
        self
    }

    pub fn output_path(&self) -> &Path {
        &self.output
    }

    /// Build the command arguments.
    pub fn build_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        if self.overwrite {
            args.push("-y".to_string());
        }

        args.push("-nostdin".to_string());
        args.push("-v".to_string());
        args.push(self.log_level.clone());

        // Progress output to stderr
        args.push("-progress".to_string());
        args.push("pipe:2".to_string());

        for input in &self.inputs {
            args.extend(input.args.iter().cloned());
            args.push("-i".to_string());
            args.push(input.source.clone());
        }

        args.extend(self.output_args.iter().cloned());
        args.push(self.output.to_string_lossy().to_string());

        args
    }
}

/// Frame rate as FFmpeg expects it, without trailing zeros.
pub fn format_fps(fps: f64) -> String {
    let s = format!("{:.3}", fps);
    s.trim_end_matches('0').trim_end_matches('.').to_string()
}

/// Runner for FFmpeg commands with a timeout and stderr capture.
///
/// A started command always runs to completion or timeout; there is no
/// mid-flight cancellation.
#[derive(Debug, Clone, Default)]
pub struct FfmpegRunner {
    timeout_secs: Option<u64>,
}

impl FfmpegRunner {
    pub fn new() -> Self {
        Self { timeout_secs: None }
    }

    /// Set timeout.
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    /// Run an FFmpeg command.
    pub async fn run(&self, cmd: &FfmpegCommand) -> MediaResult<()> {
        self.run_with_progress(cmd, |_| {}).await
    }

    /// Run an FFmpeg command with progress callback.
    pub async fn run_with_progress<F>(&self, cmd: &FfmpegCommand, progress_callback: F) -> MediaResult<()>
    where
        F: Fn(FfmpegProgress) + Send + 'static,
    {
        check_ffmpeg()?;

        let args = cmd.build_args();
        debug!(operation = cmd.operation, "Running FFmpeg: ffmpeg {}", args.join(" "));

        let started = Instant::now();
        let mut child = Command::new("ffmpeg")
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| MediaError::internal("FFmpeg stderr was not captured"))?;
        let mut reader = BufReader::new(stderr).lines();

        // Progress lines feed the callback; everything else is kept as diagnostics.
        let stderr_handle = tokio::spawn(async move {
            let mut current = FfmpegProgress::default();
            let mut tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL_LINES);

            while let Ok(Some(line)) = reader.next_line().await {
                match parse_progress_line(&line, &mut current) {
                    Some(ProgressLine::Snapshot(progress)) => progress_callback(progress),
                    Some(ProgressLine::Field) => {}
                    None => {
                        if tail.len() == STDERR_TAIL_LINES {
                            tail.pop_front();
                        }
                        tail.push_back(line);
                    }
                }
            }
            tail
        });

        let result = self.wait_for_completion(&mut child).await;
        let tail = stderr_handle.await.unwrap_or_default();

        let elapsed = started.elapsed().as_secs_f64();
        metrics::histogram!("recut_ffmpeg_duration_seconds", "operation" => cmd.operation)
            .record(elapsed);

        match result {
            Ok(Some(code)) if code != 0 => {
                metrics::counter!("recut_ffmpeg_failures_total", "operation" => cmd.operation)
                    .increment(1);
                let stderr = Vec::from(tail).join("\n");
                Err(MediaError::ffmpeg_failed(
                    format!("{} exited with status {}", cmd.operation, code),
                    (!stderr.is_empty()).then_some(stderr),
                    Some(code),
                ))
            }
            Ok(None) => {
                metrics::counter!("recut_ffmpeg_failures_total", "operation" => cmd.operation)
                    .increment(1);
                Err(MediaError::ffmpeg_failed(
                    format!("{} terminated by signal", cmd.operation),
                    None,
                    None,
                ))
            }
            Ok(Some(_)) => {
                debug!(operation = cmd.operation, elapsed_secs = elapsed, "FFmpeg finished");
                Ok(())
            }
            Err(e) => {
                metrics::counter!("recut_ffmpeg_failures_total", "operation" => cmd.operation)
                    .increment(1);
                Err(e)
            }
        }
    }

    /// Wait for the child, killing it on timeout. Returns the exit code.
    async fn wait_for_completion(&self, child: &mut Child) -> MediaResult<Option<i32>> {
        let status = match self.timeout_secs {
            Some(timeout_secs) => {
                match tokio::time::timeout(Duration::from_secs(timeout_secs), child.wait()).await {
                    Ok(status) => status?,
                    Err(_) => {
                        warn!("FFmpeg timed out after {} seconds, killing process", timeout_secs);
                        let _ = child.kill().await;
                        return Err(MediaError::Timeout(timeout_secs));
                    }
                }
            }
            None => child.wait().await?,
        };
        Ok(status.code())
    }
}

/// Check if FFmpeg is available.
pub fn check_ffmpeg() -> MediaResult<PathBuf> {
    which::which("ffmpeg").map_err(|_| MediaError::FfmpegNotFound)
}

/// Check if FFprobe is available.
pub fn check_ffprobe() -> MediaResult<PathBuf> {
    which::which("ffprobe").map_err(|_| MediaError::FfprobeNotFound)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_builder() {
        let cmd = FfmpegCommand::new("input.mp4", "output.mp4")
            .seek(10.0)
            .duration(30.0)
            .encode_with(&EncodingConfig::default());

        let args = cmd.build_args();
        let ss = args.iter().position(|a| a == "-ss").unwrap();
        let input = args.iter().position(|a| a == "input.mp4").unwrap();
        assert!(ss < input);
        assert!(args.contains(&"10.000".to_string()));
        assert!(args.contains(&"libx264".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("output.mp4"));
    }

    #[test]
    fn test_input_args_attach_to_latest_input() {
        let args = FfmpegCommand::new("clip.mp4", "out.mp4")
            .input("source.mp4")
            .seek(42.5)
            .duration(6.0)
            .map("0:v:0")
            .map("1:a:0")
            .build_args();

        let clip = args.iter().position(|a| a == "clip.mp4").unwrap();
        let ss = args.iter().position(|a| a == "-ss").unwrap();
        let source = args.iter().position(|a| a == "source.mp4").unwrap();
        assert!(clip < ss && ss < source);
        assert_eq!(args[ss + 1], "42.500");
    }

    #[test]
    fn test_concat_and_lavfi_inputs() {
        let args = FfmpegCommand::new("list.txt", "out.mp4")
            .concat_list()
            .codec_copy()
            .build_args();
        let joined = args.join(" ");
        assert!(joined.contains("-f concat -safe 0 -i list.txt"));
        assert!(joined.contains("-c copy"));

        let args = FfmpegCommand::new("v.mp4", "out.mp4")
            .lavfi_input("anullsrc=channel_layout=stereo:sample_rate=48000")
            .build_args();
        assert!(args
            .join(" ")
            .contains("-f lavfi -i anullsrc=channel_layout=stereo:sample_rate=48000"));
    }

    #[test]
    fn test_format_fps() {
        assert_eq!(format_fps(24.0), "24");
        assert_eq!(format_fps(29.97), "29.97");
        assert_eq!(format_fps(23.976), "23.976");
    }
}
