//! FFmpeg CLI wrapper for timeline reconstruction.
//!
//! This crate provides:
//! - Command building and execution with timeout and stderr capture
//! - Media probing with a degraded fallback when FFprobe is missing
//! - The [`Transcoder`] seam and its FFmpeg implementation
//! - Format normalization, duration reconciliation and audio re-sync
//! - Original-footage extraction and concatenation with fallback

pub mod audio;
pub mod command;
pub mod concat;
pub mod error;
pub mod extract;
pub mod fs_utils;
pub mod normalize;
pub mod probe;
pub mod progress;
pub mod reconcile;
pub mod transcoder;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use audio::{overlay_original_audio, AudioSync};
pub use command::{check_ffmpeg, check_ffprobe, FfmpegCommand, FfmpegRunner};
pub use concat::{concatenate, write_concat_list};
pub use error::{MediaError, MediaResult};
pub use extract::{extract_boundary_frames, extract_original};
pub use normalize::normalize_clip;
pub use probe::{probe_video, VideoInfo};
pub use progress::FfmpegProgress;
pub use reconcile::{reconcile_duration, ReconcileDecision, Reconciled};
pub use transcoder::{
    AudioTarget, ConcatMode, ExtractMode, FfmpegTranscoder, NormalizeTarget, Transcoder,
};
