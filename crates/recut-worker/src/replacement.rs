//! Per-window replacement chain.
//!
//! boundary frames → synthesis (with retry) → format normalization →
//! duration reconciliation → original audio overlay.
//!
//! The chain never returns an error. A step with no safe fallback yields a
//! failed [`ReplacementResult`], which leaves the window's original footage
//! in place; recoverable problems are recorded as degradations.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use recut_media::{
    extract_boundary_frames, normalize_clip, overlay_original_audio, reconcile_duration,
    Transcoder, VideoInfo,
};
use recut_models::{
    Degradation, MergedWindow, ReconstructionConfig, ReplacementResult, ReplacementTask,
};

use crate::collaborators::{SynthesisRequest, SynthesizedClip, Synthesizer};
use crate::metrics;
use crate::prompt::DescriptionHints;
use crate::retry::{retry_async, RetryConfig};

/// Intermediate file names for one window. Every name carries the window
/// index, so windows processed concurrently never share a file.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowFiles {
    pub first_frame: PathBuf,
    pub last_frame: PathBuf,
    pub synthesized: PathBuf,
    pub normalized: PathBuf,
    pub reconciled: PathBuf,
    pub with_audio: PathBuf,
}

impl WindowFiles {
    pub fn new(work_dir: &Path, index: usize) -> Self {
        let name = |suffix: &str| work_dir.join(format!("window_{index:03}_{suffix}"));
        Self {
            first_frame: name("first.jpg"),
            last_frame: name("last.jpg"),
            synthesized: name("synthesized.mp4"),
            normalized: name("normalized.mp4"),
            reconciled: name("reconciled.mp4"),
            with_audio: name("final.mp4"),
        }
    }
}

/// Shared, read-only inputs for every window of a job.
pub struct ReplacementContext<'a> {
    pub transcoder: &'a dyn Transcoder,
    pub synthesizer: &'a dyn Synthesizer,
    pub source: &'a Path,
    pub source_info: &'a VideoInfo,
    pub work_dir: &'a Path,
    pub config: &'a ReconstructionConfig,
    pub retry: &'a RetryConfig,
}

/// Run the whole chain for one task.
///
/// `prior_clip` is a synthesized clip recorded by an earlier run; when given,
/// frame extraction and synthesis are skipped.
pub async fn process_window(
    ctx: &ReplacementContext<'_>,
    task: &ReplacementTask,
    window: &MergedWindow,
    prior_clip: Option<&Path>,
) -> ReplacementResult {
    let index = task.window_index;
    let files = WindowFiles::new(ctx.work_dir, index);

    let clip = match prior_clip {
        Some(path) => {
            info!(window_index = index, clip = %path.display(), "Reusing synthesized clip");
            SynthesizedClip {
                path: path.to_path_buf(),
                claimed_duration: None,
            }
        }
        None => match synthesize(ctx, task, window, &files).await {
            Ok(clip) => clip,
            Err(result) => return result,
        },
    };

    conform(ctx, task, &files, clip).await
}

async fn synthesize(
    ctx: &ReplacementContext<'_>,
    task: &ReplacementTask,
    window: &MergedWindow,
    files: &WindowFiles,
) -> Result<SynthesizedClip, ReplacementResult> {
    let index = task.window_index;

    if let Err(e) = extract_boundary_frames(
        ctx.transcoder,
        ctx.source,
        task.window_start,
        task.window_end,
        ctx.source_info.duration,
        ctx.source_info.fps,
        (files.first_frame.as_path(), files.last_frame.as_path()),
    )
    .await
    {
        warn!(window_index = index, error = %e, "Boundary frame extraction failed");
        return Err(ReplacementResult::failed(format!("boundary frames: {e}")));
    }

    let request = SynthesisRequest {
        window_index: index,
        first_frame: files.first_frame.clone(),
        last_frame: files.last_frame.clone(),
        target_duration: task.span(),
        hints: DescriptionHints::for_window(window),
        output: files.synthesized.clone(),
    };

    let outcome = retry_async(
        ctx.retry,
        |e: &crate::error::WorkerError| e.is_retryable(),
        |_| ctx.synthesizer.synthesize(&request),
    )
    .await;
    metrics::record_synthesis_attempts(outcome.attempts(), outcome.is_success());
    outcome.into_result().map_err(|e| {
        warn!(window_index = index, error = %e, "No replacement clip");
        ReplacementResult::failed(format!("synthesis: {e}"))
    })
}

async fn conform(
    ctx: &ReplacementContext<'_>,
    task: &ReplacementTask,
    files: &WindowFiles,
    clip: SynthesizedClip,
) -> ReplacementResult {
    let index = task.window_index;

    let normalized = match normalize_clip(
        ctx.transcoder,
        &clip.path,
        &files.normalized,
        ctx.source_info,
    )
    .await
    {
        Ok(info) => info,
        Err(e) => {
            warn!(window_index = index, error = %e, "Keeping original footage");
            return ReplacementResult::failed(e.to_string());
        }
    };

    if let Some(claimed) = clip.claimed_duration {
        if (claimed - normalized.duration).abs() > ctx.config.reconcile.copy_tolerance_secs {
            info!(
                window_index = index,
                claimed,
                actual = normalized.duration,
                "Clip duration differs from what the service claimed"
            );
        }
    }

    let mut degradations = Vec::new();

    let reconciled = reconcile_duration(
        ctx.transcoder,
        &files.normalized,
        normalized.duration,
        normalized.has_audio,
        task.span(),
        &files.reconciled,
        &ctx.config.reconcile,
    )
    .await;
    degradations.extend(reconciled.degradation.clone());

    let (final_path, final_duration) =
        if ctx.config.keep_original_audio && ctx.source_info.has_audio {
            let sync = overlay_original_audio(
                ctx.transcoder,
                &reconciled.path,
                reconciled.duration,
                ctx.source,
                task.window_start,
                reconciled.duration,
                &files.with_audio,
            )
            .await;
            if let Some(reason) = sync.failure {
                degradations.push(Degradation::AudioSyncFailed(reason));
            }
            (sync.path, sync.duration)
        } else {
            (reconciled.path, reconciled.duration)
        };

    let mut result = ReplacementResult::ready(final_path, final_duration);
    for degradation in degradations {
        result.degrade(degradation);
    }

    info!(
        window_index = index,
        start = task.window_start,
        end = task.window_end,
        actual_duration = final_duration,
        decision = reconciled.decision.as_str(),
        degraded = !result.degradations.is_empty(),
        "Replacement ready"
    );
    result
}
