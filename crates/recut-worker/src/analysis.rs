//! Analysis phase: scene detection and classification into scored segments.

use std::path::Path;
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use recut_models::{ReconstructionConfig, ScoredSegment};

use crate::collaborators::{Classifier, SceneDetector, SceneRange};
use crate::error::{WorkerError, WorkerResult};

/// Fold scenes shorter than `min_length` into their predecessor.
///
/// A short first scene is folded into the one after it instead.
pub fn merge_short_scenes(scenes: &[(f64, f64)], min_length: f64) -> Vec<SceneRange> {
    let mut merged: Vec<(f64, f64)> = Vec::with_capacity(scenes.len());
    for &(start, end) in scenes {
        let only_first = merged.len() == 1;
        match merged.last_mut() {
            Some(prev) if end - start < min_length => prev.1 = prev.1.max(end),
            Some(prev) if prev.1 - prev.0 < min_length && only_first => {
                prev.1 = prev.1.max(end)
            }
            _ => merged.push((start, end)),
        }
    }

    merged
        .into_iter()
        .enumerate()
        .map(|(index, (start, end))| SceneRange { index, start, end })
        .collect()
}

/// Classify every scene with bounded parallelism.
///
/// Results come back ordered by scene index. Only scenes scoring at or above
/// the effective threshold are returned. A scene whose classification fails
/// is logged and treated as clean.
pub async fn classify_scenes(
    classifier: &dyn Classifier,
    source: &Path,
    scenes: &[SceneRange],
    config: &ReconstructionConfig,
) -> WorkerResult<Vec<ScoredSegment>> {
    let semaphore = Arc::new(Semaphore::new(config.max_classify_parallel.max(1)));

    let futures = scenes.iter().map(|scene| {
        let semaphore = semaphore.clone();
        async move {
            let _permit = semaphore
                .acquire()
                .await
                .map_err(|_| WorkerError::classification_failed("classifier permit closed"))?;
            Ok::<_, WorkerError>((scene.index, classifier.classify(source, scene).await))
        }
    });

    let mut results = Vec::with_capacity(scenes.len());
    for outcome in join_all(futures).await {
        results.push(outcome?);
    }
    results.sort_by_key(|(index, _)| *index);

    let threshold = config.effective_threshold();
    let mut flagged = Vec::new();
    let mut failures = 0usize;
    for (index, result) in results {
        match result {
            Ok(segment) if segment.score >= threshold => flagged.push(segment),
            Ok(_) => {}
            Err(e) => {
                failures += 1;
                warn!(scene_index = index, error = %e, "Scene classification failed");
            }
        }
    }

    if failures == scenes.len() && !scenes.is_empty() {
        return Err(WorkerError::classification_failed(format!(
            "all {failures} scenes failed"
        )));
    }

    info!(
        scenes = scenes.len(),
        flagged = flagged.len(),
        failures,
        threshold,
        "Classification complete"
    );
    Ok(flagged)
}

fn check_scene_order(scenes: &[(f64, f64)]) -> WorkerResult<()> {
    let mut previous_end = 0.0;
    for (i, &(start, end)) in scenes.iter().enumerate() {
        if !(start.is_finite() && end.is_finite()) || end <= start || start < previous_end {
            return Err(WorkerError::detection_failed(format!(
                "scene {i} ({start:.3}-{end:.3}s) is empty or out of order"
            )));
        }
        previous_end = end;
    }
    Ok(())
}

/// Detect scenes, fold short ones and classify them.
pub async fn analyze(
    detector: &dyn SceneDetector,
    classifier: &dyn Classifier,
    source: &Path,
    config: &ReconstructionConfig,
) -> WorkerResult<Vec<ScoredSegment>> {
    let raw = detector.detect(source, config.min_scene_length_secs).await?;
    check_scene_order(&raw)?;
    let scenes = merge_short_scenes(&raw, config.min_scene_length_secs);
    info!(
        detected = raw.len(),
        scenes = scenes.len(),
        "Scene detection complete"
    );
    classify_scenes(classifier, source, &scenes, config).await
}
