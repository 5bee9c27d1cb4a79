//! Duration reconciliation between a normalized clip and its window.
//!
//! Let `d` be the clip duration, `t` the window span and `ratio = d / t`:
//!
//! | condition                         | action                          |
//! |-----------------------------------|---------------------------------|
//! | `|d - t| < copy_tolerance`        | copy as-is                      |
//! | `d > t`                           | trim to `t`                     |
//! | `ratio >= min_stretch_ratio`      | stretch by `1 / ratio`          |
//! | otherwise                         | accept the shorter clip         |
//!
//! A failed re-encode falls back to the unmodified clip and flags the window.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use recut_models::{Degradation, ReconcilePolicy};

use crate::error::{MediaError, MediaResult};
use crate::fs_utils::copy_file;
use crate::transcoder::Transcoder;

/// What to do with a clip of the wrong length.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReconcileDecision {
    Copy,
    Trim { target: f64 },
    /// Slow down by `factor` (> 1)
    Stretch { factor: f64 },
    AcceptShorter,
}

impl ReconcileDecision {
    pub fn decide(actual: f64, target: f64, policy: &ReconcilePolicy) -> Self {
        if target <= 0.0 || (actual - target).abs() < policy.copy_tolerance_secs {
            return ReconcileDecision::Copy;
        }
        if actual > target {
            return ReconcileDecision::Trim { target };
        }
        let ratio = actual / target;
        if actual > 0.0 && ratio >= policy.min_stretch_ratio {
            ReconcileDecision::Stretch { factor: 1.0 / ratio }
        } else {
            ReconcileDecision::AcceptShorter
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReconcileDecision::Copy => "copy",
            ReconcileDecision::Trim { .. } => "trim",
            ReconcileDecision::Stretch { .. } => "stretch",
            ReconcileDecision::AcceptShorter => "accept_shorter",
        }
    }
}

/// Reconciled clip ready for audio sync.
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciled {
    pub path: PathBuf,
    pub duration: f64,
    pub decision: ReconcileDecision,
    pub degradation: Option<Degradation>,
}

/// Bring the normalized clip at `input` (of `actual` seconds) to `target`
/// seconds, writing to `output`.
///
/// Never fails: when a re-encode fails the normalized clip is returned
/// unmodified with a [`Degradation::DurationMismatched`] flag.
pub async fn reconcile_duration(
    transcoder: &dyn Transcoder,
    input: &Path,
    actual: f64,
    has_audio: bool,
    target: f64,
    output: &Path,
    policy: &ReconcilePolicy,
) -> Reconciled {
    let decision = ReconcileDecision::decide(actual, target, policy);
    debug!(
        actual,
        target,
        decision = decision.as_str(),
        "Reconciling replacement duration"
    );
    metrics::counter!("recut_reconcile_decisions_total", "decision" => decision.as_str())
        .increment(1);

    let attempt = match decision {
        ReconcileDecision::Copy | ReconcileDecision::AcceptShorter => {
            copy_file(input, output).await.map(|()| actual)
        }
        ReconcileDecision::Trim { target } => {
            reencode(transcoder, output, transcoder.trim(input, target, output)).await
        }
        ReconcileDecision::Stretch { factor } => {
            reencode(
                transcoder,
                output,
                transcoder.stretch(input, factor, has_audio, output),
            )
            .await
        }
    };

    let shorter = (decision == ReconcileDecision::AcceptShorter).then_some(Degradation::AcceptedShorter);

    match attempt {
        Ok(duration) => Reconciled {
            path: output.to_path_buf(),
            duration,
            decision,
            degradation: shorter,
        },
        Err(e) => {
            let e = MediaError::ReconciliationFailed(e.to_string());
            warn!(
                input = %input.display(),
                decision = decision.as_str(),
                error = %e,
                "Using normalized clip unmodified"
            );
            Reconciled {
                path: input.to_path_buf(),
                duration: actual,
                decision,
                degradation: Some(match decision {
                    ReconcileDecision::AcceptShorter => Degradation::AcceptedShorter,
                    _ => Degradation::DurationMismatched(e.to_string()),
                }),
            }
        }
    }
}

async fn reencode(
    transcoder: &dyn Transcoder,
    output: &Path,
    op: impl std::future::Future<Output = MediaResult<()>>,
) -> MediaResult<f64> {
    op.await?;
    Ok(transcoder.probe(output).await?.duration)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeMedia, FakeOp, FakeTranscoder};
    use proptest::prelude::*;
    use tempfile::TempDir;

    fn policy() -> ReconcilePolicy {
        ReconcilePolicy::default()
    }

    #[test]
    fn test_decide_branches() {
        let p = policy();
        assert_eq!(ReconcileDecision::decide(6.1, 6.0, &p), ReconcileDecision::Copy);
        assert_eq!(ReconcileDecision::decide(5.85, 6.0, &p), ReconcileDecision::Copy);
        assert_eq!(
            ReconcileDecision::decide(8.0, 6.0, &p),
            ReconcileDecision::Trim { target: 6.0 }
        );
        match ReconcileDecision::decide(5.0, 6.0, &p) {
            ReconcileDecision::Stretch { factor } => assert!((factor - 1.2).abs() < 1e-9),
            other => panic!("expected stretch, got {other:?}"),
        }
        assert_eq!(
            ReconcileDecision::decide(4.2, 6.0, &p),
            ReconcileDecision::AcceptShorter
        );
    }

    #[test]
    fn test_decide_at_ratio_boundary_stretches() {
        assert!(matches!(
            ReconcileDecision::decide(6.4, 8.0, &policy()),
            ReconcileDecision::Stretch { .. }
        ));
    }

    #[test]
    fn test_min_stretch_ratio_is_configurable() {
        let loose = ReconcilePolicy {
            min_stretch_ratio: 0.6,
            ..policy()
        };
        assert!(matches!(
            ReconcileDecision::decide(4.2, 6.0, &loose),
            ReconcileDecision::Stretch { .. }
        ));
    }

    async fn clip(dir: &TempDir, duration: f64) -> PathBuf {
        let path = dir.path().join("window_000_normalized.mp4");
        FakeMedia::new(duration, 1920, 1080, 24.0)
            .write(&path)
            .await
            .unwrap();
        path
    }

    #[tokio::test]
    async fn test_shorter_clip_is_accepted_unmodified() {
        let dir = TempDir::new().unwrap();
        let input = clip(&dir, 4.2).await;
        let fake = FakeTranscoder::new();
        let out = dir.path().join("window_000_reconciled.mp4");

        let r = reconcile_duration(&fake, &input, 4.2, true, 6.0, &out, &policy()).await;

        assert_eq!(r.decision, ReconcileDecision::AcceptShorter);
        assert_eq!(r.duration, 4.2);
        assert_eq!(r.degradation, Some(Degradation::AcceptedShorter));
        assert_eq!(fake.call_count(FakeOp::Stretch), 0);
        assert_eq!(FakeMedia::read(&r.path).await.unwrap().duration, 4.2);
    }

    #[tokio::test]
    async fn test_long_clip_is_trimmed() {
        let dir = TempDir::new().unwrap();
        let input = clip(&dir, 8.0).await;
        let fake = FakeTranscoder::new();
        let out = dir.path().join("out.mp4");

        let r = reconcile_duration(&fake, &input, 8.0, true, 6.0, &out, &policy()).await;

        assert_eq!(r.path, out);
        assert_eq!(r.duration, 6.0);
        assert!(r.degradation.is_none());
    }

    #[tokio::test]
    async fn test_failed_stretch_falls_back_to_input() {
        let dir = TempDir::new().unwrap();
        let input = clip(&dir, 5.0).await;
        let fake = FakeTranscoder::new().fail_on(FakeOp::Stretch);
        let out = dir.path().join("out.mp4");

        let r = reconcile_duration(&fake, &input, 5.0, true, 6.0, &out, &policy()).await;

        assert_eq!(r.path, input);
        assert_eq!(r.duration, 5.0);
        assert!(matches!(
            r.degradation,
            Some(Degradation::DurationMismatched(_))
        ));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_stretch_or_trim_lands_on_target(t in 1.0f64..10.0, ratio in 0.8f64..1.25) {
            let d = t * ratio;
            // Within the copy tolerance the clip is kept as-is by policy.
            prop_assume!((d - t).abs() >= policy().copy_tolerance_secs);

            let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
            let r = rt.block_on(async {
                let dir = TempDir::new().unwrap();
                let input = clip(&dir, d).await;
                let out = dir.path().join("out.mp4");
                reconcile_duration(&FakeTranscoder::new(), &input, d, true, t, &out, &policy()).await
            });
            prop_assert!((r.duration - t).abs() < 0.05, "d={} t={} got {}", d, t, r.duration);
        }

        #[test]
        fn prop_short_clips_keep_their_duration(t in 1.0f64..10.0, ratio in 0.05f64..0.79) {
            let d = t * ratio;
            let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
            let r = rt.block_on(async {
                let dir = TempDir::new().unwrap();
                let input = clip(&dir, d).await;
                let out = dir.path().join("out.mp4");
                reconcile_duration(&FakeTranscoder::new(), &input, d, true, t, &out, &policy()).await
            });
            prop_assert_eq!(r.duration, d);
            prop_assert_eq!(r.decision, ReconcileDecision::AcceptShorter);
        }
    }
}
