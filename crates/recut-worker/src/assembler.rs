//! Segment assembly: timeline planning, original-footage extraction and
//! concatenation with fallback.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use tokio::sync::Semaphore;
use tracing::info;

use recut_media::extract::MIN_SEGMENT_SECS;
use recut_media::fs_utils::remove_dir_best_effort;
use recut_media::{concatenate, extract_original, MediaError, Transcoder};
use recut_models::{
    total_span, AssemblyReport, ConcatStrategy, ReplacementResult, ReplacementTask,
    TimelineSegment, WindowOutcome, WindowStatus,
};

use crate::error::{WorkerError, WorkerResult};

/// A located window together with whatever its replacement chain produced.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowResult {
    pub task: ReplacementTask,
    pub result: ReplacementResult,
}

/// Build the ordered timeline covering `[0, source_duration)`.
///
/// Windows without a usable clip are left out, so their span is covered by
/// the surrounding original segments. Gaps shorter than
/// [`MIN_SEGMENT_SECS`] are not emitted.
pub fn plan_timeline(source_duration: f64, windows: &[WindowResult]) -> Vec<TimelineSegment> {
    let mut usable: Vec<&WindowResult> = windows.iter().filter(|w| w.result.is_usable()).collect();
    usable.sort_by(|a, b| a.task.window_start.total_cmp(&b.task.window_start));

    let mut plan = Vec::with_capacity(usable.len() * 2 + 1);
    let mut cursor = 0.0;
    for w in usable {
        let Some(clip_path) = w.result.clip_path.clone() else {
            continue;
        };
        if w.task.window_start - cursor >= MIN_SEGMENT_SECS {
            plan.push(TimelineSegment::Original {
                source_start: cursor,
                source_end: w.task.window_start,
            });
        }
        plan.push(TimelineSegment::Replacement {
            window_index: w.task.window_index,
            window_start: w.task.window_start,
            window_end: w.task.window_end,
            clip_path,
            actual_duration: w.result.actual_duration,
        });
        cursor = w.task.window_end;
    }
    if source_duration - cursor >= MIN_SEGMENT_SECS {
        plan.push(TimelineSegment::Original {
            source_start: cursor,
            source_end: source_duration,
        });
    }
    plan
}

/// Stage [`Assembler::assemble`] is about to enter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssemblyPhase {
    ExtractingOriginals,
    Concatenating,
    /// Entered once the stream copy has failed and the re-encode finished.
    ConcatenatingFallback,
}

/// Hook called between assembly stages.
///
/// An error aborts the assembly before the next stage starts.
#[async_trait]
pub trait AssemblyObserver: Send {
    async fn phase(&mut self, phase: AssemblyPhase) -> WorkerResult<()>;
}

#[async_trait]
impl AssemblyObserver for () {
    async fn phase(&mut self, _phase: AssemblyPhase) -> WorkerResult<()> {
        Ok(())
    }
}

/// Sole reader of the job's working directory and sole writer of the output.
pub struct Assembler<'a> {
    transcoder: &'a dyn Transcoder,
    source: &'a Path,
    work_dir: &'a Path,
    max_parallel: usize,
}

impl<'a> Assembler<'a> {
    pub fn new(
        transcoder: &'a dyn Transcoder,
        source: &'a Path,
        work_dir: &'a Path,
        max_parallel: usize,
    ) -> Self {
        Self {
            transcoder,
            source,
            work_dir,
            max_parallel: max_parallel.max(1),
        }
    }

    pub fn concat_list_path(&self) -> PathBuf {
        self.work_dir.join("concat_list.txt")
    }

    /// Plan, extract and concatenate the timeline into `output`.
    ///
    /// On failure the working directory is left untouched and its path is
    /// carried by the error.
    pub async fn assemble(
        &self,
        source_duration: f64,
        windows: &[WindowResult],
        output: &Path,
        observer: &mut dyn AssemblyObserver,
    ) -> WorkerResult<AssemblyReport> {
        let plan = plan_timeline(source_duration, windows);
        if plan.is_empty() {
            return Err(WorkerError::assembly_failed("nothing to assemble", self.work_dir));
        }
        info!(
            segments = plan.len(),
            expected_duration = total_span(&plan),
            "Timeline planned"
        );

        observer.phase(AssemblyPhase::ExtractingOriginals).await?;
        let files = self.extract_originals(&plan).await?;
        info!(files = files.len(), "Timeline segments ready");

        observer.phase(AssemblyPhase::Concatenating).await?;
        let mut fell_back = false;
        let strategy = self
            .concatenate(&files, output, |e| {
                info!(error = %e, "Stream copy concat failed, re-encoding");
                fell_back = true;
            })
            .await;
        if fell_back {
            observer.phase(AssemblyPhase::ConcatenatingFallback).await?;
        }
        let strategy = strategy?;

        Ok(build_report(output, self.work_dir, &plan, windows, strategy))
    }

    /// Extract every original segment of `plan`, concurrently.
    ///
    /// Returns the file for each plan entry, in plan order. Extraction is
    /// re-encoded so arbitrary cut points stay frame-accurate.
    pub async fn extract_originals(&self, plan: &[TimelineSegment]) -> WorkerResult<Vec<PathBuf>> {
        let semaphore = Arc::new(Semaphore::new(self.max_parallel));

        let futures = plan.iter().scan(0usize, |original_index, segment| {
            let job = match segment {
                TimelineSegment::Original {
                    source_start,
                    source_end,
                } => {
                    let output = self
                        .work_dir
                        .join(format!("original_{:03}.mp4", *original_index));
                    *original_index += 1;
                    Some((*source_start, *source_end, output))
                }
                TimelineSegment::Replacement { .. } => None,
            };
            Some(job)
        });

        let futures: Vec<_> = futures
            .map(|job| {
                let semaphore = semaphore.clone();
                async move {
                    let Some((start, end, output)) = job else {
                        return Ok(None);
                    };
                    let _permit = semaphore
                        .acquire()
                        .await
                        .map_err(|_| MediaError::internal("extraction permit closed"))?;
                    extract_original(self.transcoder, self.source, start, end, &output)
                        .await
                        .map(|mode| {
                            info!(start, end, mode = ?mode, "Original segment extracted");
                            Some(output)
                        })
                }
            })
            .collect();

        let results = join_all(futures).await;

        let mut files = Vec::with_capacity(plan.len());
        for (segment, result) in plan.iter().zip(results) {
            match (segment, result) {
                (_, Ok(Some(path))) => files.push(path),
                (TimelineSegment::Replacement { clip_path, .. }, Ok(None)) => {
                    files.push(clip_path.clone())
                }
                (TimelineSegment::Original { .. }, Ok(None)) => {
                    return Err(WorkerError::assembly_failed(
                        "original segment was not extracted",
                        self.work_dir,
                    ))
                }
                (_, Err(e)) => {
                    return Err(WorkerError::assembly_failed(e.to_string(), self.work_dir));
                }
            }
        }
        Ok(files)
    }

    /// Join the ordered segment files into `output`.
    ///
    /// `on_fallback` runs when the stream copy fails and the re-encode is
    /// about to start. Intermediates are preserved on failure.
    pub async fn concatenate<F>(
        &self,
        files: &[PathBuf],
        output: &Path,
        on_fallback: F,
    ) -> WorkerResult<ConcatStrategy>
    where
        F: FnOnce(&MediaError) + Send,
    {
        concatenate(
            self.transcoder,
            files,
            &self.concat_list_path(),
            output,
            on_fallback,
        )
        .await
        .map_err(|e| WorkerError::assembly_failed(e.to_string(), self.work_dir))
    }
}

/// Per-window outcomes in window order.
pub fn window_outcomes(windows: &[WindowResult]) -> Vec<WindowOutcome> {
    let mut outcomes: Vec<WindowOutcome> = windows
        .iter()
        .map(|w| WindowOutcome {
            window_index: w.task.window_index,
            window_start: w.task.window_start,
            window_end: w.task.window_end,
            actual_duration: w.result.actual_duration,
            status: WindowStatus::from_result(&w.result),
        })
        .collect();
    outcomes.sort_by_key(|o| o.window_index);
    outcomes
}

/// Report for a successful assembly.
pub fn build_report(
    output: &Path,
    work_dir: &Path,
    plan: &[TimelineSegment],
    windows: &[WindowResult],
    strategy: ConcatStrategy,
) -> AssemblyReport {
    let replaced: Vec<&TimelineSegment> = plan.iter().filter(|s| s.is_replacement()).collect();
    let runtime_delta: f64 = replaced
        .iter()
        .map(|s| {
            let (start, end) = s.source_range();
            s.span() - (end - start)
        })
        .sum();

    AssemblyReport {
        success: true,
        output_path: output.to_path_buf(),
        segments_count: plan.len(),
        replacements_applied: replaced.len(),
        concat_strategy: Some(strategy),
        windows: window_outcomes(windows),
        runtime_delta,
        work_dir: work_dir.to_path_buf(),
        error: None,
    }
}

/// Report for a job that failed after windows were processed.
pub fn failed_report(
    output: &Path,
    work_dir: &Path,
    windows: &[WindowResult],
    error: &WorkerError,
) -> AssemblyReport {
    AssemblyReport {
        success: false,
        output_path: output.to_path_buf(),
        segments_count: 0,
        replacements_applied: 0,
        concat_strategy: None,
        windows: window_outcomes(windows),
        runtime_delta: 0.0,
        work_dir: error
            .preserved_work_dir()
            .unwrap_or(work_dir)
            .to_path_buf(),
        error: Some(error.to_string()),
    }
}

/// Remove the job's intermediates after a successful run.
pub async fn cleanup_work_dir(work_dir: &Path) {
    info!(work_dir = %work_dir.display(), "Removing intermediates");
    remove_dir_best_effort(work_dir).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use recut_media::testing::{parse_concat_list, FakeMedia, FakeOp, FakeTranscoder};
    use tempfile::TempDir;

    #[derive(Default)]
    struct Phases {
        seen: Vec<AssemblyPhase>,
        fail_at: Option<AssemblyPhase>,
    }

    #[async_trait]
    impl AssemblyObserver for Phases {
        async fn phase(&mut self, phase: AssemblyPhase) -> WorkerResult<()> {
            self.seen.push(phase);
            if self.fail_at == Some(phase) {
                return Err(WorkerError::Cancelled);
            }
            Ok(())
        }
    }

    fn task(index: usize, start: f64, end: f64) -> ReplacementTask {
        ReplacementTask {
            window_index: index,
            window_start: start,
            window_end: end,
            was_trimmed: false,
            trimmed_seconds: 0.0,
            flagged_start: start,
            flagged_end: end,
        }
    }

    fn ok(index: usize, start: f64, end: f64, actual: f64) -> WindowResult {
        WindowResult {
            task: task(index, start, end),
            result: ReplacementResult::ready(format!("window_{index:03}_final.mp4"), actual),
        }
    }

    fn failed(index: usize, start: f64, end: f64) -> WindowResult {
        WindowResult {
            task: task(index, start, end),
            result: ReplacementResult::failed("synthesis: down"),
        }
    }

    #[test]
    fn test_plan_covers_source_without_gaps() {
        let plan = plan_timeline(60.0, &[ok(1, 30.0, 36.0, 6.0), ok(0, 8.5, 14.5, 6.0)]);

        let ranges: Vec<(f64, f64)> = plan.iter().map(|s| s.source_range()).collect();
        assert_eq!(
            ranges,
            vec![(0.0, 8.5), (8.5, 14.5), (14.5, 30.0), (30.0, 36.0), (36.0, 60.0)]
        );
    }

    #[test]
    fn test_failed_window_keeps_original() {
        let plan = plan_timeline(60.0, &[ok(0, 8.5, 14.5, 6.0), failed(1, 30.0, 36.0)]);
        assert_eq!(plan.len(), 3);
        assert_eq!(plan[2].source_range(), (14.5, 60.0));
    }

    #[test]
    fn test_window_at_source_edges() {
        let plan = plan_timeline(20.0, &[ok(0, 0.0, 6.0, 6.0), ok(1, 14.0, 20.0, 6.0)]);
        assert!(plan[0].is_replacement());
        assert!(plan[2].is_replacement());
        assert_eq!(plan.len(), 3);
    }

    #[test]
    fn test_no_windows_is_one_original() {
        let plan = plan_timeline(42.0, &[]);
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].source_range(), (0.0, 42.0));
    }

    fn arb_windows() -> impl Strategy<Value = (Vec<WindowResult>, f64)> {
        proptest::collection::vec((0.1f64..10.0, 0.5f64..8.0, 0.2f64..1.3, any::<bool>()), 0..10)
            .prop_map(|specs| {
                let mut cursor = 0.0;
                let mut windows = Vec::new();
                for (i, (gap, len, ratio, usable)) in specs.into_iter().enumerate() {
                    let start = cursor + gap;
                    let end = start + len;
                    windows.push(if usable {
                        ok(i, start, end, len * ratio)
                    } else {
                        failed(i, start, end)
                    });
                    cursor = end;
                }
                (windows, cursor + 0.5)
            })
    }

    proptest! {
        #[test]
        fn prop_span_sum_accounts_for_replacements((windows, duration) in arb_windows()) {
            let plan = plan_timeline(duration, &windows);
            let usable: Vec<&WindowResult> =
                windows.iter().filter(|w| w.result.is_usable()).collect();
            let expected = duration
                - usable.iter().map(|w| w.task.span()).sum::<f64>()
                + usable.iter().map(|w| w.result.actual_duration).sum::<f64>();
            prop_assert!((recut_models::total_span(&plan) - expected).abs() < 1e-6);

            for pair in plan.windows(2) {
                prop_assert!((pair[0].source_range().1 - pair[1].source_range().0).abs() < 1e-9);
            }
        }
    }

    async fn setup(dir: &TempDir) -> (PathBuf, Vec<WindowResult>) {
        let source = dir.path().join("source.mp4");
        FakeMedia::new(60.0, 1920, 1080, 24.0)
            .write(&source)
            .await
            .unwrap();

        let clip = dir.path().join("window_000_final.mp4");
        FakeMedia::new(4.2, 1920, 1080, 24.0)
            .write(&clip)
            .await
            .unwrap();
        let windows = vec![WindowResult {
            task: task(0, 20.0, 26.0),
            result: ReplacementResult::ready(clip, 4.2),
        }];
        (source, windows)
    }

    #[tokio::test]
    async fn test_assemble_shorter_replacement() {
        let dir = TempDir::new().unwrap();
        let (source, windows) = setup(&dir).await;
        let fake = FakeTranscoder::new();
        let out = dir.path().join("out.mp4");
        let assembler = Assembler::new(&fake, &source, dir.path(), 2);
        let mut phases = Phases::default();

        let report = assembler
            .assemble(60.0, &windows, &out, &mut phases)
            .await
            .unwrap();

        assert!(report.success);
        assert_eq!(report.segments_count, 3);
        assert_eq!(report.replacements_applied, 1);
        assert_eq!(report.concat_strategy, Some(ConcatStrategy::StreamCopy));
        assert!((report.runtime_delta + 1.8).abs() < 1e-9);
        assert_eq!(report.output_path, out);
        assert_eq!(
            phases.seen,
            vec![AssemblyPhase::ExtractingOriginals, AssemblyPhase::Concatenating]
        );
        let output = FakeMedia::read(&out).await.unwrap();
        assert!((output.duration - 58.2).abs() < 1e-9);

        let list = tokio::fs::read_to_string(assembler.concat_list_path()).await.unwrap();
        let names: Vec<String> = parse_concat_list(&list)
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            names,
            vec!["original_000.mp4", "window_000_final.mp4", "original_001.mp4"]
        );
    }

    #[tokio::test]
    async fn test_extraction_failure_fails_assembly_and_keeps_files() {
        let dir = TempDir::new().unwrap();
        let (source, windows) = setup(&dir).await;
        let fake = FakeTranscoder::new()
            .fail_on_path(FakeOp::ExtractReencode, "original_001")
            .fail_on_path(FakeOp::ExtractFastCopy, "original_001");
        let assembler = Assembler::new(&fake, &source, dir.path(), 2);

        let err = assembler
            .assemble(60.0, &windows, &dir.path().join("out.mp4"), &mut ())
            .await
            .unwrap_err();

        assert_eq!(err.preserved_work_dir(), Some(dir.path()));
        assert!(dir.path().join("original_000.mp4").exists());
    }

    #[tokio::test]
    async fn test_concat_fallback_reported() {
        let dir = TempDir::new().unwrap();
        let (source, windows) = setup(&dir).await;
        let fake = FakeTranscoder::new().fail_on(FakeOp::ConcatCopy);
        let assembler = Assembler::new(&fake, &source, dir.path(), 2);
        let mut phases = Phases::default();

        let report = assembler
            .assemble(60.0, &windows, &dir.path().join("out.mp4"), &mut phases)
            .await
            .unwrap();

        assert_eq!(phases.seen.last(), Some(&AssemblyPhase::ConcatenatingFallback));
        assert_eq!(report.concat_strategy, Some(ConcatStrategy::Reencode));
    }

    #[tokio::test]
    async fn test_observer_error_stops_before_concatenation() {
        let dir = TempDir::new().unwrap();
        let (source, windows) = setup(&dir).await;
        let fake = FakeTranscoder::new();
        let out = dir.path().join("out.mp4");
        let assembler = Assembler::new(&fake, &source, dir.path(), 2);
        let mut phases = Phases {
            fail_at: Some(AssemblyPhase::Concatenating),
            ..Default::default()
        };

        let err = assembler
            .assemble(60.0, &windows, &out, &mut phases)
            .await
            .unwrap_err();

        assert!(matches!(err, WorkerError::Cancelled));
        assert!(dir.path().join("original_000.mp4").exists());
        assert!(!out.exists());
        assert_eq!(fake.call_count(FakeOp::ConcatCopy), 0);
    }

    #[tokio::test]
    async fn test_cleanup_removes_work_dir() {
        let dir = TempDir::new().unwrap();
        let work = dir.path().join("job");
        tokio::fs::create_dir_all(&work).await.unwrap();
        tokio::fs::write(work.join("original_000.mp4"), b"x").await.unwrap();

        cleanup_work_dir(&work).await;
        assert!(!work.exists());
    }
}
