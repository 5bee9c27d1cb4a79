//! Job orchestration.
//!
//! A job moves through its state machine while the engine persists the record
//! after every transition and after every finished window, so an interrupted
//! run can be resumed without repeating completed synthesis.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::future::join_all;
use tokio::sync::{watch, Mutex, Semaphore};
use tracing::{info, Instrument};

use recut_media::fs_utils::move_file;
use recut_media::{Transcoder, VideoInfo};
use recut_models::{
    AssemblyReport, JobId, JobRecord, JobState, MergedWindow, ReplacementResult,
    ScoredSegment, WindowRecord, WindowStatus,
};

use crate::assembler::{
    cleanup_work_dir, failed_report, Assembler, AssemblyObserver, AssemblyPhase, WindowResult,
};
use crate::collaborators::Synthesizer;
use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::job_store::JobStore;
use crate::locator::{locate_all, LocatorParams};
use crate::logging::JobLogger;
use crate::merger::merge;
use crate::metrics;
use crate::replacement::{process_window, ReplacementContext};
use crate::retry::RetryConfig;

pub struct ReconstructionEngine {
    config: WorkerConfig,
    transcoder: Arc<dyn Transcoder>,
    synthesizer: Arc<dyn Synthesizer>,
    store: Arc<dyn JobStore>,
    cancel: Option<watch::Receiver<bool>>,
}

impl ReconstructionEngine {
    pub fn new(
        config: WorkerConfig,
        transcoder: Arc<dyn Transcoder>,
        synthesizer: Arc<dyn Synthesizer>,
        store: Arc<dyn JobStore>,
    ) -> Self {
        Self {
            config,
            transcoder,
            synthesizer,
            store,
            cancel: None,
        }
    }

    /// Stop starting new windows once the receiver reads `true`.
    ///
    /// Windows already in flight run to completion.
    pub fn with_cancellation(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|rx| *rx.borrow())
    }

    fn check_cancelled(&self) -> WorkerResult<()> {
        if self.is_cancelled() {
            return Err(WorkerError::Cancelled);
        }
        Ok(())
    }

    /// Merge the flagged segments, locate their cut windows and persist a new job.
    pub async fn create_job(
        &self,
        source: &Path,
        segments: &[ScoredSegment],
        output: &Path,
    ) -> WorkerResult<JobRecord> {
        self.config.validate()?;
        let config = self.config.reconstruction.clone();
        let info = self.transcoder.probe(source).await?;

        let mut windows = merge(segments, config.gap_tolerance_secs);
        if let Some(cap) = config.max_windows {
            if windows.len() > cap {
                info!(
                    windows = windows.len(),
                    cap, "Dropping windows beyond the configured maximum"
                );
                windows.truncate(cap);
            }
        }

        let tasks = locate_all(&windows, &LocatorParams::from(&config), info.duration)?;

        let mut job = JobRecord::new(config, info.to_source_info(source), output);
        job.merged_windows = windows;
        for task in &tasks {
            job.upsert_window(WindowRecord::from_task(task));
        }
        self.store.save(&job).await?;

        info!(
            job_id = %job.id,
            segments = segments.len(),
            windows = job.windows.len(),
            source_duration = info.duration,
            "Job created"
        );
        Ok(job)
    }

    /// Run a created job to a terminal state.
    ///
    /// On failure the record is saved as `Failed` with a report describing
    /// the windows processed so far, and the error is returned.
    pub async fn run(&self, mut job: JobRecord) -> WorkerResult<AssemblyReport> {
        let logger = JobLogger::new(&job.id, "reconstruct");
        let span = logger.create_span();

        async move {
            let started = Instant::now();
            let work_dir = self.config.job_work_dir(&job.id);
            metrics::job_started();
            logger.log_start(&format!(
                "{} windows over {:.2}s of source",
                job.windows.len(),
                job.source.duration
            ));

            let mut windows = Vec::new();
            let outcome = self.execute(&mut job, &work_dir, &mut windows, &logger).await;
            metrics::job_finished();
            let elapsed = started.elapsed().as_secs_f64();

            match outcome {
                Ok(report) => {
                    metrics::record_job("succeeded", elapsed);
                    logger.log_completion(&format!(
                        "{} segments, {} replaced ({} degraded), {} skipped, runtime delta {:+.2}s",
                        report.segments_count,
                        report.replacements_applied,
                        report.degraded_count(),
                        report.skipped_count(),
                        report.runtime_delta
                    ));
                    Ok(report)
                }
                Err(e) => {
                    let report = failed_report(&job.output_path, &work_dir, &windows, &e);
                    job.error = Some(e.to_string());
                    job.report = Some(report);
                    if !job.state.is_terminal() {
                        let _ = job.transition(JobState::Failed);
                    }
                    if let Err(save_err) = self.store.save(&job).await {
                        logger.log_warning(&format!("Failed to save failed job: {save_err}"));
                    }
                    metrics::record_job("failed", elapsed);
                    logger.log_error(&e.to_string());
                    Err(e)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn execute(
        &self,
        job: &mut JobRecord,
        work_dir: &Path,
        windows: &mut Vec<WindowResult>,
        logger: &JobLogger,
    ) -> WorkerResult<AssemblyReport> {
        self.advance(job, JobState::ProcessingReplacements).await?;
        tokio::fs::create_dir_all(work_dir).await?;

        let source = job.source.path.clone();
        let source_info = self.transcoder.probe(&source).await?;

        *windows = self
            .process_windows(job, &source, &source_info, work_dir)
            .await?;
        for w in windows.iter() {
            let status = WindowStatus::from_result(&w.result);
            metrics::record_window(status.as_str());
            match &status {
                WindowStatus::Skipped { reason } => logger.log_window_warning(
                    w.task.window_index,
                    &format!("original footage kept: {reason}"),
                ),
                WindowStatus::Degraded { degradations } => logger.log_window_warning(
                    w.task.window_index,
                    &format!("replaced with {} degradation(s)", degradations.len()),
                ),
                WindowStatus::Replaced => {}
            }
        }

        let assembler = Assembler::new(
            &*self.transcoder,
            &source,
            work_dir,
            job.config.max_segment_parallel,
        );
        let staged = work_dir.join("output.mp4");
        let mut report = assembler
            .assemble(
                source_info.duration,
                windows,
                &staged,
                &mut JobPhases { engine: self, job: &mut *job },
            )
            .await?;
        logger.log_progress(&format!("{} timeline segments joined", report.segments_count));

        move_file(&staged, &job.output_path)
            .await
            .map_err(|e| WorkerError::assembly_failed(e.to_string(), work_dir))?;
        report.output_path = job.output_path.clone();

        metrics::record_runtime_delta(report.runtime_delta);
        job.report = Some(report.clone());
        job.error = None;
        self.advance(job, JobState::Succeeded).await?;

        if !self.config.keep_intermediates {
            cleanup_work_dir(work_dir).await;
        }
        Ok(report)
    }

    async fn advance(&self, job: &mut JobRecord, next: JobState) -> WorkerResult<()> {
        let from = job.state;
        job.transition(next)?;
        info!(job_id = %job.id, from = %from, to = %next, "Job state changed");
        self.store.save(job).await
    }

    /// Process every window with bounded parallelism.
    ///
    /// Each finished window is written back into the job record and saved
    /// before the next permit is released.
    async fn process_windows(
        &self,
        job: &mut JobRecord,
        source: &Path,
        source_info: &VideoInfo,
        work_dir: &Path,
    ) -> WorkerResult<Vec<WindowResult>> {
        let records = job.windows.clone();
        let merged = job.merged_windows.clone();
        let config = job.config.clone();
        let retry = RetryConfig::new("synthesis")
            .with_max_retries(self.config.synthesis_retries)
            .with_base_delay(self.config.synthesis_retry_delay);
        let ctx = ReplacementContext {
            transcoder: &*self.transcoder,
            synthesizer: &*self.synthesizer,
            source,
            source_info,
            work_dir,
            config: &config,
            retry: &retry,
        };
        let semaphore = Semaphore::new(config.max_segment_parallel.max(1));
        let shared = Mutex::new(job);

        let futures = records
            .iter()
            .map(|record| self.process_one(&ctx, &semaphore, &shared, &merged, record));
        let outcomes = join_all(futures).await;

        let mut results = Vec::with_capacity(outcomes.len());
        for outcome in outcomes {
            if let Some(result) = outcome? {
                results.push(result);
            }
        }
        self.check_cancelled()?;
        Ok(results)
    }

    async fn process_one(
        &self,
        ctx: &ReplacementContext<'_>,
        semaphore: &Semaphore,
        shared: &Mutex<&mut JobRecord>,
        merged: &[MergedWindow],
        record: &WindowRecord,
    ) -> WorkerResult<Option<WindowResult>> {
        let task = record.to_task();
        if let Some(result) = reusable_result(record).await {
            info!(
                window_index = record.window_index,
                "Reusing finished replacement"
            );
            return Ok(Some(WindowResult { task, result }));
        }

        let _permit = semaphore
            .acquire()
            .await
            .map_err(|_| WorkerError::Cancelled)?;
        if self.is_cancelled() {
            return Ok(None);
        }

        let window = window_for(merged, record);
        let prior = prior_clip(record).await;
        let result = process_window(ctx, &task, &window, prior.as_deref()).await;

        let mut job = shared.lock().await;
        job.upsert_window(record.clone().with_result(&result));
        self.store.save(&**job).await?;
        Ok(Some(WindowResult { task, result }))
    }

    /// Re-run a job that did not finish.
    ///
    /// A succeeded job returns its stored report. Otherwise a new job is
    /// created from the stored windows; windows with a finished clip on disk
    /// are not processed again. The previous record is marked failed.
    pub async fn resume(&self, id: &JobId) -> WorkerResult<AssemblyReport> {
        let mut previous = self.store.load(id).await?;
        if previous.state == JobState::Succeeded {
            if let Some(report) = previous.report.clone() {
                return Ok(report);
            }
        }

        let mut job = JobRecord::new(
            previous.config.clone(),
            previous.source.clone(),
            previous.output_path.clone(),
        );
        job.merged_windows = previous.merged_windows.clone();
        job.windows = previous.windows.clone();
        self.store.save(&job).await?;

        if !previous.state.is_terminal() {
            previous.error = Some(format!("superseded by job {}", job.id));
            previous.transition(JobState::Failed)?;
            self.store.save(&previous).await?;
        }
        info!(previous = %id, job_id = %job.id, "Resuming job");

        let previous_dir = self.config.job_work_dir(id);
        let report = self.run(job).await?;
        if !self.config.keep_intermediates {
            cleanup_work_dir(&previous_dir).await;
        }
        Ok(report)
    }

    pub async fn load(&self, id: &JobId) -> WorkerResult<JobRecord> {
        self.store.load(id).await
    }
}

async fn exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

/// A record whose conformed clip is still on disk.
async fn reusable_result(record: &WindowRecord) -> Option<ReplacementResult> {
    record.actual_duration.filter(|d| *d > 0.0)?;
    let clip = record.clip_path.as_ref()?;
    if !exists(clip).await {
        return None;
    }
    record.to_result()
}

/// A clip recorded without a measured duration, which still needs conforming.
async fn prior_clip(record: &WindowRecord) -> Option<PathBuf> {
    if record.actual_duration.is_some() {
        return None;
    }
    let clip = record.clip_path.as_ref()?;
    exists(clip).await.then(|| clip.clone())
}

fn window_for(merged: &[MergedWindow], record: &WindowRecord) -> MergedWindow {
    if let Some(window) = merged.get(record.window_index) {
        return window.clone();
    }
    let task = record.to_task();
    MergedWindow {
        start: task.flagged_start,
        end: task.flagged_end,
        severity: Default::default(),
        issues: Default::default(),
        suggested_action: Default::default(),
        score: 0.0,
        description: None,
    }
}


/// Maps assembly stages onto job states, persisting each one.
struct JobPhases<'a> {
    engine: &'a ReconstructionEngine,
    job: &'a mut JobRecord,
}

#[async_trait]
impl AssemblyObserver for JobPhases<'_> {
    async fn phase(&mut self, phase: AssemblyPhase) -> WorkerResult<()> {
        let next = match phase {
            AssemblyPhase::ExtractingOriginals => JobState::ExtractingOriginals,
            AssemblyPhase::Concatenating => JobState::Concatenating,
            AssemblyPhase::ConcatenatingFallback => JobState::ConcatenatingFallback,
        };
        if next != JobState::ConcatenatingFallback {
            self.engine.check_cancelled()?;
        }
        self.engine.advance(self.job, next).await
    }
}
