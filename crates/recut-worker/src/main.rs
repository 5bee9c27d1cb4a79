//! Reconstruction worker binary.
//!
//! ```text
//! recut-worker <source> <segments.json> <clips-dir> [output]
//! recut-worker resume <job-id> <clips-dir>
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use recut_media::{check_ffmpeg, FfmpegTranscoder};
use recut_models::{parse_segments, AssemblyReport, JobId};
use recut_worker::{
    metrics, FileJobStore, PrerenderedSynthesizer, ReconstructionEngine, WorkerConfig,
};

const USAGE: &str = "usage: recut-worker <source> <segments.json> <clips-dir> [output]\n       recut-worker resume <job-id> <clips-dir>";

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    if let Err(e) = init_tracing() {
        eprintln!("Failed to initialize logging: {e}");
        std::process::exit(1);
    }

    info!("Starting recut-worker");

    match run(std::env::args().skip(1).collect()).await {
        Ok(report) => {
            info!(
                output = %report.output_path.display(),
                segments = report.segments_count,
                replacements = report.replacements_applied,
                skipped = report.skipped_count(),
                runtime_delta = report.runtime_delta,
                "Reconstruction finished"
            );
            match serde_json::to_string_pretty(&report) {
                Ok(json) => println!("{json}"),
                Err(e) => error!("Failed to serialize report: {}", e),
            }
        }
        Err(e) => {
            error!("Reconstruction failed: {:#}", e);
            std::process::exit(1);
        }
    }
}

fn init_tracing() -> anyhow::Result<()> {
    // Colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env().add_directive("recut=info".parse()?);

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
    Ok(())
}

async fn run(args: Vec<String>) -> anyhow::Result<AssemblyReport> {
    let config = WorkerConfig::from_env();
    info!("Worker config: {:?}", config);

    if let Ok(addr) = std::env::var("METRICS_ADDR") {
        let addr: SocketAddr = addr.parse().context("invalid METRICS_ADDR")?;
        metrics::init_metrics(addr)?;
        info!(%addr, "Metrics exporter listening");
    }

    let ffmpeg = check_ffmpeg()?;
    info!(ffmpeg = %ffmpeg.display(), "Found ffmpeg");

    let transcoder = FfmpegTranscoder::new(config.reconstruction.encoding.clone())
        .with_timeout(config.ffmpeg_timeout.as_secs());
    let store = FileJobStore::new(&config.jobs_dir);

    // Stop starting new windows on Ctrl-C
    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received shutdown signal");
        let _ = cancel_tx.send(true);
    });

    match args.as_slice() {
        [cmd, job_id, clips_dir] if cmd == "resume" => {
            let engine = ReconstructionEngine::new(
                config,
                Arc::new(transcoder),
                Arc::new(PrerenderedSynthesizer::new(clips_dir)),
                Arc::new(store),
            )
            .with_cancellation(cancel_rx);
            Ok(engine.resume(&JobId::from_string(job_id.as_str())).await?)
        }
        [source, segments, clips_dir, rest @ ..] if rest.len() <= 1 => {
            let source = PathBuf::from(source);
            let output = match rest.first() {
                Some(output) => PathBuf::from(output),
                None => default_output(&source),
            };
            let json = tokio::fs::read_to_string(segments)
                .await
                .with_context(|| format!("reading {segments}"))?;
            let segments = parse_segments(&json)?;

            let engine = ReconstructionEngine::new(
                config,
                Arc::new(transcoder),
                Arc::new(PrerenderedSynthesizer::new(clips_dir)),
                Arc::new(store),
            )
            .with_cancellation(cancel_rx);
            let job = engine.create_job(&source, &segments, &output).await?;
            info!(job_id = %job.id, "Job created, run `recut-worker resume {}` to retry", job.id);
            Ok(engine.run(job).await?)
        }
        _ => bail!(USAGE),
    }
}

/// `<stem>_reconstructed.mp4` next to the source.
fn default_output(source: &std::path::Path) -> PathBuf {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    source.with_file_name(format!("{stem}_reconstructed.mp4"))
}
