//! Prometheus metrics for the reconstruction worker.

use std::net::SocketAddr;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Metric names.
pub mod names {
    pub const JOBS_TOTAL: &str = "recut_jobs_total";
    pub const JOB_DURATION_SECONDS: &str = "recut_job_duration_seconds";
    pub const JOBS_ACTIVE: &str = "recut_jobs_active";
    pub const WINDOWS_TOTAL: &str = "recut_windows_total";
    pub const SYNTHESIS_ATTEMPTS_TOTAL: &str = "recut_synthesis_attempts_total";
    pub const RUNTIME_DELTA_SECONDS: &str = "recut_runtime_delta_seconds";
}

/// Install the Prometheus exporter, serving `/metrics` on `addr`.
pub fn init_metrics(addr: SocketAddr) -> anyhow::Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    Ok(())
}

/// Record a finished job (`status` is `succeeded` or `failed`).
pub fn record_job(status: &'static str, duration_secs: f64) {
    counter!(names::JOBS_TOTAL, "status" => status).increment(1);
    histogram!(names::JOB_DURATION_SECONDS, "status" => status).record(duration_secs);
}

pub fn job_started() {
    gauge!(names::JOBS_ACTIVE).increment(1.0);
}

pub fn job_finished() {
    gauge!(names::JOBS_ACTIVE).decrement(1.0);
}

/// Record how a window ended up (`replaced`, `degraded` or `skipped`).
pub fn record_window(outcome: &'static str) {
    counter!(names::WINDOWS_TOTAL, "outcome" => outcome).increment(1);
}

pub fn record_synthesis_attempts(attempts: u32, success: bool) {
    let result = if success { "success" } else { "failure" };
    counter!(names::SYNTHESIS_ATTEMPTS_TOTAL, "result" => result).increment(u64::from(attempts));
}

pub fn record_runtime_delta(delta_secs: f64) {
    histogram!(names::RUNTIME_DELTA_SECONDS).record(delta_secs.abs());
}
