//! Job persistence keyed by job id.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use recut_media::fs_utils::write_atomic;
use recut_models::{migrate_window_records, JobId, JobRecord};

use crate::error::{WorkerError, WorkerResult};

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn save(&self, job: &JobRecord) -> WorkerResult<()>;

    async fn load(&self, id: &JobId) -> WorkerResult<JobRecord>;

    async fn list(&self) -> WorkerResult<Vec<JobId>>;
}

/// Stores each job as `<root>/<job id>/job.json`.
#[derive(Debug, Clone)]
pub struct FileJobStore {
    root: PathBuf,
}

impl FileJobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn job_path(&self, id: &JobId) -> PathBuf {
        self.root.join(id.as_str()).join("job.json")
    }
}

/// Parse a stored job, migrating window records written by older versions.
pub fn parse_job_record(bytes: &[u8]) -> WorkerResult<JobRecord> {
    let mut value: Value = serde_json::from_slice(bytes)?;
    let windows = match value.as_object_mut().and_then(|o| o.remove("windows")) {
        Some(Value::Array(items)) => items,
        _ => Vec::new(),
    };
    let mut job: JobRecord = serde_json::from_value(value)?;
    job.windows = migrate_window_records(windows)?;
    Ok(job)
}

#[async_trait]
impl JobStore for FileJobStore {
    async fn save(&self, job: &JobRecord) -> WorkerResult<()> {
        let path = self.job_path(&job.id);
        write_atomic(&path, serde_json::to_vec_pretty(job)?).await?;
        debug!(job_id = %job.id, state = %job.state, "Job record saved");
        Ok(())
    }

    async fn load(&self, id: &JobId) -> WorkerResult<JobRecord> {
        let bytes = match tokio::fs::read(self.job_path(id)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(WorkerError::JobNotFound(id.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        parse_job_record(&bytes)
    }

    async fn list(&self) -> WorkerResult<Vec<JobId>> {
        let mut ids = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ids),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if tokio::fs::try_exists(entry.path().join("job.json"))
                .await
                .unwrap_or(false)
            {
                ids.push(JobId::from_string(name));
            }
        }
        ids.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        Ok(ids)
    }
}
