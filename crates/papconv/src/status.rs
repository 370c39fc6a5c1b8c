//! Read-only projections over the job registry and artifact store.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::{ExportFormat, InputFormat};
use crate::error::LookupError;
use crate::jobs::{Job, JobPhase, JobRegistry, JobResult, JobStatus};
use crate::storage::{ArtifactFile, ArtifactStore, ChunkRecord, ImageRecord, TableRecord};

/// Characters of the preview kept in status responses.
pub const STATUS_PREVIEW_CHARS: usize = 1000;

/// What a polling client sees for one job.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusView {
    pub job_id: String,
    pub filename: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_format: Option<InputFormat>,
    pub status: JobStatus,
    pub phase: JobPhase,
    pub progress: u8,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<JobResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<Job> for JobStatusView {
    fn from(job: Job) -> Self {
        let result = job.result.map(|mut result| {
            if result.preview.chars().count() > STATUS_PREVIEW_CHARS {
                result.preview = result.preview.chars().take(STATUS_PREVIEW_CHARS).collect();
            }
            result
        });

        Self {
            job_id: job.id,
            filename: job.filename,
            input_format: job.input_format,
            status: job.status,
            phase: job.phase,
            progress: job.progress,
            message: job.message,
            confidence: job.confidence,
            result,
            error: job.error,
            created_at: job.created_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
        }
    }
}

/// Pure reads: nothing here blocks on a worker or mutates state.
pub struct StatusReporter {
    registry: Arc<JobRegistry>,
    artifacts: Arc<ArtifactStore>,
}

impl StatusReporter {
    pub fn new(registry: Arc<JobRegistry>, artifacts: Arc<ArtifactStore>) -> Self {
        Self {
            registry,
            artifacts,
        }
    }

    pub fn status(&self, job_id: &str) -> Result<JobStatusView, LookupError> {
        self.job(job_id).map(JobStatusView::from)
    }

    /// All known jobs, oldest first.
    pub fn jobs(&self) -> Vec<JobStatusView> {
        self.registry
            .list()
            .into_iter()
            .map(JobStatusView::from)
            .collect()
    }

    /// The full result of a completed job.
    pub fn result(&self, job_id: &str) -> Result<JobResult, LookupError> {
        let job = self.job(job_id)?;
        match job.status {
            JobStatus::Completed => job.result.ok_or_else(|| LookupError::NotReady {
                job_id: job.id.clone(),
                status: job.status,
            }),
            JobStatus::Failed => Err(LookupError::Failed {
                job_id: job.id,
                error: job.error.unwrap_or_else(|| "unknown error".to_string()),
            }),
            status => Err(LookupError::NotReady {
                job_id: job.id,
                status,
            }),
        }
    }

    pub fn list_images(&self, job_id: &str) -> Result<Vec<ImageRecord>, LookupError> {
        self.ensure_known(job_id)?;
        Ok(self.artifacts.list_images(job_id))
    }

    pub fn get_image(&self, job_id: &str, image_id: usize) -> Result<ArtifactFile, LookupError> {
        self.ensure_known(job_id)?;
        self.artifacts.read_image(job_id, image_id)
    }

    pub fn list_tables(&self, job_id: &str) -> Result<Vec<TableRecord>, LookupError> {
        self.ensure_known(job_id)?;
        Ok(self.artifacts.list_tables(job_id))
    }

    pub fn get_table_csv(
        &self,
        job_id: &str,
        table_id: usize,
    ) -> Result<ArtifactFile, LookupError> {
        self.ensure_known(job_id)?;
        self.artifacts.read_table_csv(job_id, table_id)
    }

    pub fn get_table_image(
        &self,
        job_id: &str,
        table_id: usize,
    ) -> Result<ArtifactFile, LookupError> {
        self.ensure_known(job_id)?;
        self.artifacts.read_table_image(job_id, table_id)
    }

    pub fn list_chunks(&self, job_id: &str) -> Result<Vec<ChunkRecord>, LookupError> {
        self.ensure_known(job_id)?;
        Ok(self.artifacts.list_chunks(job_id))
    }

    pub fn get_export(
        &self,
        job_id: &str,
        format: ExportFormat,
    ) -> Result<ArtifactFile, LookupError> {
        self.ensure_known(job_id)?;
        self.artifacts.read_export(job_id, format)
    }

    /// Export decoded as UTF-8 text, for in-browser preview.
    pub fn get_export_content(
        &self,
        job_id: &str,
        format: ExportFormat,
    ) -> Result<String, LookupError> {
        self.get_export(job_id, format).map(|file| file.text())
    }

    fn job(&self, job_id: &str) -> Result<Job, LookupError> {
        self.registry
            .get(job_id)
            .ok_or_else(|| LookupError::NotFound(job_id.to_string()))
    }

    fn ensure_known(&self, job_id: &str) -> Result<(), LookupError> {
        if self.registry.contains(job_id) {
            Ok(())
        } else {
            Err(LookupError::NotFound(job_id.to_string()))
        }
    }
}
