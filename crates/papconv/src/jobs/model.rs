use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{ConversionSettings, ExportFormat, InputFormat};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Step a job is currently in. Finer grained than [`JobStatus`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobPhase {
    Queued,
    Validating,
    LoadingPipeline,
    Analyzing,
    Extracting,
    GeneratingExports,
    Finalizing,
    Completed,
    Failed,
}

impl std::fmt::Display for JobPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobPhase::Queued => write!(f, "Queued"),
            JobPhase::Validating => write!(f, "Uploading and validating"),
            JobPhase::LoadingPipeline => write!(f, "Loading pipeline"),
            JobPhase::Analyzing => write!(f, "Analyzing document"),
            JobPhase::Extracting => write!(f, "Extracting content"),
            JobPhase::GeneratingExports => write!(f, "Generating exports"),
            JobPhase::Finalizing => write!(f, "Finalizing"),
            JobPhase::Completed => write!(f, "Completed"),
            JobPhase::Failed => write!(f, "Failed"),
        }
    }
}

/// Where a job's document comes from.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobSource {
    #[serde(rename_all = "camelCase")]
    File {
        #[serde(skip_serializing)]
        path: PathBuf,
        original_filename: String,
        size: u64,
    },
    Url { url: String },
}

impl JobSource {
    pub fn is_url(&self) -> bool {
        matches!(self, JobSource::Url { .. })
    }
}

/// Summary of a completed conversion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobResult {
    pub formats_available: Vec<ExportFormat>,
    pub default_format: ExportFormat,
    pub page_count: usize,
    pub images_count: usize,
    pub tables_count: usize,
    pub chunks_count: usize,
    /// Leading excerpt of the Markdown export, falling back to text.
    pub preview: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    pub source: JobSource,
    /// Display name: the original upload name or the last URL path segment.
    pub filename: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_format: Option<InputFormat>,
    #[serde(skip)]
    pub settings: Arc<ConversionSettings>,
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

impl Job {
    /// A fresh job in state `queued`.
    pub fn new(source: JobSource, settings: ConversionSettings) -> Self {
        let filename = display_name(&source);
        let input_format = InputFormat::from_filename(&filename);
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            source,
            filename,
            input_format,
            settings: Arc::new(settings),
            status: JobStatus::Queued,
            phase: JobPhase::Queued,
            progress: 0,
            message: "Queued for processing".to_string(),
            confidence: None,
            result: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Stem used for export filenames.
    pub fn stem(&self) -> String {
        let stem = match self.filename.rsplit_once('.') {
            Some((stem, _)) if !stem.is_empty() => stem,
            _ => self.filename.as_str(),
        };
        if stem.is_empty() {
            "document".to_string()
        } else {
            stem.to_string()
        }
    }
}

fn display_name(source: &JobSource) -> String {
    match source {
        JobSource::File {
            original_filename, ..
        } => original_filename.clone(),
        JobSource::Url { url } => url_filename(url),
    }
}

/// Last non-empty path segment of a URL, ignoring query and fragment.
pub fn url_filename(url: &str) -> String {
    let without_query = url.split(['?', '#']).next().unwrap_or(url);
    let after_scheme = without_query
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(without_query);
    match after_scheme.split_once('/') {
        Some((_, path)) => path
            .rsplit('/')
            .find(|segment| !segment.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| "document".to_string()),
        None => "document".to_string(),
    }
}
