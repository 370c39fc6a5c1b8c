//! Admission of single and batch submissions.
//!
//! Validation happens before anything is stored: a rejected submission never
//! produces a Job, an upload file or a history row.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;

use crate::config::{extension_of, ConversionSettings, SettingsOverride, SettingsStore};
use crate::db::{HistoryEntry, HistoryStore};
use crate::error::{SubmissionError, ValidationError};
use crate::jobs::{url_filename, Job, JobRegistry, JobSource};
use crate::sanitize;
use crate::storage::FileStore;
use crate::worker::JobQueue;

/// A document offered for conversion.
#[derive(Debug, Clone)]
pub enum SubmissionSource {
    File { filename: String, bytes: Vec<u8> },
    Url { url: String },
}

impl SubmissionSource {
    pub fn file(filename: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        SubmissionSource::File {
            filename: filename.into(),
            bytes: bytes.into(),
        }
    }

    pub fn url(url: impl Into<String>) -> Self {
        SubmissionSource::Url { url: url.into() }
    }

    /// Short label for rejections and logs. URLs are redacted.
    pub fn describe(&self) -> String {
        match self {
            SubmissionSource::File { filename, .. } => filename.clone(),
            SubmissionSource::Url { url } => sanitize::redact_url(url),
        }
    }
}

/// One batch item that was refused before admission.
#[derive(Debug, Clone, Serialize)]
pub struct Rejection {
    /// Position of the item in the submitted batch.
    pub index: usize,
    pub source: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchOutcome {
    pub accepted: Vec<Job>,
    pub rejected: Vec<Rejection>,
}

/// Upload limits applied before admission.
#[derive(Debug, Clone)]
pub struct SubmissionLimits {
    pub max_upload_bytes: u64,
    pub allowed_extensions: HashSet<String>,
}

impl SubmissionLimits {
    pub fn new(max_upload_bytes: u64, allowed_extensions: &[String]) -> Self {
        Self {
            max_upload_bytes,
            allowed_extensions: allowed_extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_lowercase())
                .collect(),
        }
    }

    /// Checks `filename` against the allow-list and returns its lowercase
    /// extension.
    pub fn check_filename(&self, filename: &str) -> Result<String, ValidationError> {
        let extension = extension_of(filename).ok_or_else(|| ValidationError::MissingExtension {
            filename: filename.to_string(),
        })?;
        self.check_extension(filename, &extension)?;
        Ok(extension)
    }

    fn check_extension(&self, filename: &str, extension: &str) -> Result<(), ValidationError> {
        if self.allowed_extensions.contains(extension) {
            Ok(())
        } else {
            Err(ValidationError::DisallowedType {
                filename: filename.to_string(),
                extension: extension.to_string(),
            })
        }
    }
}

pub struct SubmissionGateway {
    limits: SubmissionLimits,
    registry: Arc<JobRegistry>,
    queue: JobQueue,
    files: Arc<dyn FileStore>,
    settings: Arc<dyn SettingsStore>,
    history: Arc<dyn HistoryStore>,
}

impl SubmissionGateway {
    pub fn new(
        limits: SubmissionLimits,
        registry: Arc<JobRegistry>,
        queue: JobQueue,
        files: Arc<dyn FileStore>,
        settings: Arc<dyn SettingsStore>,
        history: Arc<dyn HistoryStore>,
    ) -> Self {
        Self {
            limits,
            registry,
            queue,
            files,
            settings,
            history,
        }
    }

    /// Validates, stores and enqueues one document. Returns as soon as the
    /// job is queued.
    pub fn submit(
        &self,
        source: SubmissionSource,
        overrides: &SettingsOverride,
    ) -> Result<Job, SubmissionError> {
        self.validate(&source)?;
        let settings = self.resolve_settings(overrides)?;
        self.admit(source, settings)
    }

    /// Applies `submit` per item. Item failures become rejections and never
    /// affect their siblings; only an invalid shared override fails the batch.
    pub fn submit_batch(
        &self,
        sources: Vec<SubmissionSource>,
        overrides: &SettingsOverride,
    ) -> Result<BatchOutcome, SubmissionError> {
        let settings = self.resolve_settings(overrides)?;
        let mut outcome = BatchOutcome {
            accepted: Vec::new(),
            rejected: Vec::new(),
        };

        for (index, source) in sources.into_iter().enumerate() {
            let label = source.describe();
            let admitted = self
                .validate(&source)
                .map_err(SubmissionError::from)
                .and_then(|()| self.admit(source, settings.clone()));

            match admitted {
                Ok(job) => outcome.accepted.push(job),
                Err(e) => {
                    log::info!("Rejected batch item {} ({}): {}", index, label, e);
                    outcome.rejected.push(Rejection {
                        index,
                        source: label,
                        reason: e.to_string(),
                    });
                }
            }
        }

        log::info!(
            "Batch submission: {} accepted, {} rejected",
            outcome.accepted.len(),
            outcome.rejected.len()
        );
        Ok(outcome)
    }

    /// Base settings from the store with `overrides` merged on top.
    pub fn resolve_settings(
        &self,
        overrides: &SettingsOverride,
    ) -> Result<ConversionSettings, SubmissionError> {
        let settings = self.settings.load()?.merged(overrides);
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self, source: &SubmissionSource) -> Result<(), ValidationError> {
        match source {
            SubmissionSource::File { filename, bytes } => {
                let name = display_name(filename);
                if name.trim().is_empty() {
                    return Err(ValidationError::EmptyFilename);
                }
                self.limits.check_filename(name)?;

                let size = bytes.len() as u64;
                if size == 0 {
                    return Err(ValidationError::EmptyUpload {
                        filename: name.to_string(),
                    });
                }
                if size > self.limits.max_upload_bytes {
                    return Err(ValidationError::TooLarge {
                        filename: name.to_string(),
                        size,
                        limit: self.limits.max_upload_bytes,
                    });
                }
                Ok(())
            }
            SubmissionSource::Url { url } => {
                let invalid = |reason: String| ValidationError::InvalidUrl {
                    url: sanitize::redact_url(url),
                    reason,
                };
                let parsed = reqwest::Url::parse(url.trim()).map_err(|e| invalid(e.to_string()))?;
                if !matches!(parsed.scheme(), "http" | "https") {
                    return Err(ValidationError::UnsupportedScheme {
                        scheme: parsed.scheme().to_string(),
                    });
                }
                if parsed.host_str().map(str::is_empty).unwrap_or(true) {
                    return Err(invalid("missing host".to_string()));
                }

                // Extensionless URLs are typed from the response later.
                let name = url_filename(url);
                match extension_of(&name) {
                    Some(extension) => self.limits.check_extension(&name, &extension),
                    None => Ok(()),
                }
            }
        }
    }

    fn admit(
        &self,
        source: SubmissionSource,
        settings: ConversionSettings,
    ) -> Result<Job, SubmissionError> {
        let job_source = match source {
            SubmissionSource::File { filename, bytes } => {
                let stored = self.files.save_upload(&filename, &bytes)?;
                JobSource::File {
                    path: stored.path,
                    original_filename: display_name(&filename).to_string(),
                    size: stored.size,
                }
            }
            SubmissionSource::Url { url } => JobSource::Url {
                url: url.trim().to_string(),
            },
        };

        let job = Job::new(job_source, settings);
        let job_id = job.id.clone();

        match HistoryEntry::from_job(&job) {
            Ok(entry) => {
                if let Err(e) = self.history.record(&entry) {
                    log::warn!("Failed to record history for job {}: {}", job_id, e);
                }
            }
            Err(e) => log::warn!("Failed to build history entry for job {}: {}", job_id, e),
        }

        let position = self.registry.insert(job.clone());
        if let Err(e) = self.queue.enqueue(&job_id) {
            log::error!("Failed to enqueue job {}: {}", job_id, e);
            if let Ok(removed) = self.registry.remove(&job_id) {
                self.discard_upload(&removed);
            }
            return Err(e.into());
        }

        log::info!(
            "Accepted job {} ({}) at queue position {}",
            job_id,
            job.filename,
            position
        );
        Ok(self.registry.get(&job_id).unwrap_or(job))
    }

    fn discard_upload(&self, job: &Job) {
        if let JobSource::File { path, .. } = &job.source {
            if let Err(e) = self.files.remove(path) {
                log::warn!("Failed to remove upload for job {}: {}", job.id, e);
            }
        }
    }
}

/// Client filename without any directory part.
fn display_name(filename: &str) -> &str {
    filename.rsplit(['/', '\\']).next().unwrap_or(filename)
}
