use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use crossbeam_channel::{bounded, RecvTimeoutError};
use tracing::{debug, info, info_span, warn};

use crate::config::{ConversionSettings, ExportFormat, InputFormat};
use crate::db::{HistoryStore, HistoryUpdate};
use crate::engine::{ConversionOutput, ConvertRequest, EngineProgress, EngineStage, PipelineHandle};
use crate::error::{ConversionError, EngineError, StorageError};
use crate::gateway::SubmissionLimits;
use crate::jobs::{Job, JobPhase, JobRegistry, JobResult, JobSource, JobStatus};
use crate::pipeline::PipelineCache;
use crate::sanitize;
use crate::storage::{ArtifactStore, FileStore};

use super::pool::JobHandler;

/// Characters of the Markdown (or text) export kept in the result.
pub const PREVIEW_CHARS: usize = 5000;

/// Drives one job from `processing` to a terminal state.
pub struct ConversionExecutor {
    registry: Arc<JobRegistry>,
    pipelines: Arc<PipelineCache>,
    artifacts: Arc<ArtifactStore>,
    files: Arc<dyn FileStore>,
    history: Arc<dyn HistoryStore>,
    limits: SubmissionLimits,
}

struct Converted {
    result: JobResult,
    confidence: Option<f64>,
    output_path: PathBuf,
    message: &'static str,
}

impl ConversionExecutor {
    pub fn new(
        registry: Arc<JobRegistry>,
        pipelines: Arc<PipelineCache>,
        artifacts: Arc<ArtifactStore>,
        files: Arc<dyn FileStore>,
        history: Arc<dyn HistoryStore>,
        limits: SubmissionLimits,
    ) -> Self {
        Self {
            registry,
            pipelines,
            artifacts,
            files,
            history,
            limits,
        }
    }

    /// Runs the job and records the outcome. Never panics on engine failure.
    pub fn execute(&self, job: Job) {
        let source = match &job.source {
            JobSource::File { path, .. } => sanitize::redact_path(path),
            JobSource::Url { url } => sanitize::redact_url(url),
        };
        let _job_span = info_span!(
            "conversion",
            job_id = %job.id,
            source = %source,
            input_format = job.input_format.map(|f| f.as_str()).unwrap_or("unknown"),
        )
        .entered();

        let started = Instant::now();
        self.record_history(
            &job.id,
            HistoryUpdate {
                status: Some(JobStatus::Processing.as_str().to_string()),
                ..Default::default()
            },
        );

        match self.run(&job) {
            Ok(converted) => {
                info!(
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    pages = converted.result.page_count,
                    "Conversion completed"
                );
                self.record_history(
                    &job.id,
                    HistoryUpdate {
                        status: Some(JobStatus::Completed.as_str().to_string()),
                        confidence: converted.confidence,
                        completed_at: Some(Utc::now()),
                        output_path: Some(converted.output_path.to_string_lossy().into_owned()),
                        page_count: Some(converted.result.page_count as i64),
                        ..Default::default()
                    },
                );
                self.registry.complete(
                    &job.id,
                    converted.result,
                    converted.confidence,
                    converted.message,
                );
            }
            Err(e) => {
                let error = e.to_string();
                warn!(error = %error, "Conversion failed");
                self.record_history(
                    &job.id,
                    HistoryUpdate {
                        status: Some(JobStatus::Failed.as_str().to_string()),
                        completed_at: Some(Utc::now()),
                        error_message: Some(error.clone()),
                        ..Default::default()
                    },
                );
                self.registry.fail(&job.id, &error);
            }
        }
    }

    fn run(&self, job: &Job) -> Result<Converted, ConversionError> {
        let settings = Arc::clone(&job.settings);

        // Step 1: Materialize the source document
        let (source_path, downloaded) = {
            let _step = info_span!("materialize_source").entered();
            self.progress(job, JobPhase::Validating, 5);
            let materialized = self.materialize(job)?;
            self.progress(job, JobPhase::Validating, 10);
            materialized
        };

        // Step 2: Resolve the pipeline
        let pipeline = {
            let _step = info_span!("resolve_pipeline").entered();
            self.progress(job, JobPhase::LoadingPipeline, 20);
            self.pipelines
                .resolve(&settings)
                .map_err(|e| ConversionError::PipelineConstruction(e.to_string()))?
        };

        // Step 3: Convert
        let converted = {
            let _step = info_span!("convert").entered();
            self.progress(job, JobPhase::Analyzing, 30);
            let request = ConvertRequest::from_settings(&source_path, &settings);
            let progress = Arc::new(RegistryProgress {
                registry: Arc::clone(&self.registry),
                job_id: job.id.clone(),
            });
            run_engine(
                pipeline,
                request,
                progress,
                settings.performance.document_timeout,
            )
        };

        if downloaded {
            if let Err(e) = self.files.remove(&source_path) {
                debug!(error = %e, "Failed to remove downloaded source");
            }
        }
        let output = converted?;

        // Step 4: Persist artifacts
        let output_path = {
            let _step = info_span!("persist_artifacts").entered();
            self.progress(job, JobPhase::GeneratingExports, 70);
            self.persist(job, &settings, &output)
                .map_err(ConversionError::Artifact)?
        };

        // Step 5: Finalize
        let _step = info_span!("finalize").entered();
        self.progress(job, JobPhase::Finalizing, 90);

        let preview = [ExportFormat::Markdown, ExportFormat::Text]
            .into_iter()
            .filter(|format| settings.output.formats.contains(format))
            .find_map(|format| output.export_text(format))
            .map(|text| text.chars().take(PREVIEW_CHARS).collect())
            .unwrap_or_default();

        let message = if output.warnings.is_empty() {
            "Conversion completed successfully"
        } else {
            "Conversion completed with some warnings"
        };

        let artifacts_written = |count: usize, enabled: bool| if enabled { count } else { 0 };
        let result = JobResult {
            formats_available: self.artifacts.formats(&job.id),
            default_format: settings.output.default_format,
            page_count: output.page_count,
            images_count: artifacts_written(output.images.len(), settings.images.extract),
            tables_count: artifacts_written(output.tables.len(), settings.tables.enabled),
            chunks_count: artifacts_written(output.chunks.len(), settings.chunking.enabled),
            preview,
            warnings: output.warnings.clone(),
        };

        Ok(Converted {
            result,
            confidence: output.confidence,
            output_path,
            message,
        })
    }

    /// Returns the local path to convert and whether it was downloaded for this job.
    fn materialize(&self, job: &Job) -> Result<(PathBuf, bool), ConversionError> {
        match &job.source {
            JobSource::File { path, .. } => {
                if !path.exists() {
                    return Err(ConversionError::Source(StorageError::MissingSource(path.clone())));
                }
                Ok((path.clone(), false))
            }
            JobSource::Url { url } => {
                let stored = self
                    .files
                    .fetch_url(url, self.limits.max_upload_bytes)
                    .map_err(ConversionError::Source)?;
                debug!(
                    size = stored.size,
                    filename = %stored.filename,
                    "Downloaded source document"
                );

                // Only typed now when the URL path had no extension.
                let extension = match self.limits.check_filename(&stored.filename) {
                    Ok(extension) => extension,
                    Err(e) => {
                        if let Err(remove_error) = self.files.remove(&stored.path) {
                            debug!(error = %remove_error, "Failed to remove rejected download");
                        }
                        return Err(ConversionError::Rejected(e));
                    }
                };
                if let Some(format) = InputFormat::from_extension(&extension) {
                    self.registry.set_input_format(&job.id, format);
                    self.record_history(
                        &job.id,
                        HistoryUpdate {
                            input_format: Some(format.as_str().to_string()),
                            file_size: Some(stored.size as i64),
                            ..Default::default()
                        },
                    );
                }
                Ok((stored.path, true))
            }
        }
    }

    fn persist(
        &self,
        job: &Job,
        settings: &ConversionSettings,
        output: &ConversionOutput,
    ) -> Result<PathBuf, StorageError> {
        let dir = self.artifacts.create_namespace(&job.id, &job.stem())?;

        let exports: Vec<_> = output
            .exports
            .iter()
            .filter(|(format, _)| settings.output.formats.contains(format))
            .collect();
        let total = exports.len().max(1);
        for (i, (format, bytes)) in exports.into_iter().enumerate() {
            self.artifacts.save_export(&job.id, *format, bytes)?;
            self.progress(job, JobPhase::GeneratingExports, band(70, 85, i + 1, total));
        }

        if settings.images.extract {
            for image in &output.images {
                self.artifacts.save_image(&job.id, image)?;
            }
        }
        self.progress(job, JobPhase::GeneratingExports, 87);

        if settings.tables.enabled {
            for table in &output.tables {
                self.artifacts.save_table(&job.id, table)?;
            }
        }

        if settings.chunking.enabled && !output.chunks.is_empty() {
            self.artifacts.save_chunks(&job.id, &output.chunks)?;
        }
        self.progress(job, JobPhase::GeneratingExports, 89);

        Ok(dir)
    }

    fn progress(&self, job: &Job, phase: JobPhase, progress: u8) {
        self.registry
            .update_progress(&job.id, phase, progress, &phase.to_string());
    }

    fn record_history(&self, job_id: &str, update: HistoryUpdate) {
        if let Err(e) = self.history.update(job_id, &update) {
            warn!(error = %e, "Failed to update conversion history");
        }
    }
}

impl JobHandler for ConversionExecutor {
    fn handle(&self, job: Job) {
        self.execute(job);
    }
}

/// Maps engine sub-step progress onto the job's analyzing/extracting bands.
struct RegistryProgress {
    registry: Arc<JobRegistry>,
    job_id: String,
}

impl EngineProgress for RegistryProgress {
    fn report(&self, stage: EngineStage, fraction: f32) {
        let fraction = fraction.clamp(0.0, 1.0);
        let (phase, low, high) = match stage {
            EngineStage::Analyzing => (JobPhase::Analyzing, 30.0, 50.0),
            EngineStage::Extracting => (JobPhase::Extracting, 50.0, 70.0),
        };
        let progress = (low + (high - low) * fraction).round() as u8;
        // Ignored once the job is terminal, e.g. after a timeout.
        self.registry
            .update_progress(&self.job_id, phase, progress, &phase.to_string());
    }
}

fn band(low: u8, high: u8, step: usize, total: usize) -> u8 {
    let span = (high - low) as usize;
    low + (span * step / total.max(1)).min(span) as u8
}

/// Calls the engine, catching panics, optionally bounded by `timeout_secs`.
///
/// With a timeout the call runs on a helper thread that is abandoned when the
/// deadline passes; engine calls cannot be interrupted.
fn run_engine(
    pipeline: PipelineHandle,
    request: ConvertRequest,
    progress: Arc<RegistryProgress>,
    timeout_secs: Option<u64>,
) -> Result<ConversionOutput, ConversionError> {
    let call = move || {
        panic::catch_unwind(AssertUnwindSafe(|| {
            pipeline.convert(&request, progress.as_ref())
        }))
        .unwrap_or_else(|payload| Err(EngineError::Panicked(panic_message(payload.as_ref()))))
    };

    let Some(seconds) = timeout_secs else {
        return call().map_err(ConversionError::Engine);
    };

    let (tx, rx) = bounded(1);
    thread::Builder::new()
        .name("papconv-engine".to_string())
        .spawn(move || {
            // The receiver is gone if the deadline already passed.
            let _ = tx.send(call());
        })
        .map_err(|e| {
            ConversionError::Engine(EngineError::Failed(format!(
                "failed to start engine thread: {}",
                e
            )))
        })?;

    match rx.recv_timeout(Duration::from_secs(seconds)) {
        Ok(result) => result.map_err(ConversionError::Engine),
        Err(RecvTimeoutError::Timeout) => Err(ConversionError::Timeout { seconds }),
        Err(RecvTimeoutError::Disconnected) => Err(ConversionError::Engine(EngineError::Panicked(
            "engine thread exited without a result".to_string(),
        ))),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
