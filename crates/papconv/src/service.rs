//! Orchestration context owning the registry, pool, pipeline cache and stores.
//!
//! Built once at startup and shared by reference; nothing here is global.

use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::broadcast;

use crate::broadcast::{JobProgressBroadcaster, JobProgressEvent};
use crate::config::{
    ConversionSettings, ExportFormat, JsonSettingsStore, MemorySettingsStore, ServiceConfig,
    SettingsOverride, SettingsStore, SupportedFormats,
};
use crate::db::{
    Database, HistoryEntry, HistoryFilter, HistoryStats, HistoryStore, NoopHistoryStore,
    SqliteHistoryStore,
};
use crate::engine::ConversionEngine;
use crate::error::{LookupError, PapconvError, SubmissionError};
use crate::gateway::{BatchOutcome, SubmissionGateway, SubmissionLimits, SubmissionSource};
use crate::jobs::{Job, JobRegistry, JobResult, JobSource, JobStatus};
use crate::pipeline::PipelineCache;
use crate::status::{JobStatusView, StatusReporter};
use crate::storage::{
    ArtifactFile, ArtifactStore, ChunkRecord, FileStore, ImageRecord, TableRecord, UploadStore,
};
use crate::worker::{ConversionExecutor, JobQueue, WorkerPool};

/// Snapshot of service load for health checks.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub engine: String,
    pub workers: usize,
    pub queued: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub cached_pipelines: u64,
}

/// Collaborators that default from [`ServiceConfig`] unless supplied.
pub struct ServiceBuilder {
    config: ServiceConfig,
    engine: Arc<dyn ConversionEngine>,
    files: Option<Arc<dyn FileStore>>,
    settings: Option<Arc<dyn SettingsStore>>,
    history: Option<Arc<dyn HistoryStore>>,
}

impl ServiceBuilder {
    pub fn file_store(mut self, files: Arc<dyn FileStore>) -> Self {
        self.files = Some(files);
        self
    }

    pub fn settings_store(mut self, settings: Arc<dyn SettingsStore>) -> Self {
        self.settings = Some(settings);
        self
    }

    pub fn history_store(mut self, history: Arc<dyn HistoryStore>) -> Self {
        self.history = Some(history);
        self
    }

    /// Skips the history database entirely.
    pub fn without_history(self) -> Self {
        self.history_store(Arc::new(NoopHistoryStore))
    }

    pub fn build(self) -> Result<ConversionService, PapconvError> {
        let config = self.config;

        let files = match self.files {
            Some(files) => files,
            None => Arc::new(UploadStore::new(&config.upload_directory)) as Arc<dyn FileStore>,
        };
        let settings = match self.settings {
            Some(settings) => settings,
            None => match &config.settings_file {
                Some(path) => Arc::new(JsonSettingsStore::new(path)) as Arc<dyn SettingsStore>,
                None => Arc::new(MemorySettingsStore::default()),
            },
        };
        let history = match self.history {
            Some(history) => history,
            None => {
                let db = Database::open(&config.database_path())?;
                Arc::new(SqliteHistoryStore::new(db)) as Arc<dyn HistoryStore>
            }
        };

        let registry = Arc::new(JobRegistry::new(JobProgressBroadcaster::new(
            config.progress_channel_capacity,
        )));
        let pipelines = Arc::new(PipelineCache::new(
            Arc::clone(&self.engine),
            config.pipeline_cache_capacity,
        ));
        let artifacts = Arc::new(ArtifactStore::new(&config.output_directory));

        let limits = SubmissionLimits::new(config.max_upload_bytes, &config.allowed_extensions);
        let executor = ConversionExecutor::new(
            Arc::clone(&registry),
            Arc::clone(&pipelines),
            Arc::clone(&artifacts),
            Arc::clone(&files),
            Arc::clone(&history),
            limits.clone(),
        );
        let pool = WorkerPool::new(Arc::clone(&registry), Arc::new(executor), config.worker_count)?;
        let queue = pool.queue();

        let gateway = SubmissionGateway::new(
            limits,
            Arc::clone(&registry),
            queue.clone(),
            Arc::clone(&files),
            Arc::clone(&settings),
            Arc::clone(&history),
        );
        let status = StatusReporter::new(Arc::clone(&registry), Arc::clone(&artifacts));

        log::info!(
            "Conversion service ready: engine '{}', {} workers, output in {}",
            self.engine.name(),
            config.worker_count,
            config.output_directory
        );

        Ok(ConversionService {
            config,
            engine: self.engine,
            registry,
            pipelines,
            artifacts,
            files,
            settings,
            history,
            gateway,
            status,
            queue,
            pool: Mutex::new(Some(pool)),
        })
    }
}

pub struct ConversionService {
    config: ServiceConfig,
    engine: Arc<dyn ConversionEngine>,
    registry: Arc<JobRegistry>,
    pipelines: Arc<PipelineCache>,
    artifacts: Arc<ArtifactStore>,
    files: Arc<dyn FileStore>,
    settings: Arc<dyn SettingsStore>,
    history: Arc<dyn HistoryStore>,
    gateway: SubmissionGateway,
    status: StatusReporter,
    queue: JobQueue,
    pool: Mutex<Option<WorkerPool>>,
}

impl ConversionService {
    pub fn builder(config: ServiceConfig, engine: Arc<dyn ConversionEngine>) -> ServiceBuilder {
        ServiceBuilder {
            config,
            engine,
            files: None,
            settings: None,
            history: None,
        }
    }

    /// Builds the service with every collaborator derived from `config`.
    pub fn new(
        config: ServiceConfig,
        engine: Arc<dyn ConversionEngine>,
    ) -> Result<Self, PapconvError> {
        Self::builder(config, engine).build()
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    pub fn pipelines(&self) -> &Arc<PipelineCache> {
        &self.pipelines
    }

    // Submission

    pub fn submit(
        &self,
        source: SubmissionSource,
        overrides: &SettingsOverride,
    ) -> Result<Job, SubmissionError> {
        self.gateway.submit(source, overrides)
    }

    pub fn submit_batch(
        &self,
        sources: Vec<SubmissionSource>,
        overrides: &SettingsOverride,
    ) -> Result<BatchOutcome, SubmissionError> {
        self.gateway.submit_batch(sources, overrides)
    }

    // Status and artifacts

    pub fn status(&self, job_id: &str) -> Result<JobStatusView, LookupError> {
        self.status.status(job_id)
    }

    pub fn jobs(&self) -> Vec<JobStatusView> {
        self.status.jobs()
    }

    pub fn result(&self, job_id: &str) -> Result<JobResult, LookupError> {
        self.status.result(job_id)
    }

    pub fn list_images(&self, job_id: &str) -> Result<Vec<ImageRecord>, LookupError> {
        self.status.list_images(job_id)
    }

    pub fn get_image(&self, job_id: &str, image_id: usize) -> Result<ArtifactFile, LookupError> {
        self.status.get_image(job_id, image_id)
    }

    pub fn list_tables(&self, job_id: &str) -> Result<Vec<TableRecord>, LookupError> {
        self.status.list_tables(job_id)
    }

    pub fn get_table_csv(
        &self,
        job_id: &str,
        table_id: usize,
    ) -> Result<ArtifactFile, LookupError> {
        self.status.get_table_csv(job_id, table_id)
    }

    pub fn get_table_image(
        &self,
        job_id: &str,
        table_id: usize,
    ) -> Result<ArtifactFile, LookupError> {
        self.status.get_table_image(job_id, table_id)
    }

    pub fn list_chunks(&self, job_id: &str) -> Result<Vec<ChunkRecord>, LookupError> {
        self.status.list_chunks(job_id)
    }

    pub fn get_export(
        &self,
        job_id: &str,
        format: ExportFormat,
    ) -> Result<ArtifactFile, LookupError> {
        self.status.get_export(job_id, format)
    }

    pub fn get_export_content(
        &self,
        job_id: &str,
        format: ExportFormat,
    ) -> Result<String, LookupError> {
        self.status.get_export_content(job_id, format)
    }

    /// Removes a terminal or still-queued job with its artifacts and upload.
    /// Jobs owned by a worker are refused with [`LookupError::Busy`].
    pub fn delete(&self, job_id: &str) -> Result<(), LookupError> {
        let job = self.registry.remove(job_id)?;

        self.artifacts.delete(job_id)?;
        if let JobSource::File { path, .. } = &job.source {
            if let Err(e) = self.files.remove(path) {
                log::warn!("Failed to remove upload for job {}: {}", job_id, e);
            }
        }

        log::info!("Deleted job {} ({})", job_id, job.filename);
        Ok(())
    }

    // Progress

    pub fn subscribe(&self) -> broadcast::Receiver<JobProgressEvent> {
        self.registry.broadcaster().subscribe()
    }

    /// Current state of a job as a progress event, or `None` once it is gone.
    pub fn progress_snapshot(&self, job_id: &str) -> Option<JobProgressEvent> {
        self.registry.get(job_id).map(|job| JobProgressEvent::from_job(&job))
    }

    // Settings

    pub fn settings(&self) -> Result<ConversionSettings, PapconvError> {
        Ok(self.settings.load()?)
    }

    /// Merges `overrides` over the stored settings and persists the result.
    /// Jobs already submitted keep their snapshot.
    pub fn update_settings(
        &self,
        overrides: &SettingsOverride,
    ) -> Result<ConversionSettings, SubmissionError> {
        let updated = self.gateway.resolve_settings(overrides)?;
        self.settings.save(&updated)?;
        log::info!("Conversion settings updated");
        Ok(updated)
    }

    pub fn reset_settings(&self) -> Result<ConversionSettings, PapconvError> {
        let defaults = self.settings.reset()?;
        log::info!("Conversion settings reset to defaults");
        Ok(defaults)
    }

    // History

    pub fn history(
        &self,
        filter: &HistoryFilter,
    ) -> Result<(Vec<HistoryEntry>, u64), PapconvError> {
        Ok(self.history.list(filter)?)
    }

    pub fn history_entry(&self, job_id: &str) -> Result<Option<HistoryEntry>, PapconvError> {
        Ok(self.history.get(job_id)?)
    }

    pub fn history_stats(&self) -> Result<HistoryStats, PapconvError> {
        Ok(self.history.stats()?)
    }

    /// Removes a history row together with the job's outputs. A job still in
    /// the registry is deleted as by [`delete`](Self::delete), so a running
    /// job is refused with [`LookupError::Busy`].
    pub fn delete_history_entry(&self, job_id: &str) -> Result<(), PapconvError> {
        let live = match self.delete(job_id) {
            Ok(()) => true,
            Err(LookupError::NotFound(_)) => false,
            Err(e) => return Err(e.into()),
        };
        let had_outputs = !live && self.artifacts.delete(job_id)?;

        let removed = self.history.delete(job_id)?;
        if !(live || had_outputs || removed) {
            return Err(LookupError::NotFound(job_id.to_string()).into());
        }
        log::info!("Deleted history entry {}", job_id);
        Ok(())
    }

    // Formats

    /// Input formats accepted by this service and every export format.
    pub fn formats(&self) -> SupportedFormats {
        SupportedFormats::new(&self.config.allowed_extensions)
    }

    // Lifecycle

    pub fn health(&self) -> HealthReport {
        HealthReport {
            engine: self.engine.name().to_string(),
            workers: self.config.worker_count,
            queued: self.registry.count_by_status(JobStatus::Queued),
            processing: self.registry.count_by_status(JobStatus::Processing),
            completed: self.registry.count_by_status(JobStatus::Completed),
            failed: self.registry.count_by_status(JobStatus::Failed),
            cached_pipelines: self.pipelines.len(),
        }
    }

    /// Jobs waiting in the admission queue, including ones deleted while queued.
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Stops dispatching, lets running conversions finish and joins all
    /// threads. Later calls are no-ops.
    pub fn shutdown(&self) {
        let pool = self
            .pool
            .lock()
            .unwrap_or_else(|poisoned| {
                log::warn!("Worker pool lock was poisoned, recovering");
                poisoned.into_inner()
            })
            .take();

        if let Some(pool) = pool {
            pool.shutdown();
            pool.wait();
        }
    }
}

impl Drop for ConversionService {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::settings::OcrOverride;
    use crate::engine::TextEngine;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    fn service(temp: &TempDir) -> ConversionService {
        let config = ServiceConfig::new(
            temp.path().join("uploads").to_string_lossy(),
            temp.path().join("output").to_string_lossy(),
        );
        ConversionService::builder(config, Arc::new(TextEngine::new()))
            .without_history()
            .build()
            .unwrap()
    }

    fn wait_terminal(service: &ConversionService, id: &str) -> JobStatusView {
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            let view = service.status(id).unwrap();
            if view.status.is_terminal() {
                return view;
            }
            assert!(Instant::now() < deadline, "job {} did not finish", id);
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn test_submit_convert_delete() {
        let temp = TempDir::new().unwrap();
        let service = service(&temp);

        let job = service
            .submit(
                SubmissionSource::file("guide.md", b"# Guide\n\nRead me.".to_vec()),
                &SettingsOverride::default(),
            )
            .unwrap();
        let view = wait_terminal(&service, &job.id);
        assert_eq!(view.status, JobStatus::Completed, "{:?}", view.error);

        let md = service
            .get_export_content(&job.id, ExportFormat::Markdown)
            .unwrap();
        assert!(md.contains("Guide"));

        service.delete(&job.id).unwrap();
        assert!(matches!(service.status(&job.id), Err(LookupError::NotFound(_))));
        assert!(matches!(
            service.get_export(&job.id, ExportFormat::Markdown),
            Err(LookupError::NotFound(_))
        ));
        assert!(!temp.path().join("output").join(&job.id).exists());
        assert!(matches!(service.delete(&job.id), Err(LookupError::NotFound(_))));
    }

    #[test]
    fn test_settings_update_does_not_touch_submitted_jobs() {
        let temp = TempDir::new().unwrap();
        let service = service(&temp);

        let before = service
            .submit(
                SubmissionSource::file("a.txt", b"alpha".to_vec()),
                &SettingsOverride::default(),
            )
            .unwrap();

        let updated = service
            .update_settings(&SettingsOverride {
                ocr: Some(OcrOverride {
                    language: Some("fr".to_string()),
                    ..Default::default()
                }),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(updated.ocr.language, "fr");
        assert_eq!(service.settings().unwrap().ocr.language, "fr");

        let job = service.registry().get(&before.id).unwrap();
        assert_eq!(job.settings.ocr.language, "en");

        assert_eq!(
            service.reset_settings().unwrap(),
            ConversionSettings::default()
        );
    }

    fn service_with_history(temp: &TempDir) -> ConversionService {
        let config = ServiceConfig::new(
            temp.path().join("uploads").to_string_lossy(),
            temp.path().join("output").to_string_lossy(),
        );
        let history = SqliteHistoryStore::new(Database::open_in_memory().unwrap());
        ConversionService::builder(config, Arc::new(TextEngine::new()))
            .history_store(Arc::new(history))
            .build()
            .unwrap()
    }

    fn submit_and_finish(service: &ConversionService, name: &str) -> String {
        let job = service
            .submit(
                SubmissionSource::file(name, b"# Doc\n\nbody".to_vec()),
                &SettingsOverride::default(),
            )
            .unwrap();
        wait_terminal(service, &job.id);
        job.id
    }

    #[test]
    fn test_delete_history_entry_of_live_job() {
        let temp = TempDir::new().unwrap();
        let service = service_with_history(&temp);
        let id = submit_and_finish(&service, "live.md");
        assert!(temp.path().join("output").join(&id).exists());

        service.delete_history_entry(&id).unwrap();
        assert!(service.history_entry(&id).unwrap().is_none());
        assert!(matches!(service.status(&id), Err(LookupError::NotFound(_))));
        assert!(!temp.path().join("output").join(&id).exists());

        assert!(matches!(
            service.delete_history_entry(&id),
            Err(PapconvError::Lookup(LookupError::NotFound(_)))
        ));
    }

    #[test]
    fn test_delete_history_entry_after_job_deleted() {
        let temp = TempDir::new().unwrap();
        let service = service_with_history(&temp);
        let id = submit_and_finish(&service, "gone.md");

        service.delete(&id).unwrap();
        let entry = service.history_entry(&id).unwrap().expect("history kept");
        assert_eq!(entry.status, "completed");
        assert_eq!(service.history_stats().unwrap().completed, 1);

        service.delete_history_entry(&id).unwrap();
        assert!(service.history_entry(&id).unwrap().is_none());
        assert_eq!(service.history_stats().unwrap().total, 0);
    }

    #[test]
    fn test_formats_follow_allow_list() {
        let temp = TempDir::new().unwrap();
        let service = service(&temp);
        let formats = service.formats();

        assert_eq!(formats.output_formats.len(), ExportFormat::ALL.len());
        let md = formats
            .input_formats
            .iter()
            .find(|f| f.id == crate::config::InputFormat::Md)
            .expect("markdown accepted");
        assert_eq!(md.extensions, vec![".md", ".markdown"]);
    }

    #[test]
    fn test_health_and_shutdown() {
        let temp = TempDir::new().unwrap();
        let service = service(&temp);
        let health = service.health();
        assert_eq!(health.engine, "text");
        assert_eq!(health.workers, 2);
        assert_eq!(health.queued, 0);

        service.shutdown();
        service.shutdown();
        let err = service
            .submit(
                SubmissionSource::file("late.md", b"x".to_vec()),
                &SettingsOverride::default(),
            )
            .unwrap_err();
        assert!(matches!(err, SubmissionError::Worker(_)));
    }
}
