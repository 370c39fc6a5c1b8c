//! Test harness that runs a full conversion service inside a temp directory.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use papconv::{
    ConversionEngine, ConversionService, Job, JobStatusView, ServiceConfig, SettingsOverride,
    SubmissionSource,
};
use tempfile::TempDir;

/// A running service plus the directories it writes to.
///
/// The temp directory outlives the service: fields drop in declaration order.
pub struct TestHarness {
    pub service: ConversionService,
    pub upload_dir: PathBuf,
    pub output_dir: PathBuf,
    pub database_path: PathBuf,
    temp_dir: TempDir,
}

impl TestHarness {
    /// Service without a history database.
    pub fn new(engine: Arc<dyn ConversionEngine>, workers: usize) -> Self {
        Self::build(engine, workers, false, |_| {})
    }

    /// Service backed by a SQLite history database in the temp directory.
    pub fn with_history(engine: Arc<dyn ConversionEngine>, workers: usize) -> Self {
        Self::build(engine, workers, true, |_| {})
    }

    /// Service without history whose uploads and downloads are capped at `limit` bytes.
    pub fn with_upload_limit(
        engine: Arc<dyn ConversionEngine>,
        workers: usize,
        limit: u64,
    ) -> Self {
        Self::build(engine, workers, false, |config| config.max_upload_bytes = limit)
    }

    fn build(
        engine: Arc<dyn ConversionEngine>,
        workers: usize,
        history: bool,
        configure: impl FnOnce(&mut ServiceConfig),
    ) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let upload_dir = temp_dir.path().join("uploads");
        let output_dir = temp_dir.path().join("output");
        let database_path = temp_dir.path().join("data").join("history.db");

        let mut config =
            ServiceConfig::new(upload_dir.to_string_lossy(), output_dir.to_string_lossy());
        config.worker_count = workers;
        config.database_path = Some(database_path.to_string_lossy().into_owned());
        configure(&mut config);

        let builder = ConversionService::builder(config, engine);
        let builder = if history {
            builder
        } else {
            builder.without_history()
        };
        let service = builder.build().expect("Failed to build service");

        Self {
            service,
            upload_dir,
            output_dir,
            database_path,
            temp_dir,
        }
    }

    pub fn path(&self) -> &std::path::Path {
        self.temp_dir.path()
    }

    /// Submits an in-memory file with default settings.
    pub fn submit(&self, filename: &str, content: &str) -> Job {
        self.submit_with(filename, content, &SettingsOverride::default())
    }

    pub fn submit_with(
        &self,
        filename: &str,
        content: &str,
        overrides: &SettingsOverride,
    ) -> Job {
        self.service
            .submit(
                SubmissionSource::file(filename, content.as_bytes().to_vec()),
                overrides,
            )
            .expect("Failed to submit document")
    }

    /// Polls until the job is completed or failed.
    pub fn wait_terminal(&self, job_id: &str, timeout: Duration) -> JobStatusView {
        let deadline = Instant::now() + timeout;
        loop {
            let view = self
                .service
                .status(job_id)
                .expect("Job vanished while waiting");
            if view.status.is_terminal() {
                return view;
            }
            assert!(
                Instant::now() < deadline,
                "job {} still {:?} after {:?}",
                job_id,
                view.status,
                timeout
            );
            thread::sleep(Duration::from_millis(10));
        }
    }

    /// Polls `condition` until it holds or `timeout` passes.
    pub fn wait_until(&self, timeout: Duration, condition: impl Fn(&Self) -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if condition(self) {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        condition(self)
    }

    pub fn submit_url(&self, url: &str) -> Job {
        self.service
            .submit(SubmissionSource::url(url), &SettingsOverride::default())
            .expect("Failed to submit URL")
    }

    pub fn upload_count(&self) -> usize {
        std::fs::read_dir(&self.upload_dir)
            .map(|entries| entries.count())
            .unwrap_or(0)
    }
}
