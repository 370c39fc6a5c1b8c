pub mod broadcast;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod jobs;
pub mod logging;
pub mod pipeline;
pub mod sanitize;
pub mod service;
pub mod status;
pub mod storage;
pub mod worker;

pub use broadcast::{JobProgressBroadcaster, JobProgressEvent};
pub use config::{
    load_config, ConversionSettings, ExportFormat, InputFormat, ServiceConfig, SettingsOverride,
    SupportedFormats,
};
pub use engine::{ConversionEngine, DocumentPipeline, TextEngine};
pub use error::{
    ConfigError, ConversionError, EngineError, LookupError, PapconvError, Result, StorageError,
    SubmissionError, ValidationError, WorkerError,
};
pub use gateway::{BatchOutcome, Rejection, SubmissionSource};
pub use jobs::{Job, JobPhase, JobResult, JobStatus};
pub use service::{ConversionService, HealthReport, ServiceBuilder};
pub use status::JobStatusView;
