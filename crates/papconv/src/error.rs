use std::path::PathBuf;
use thiserror::Error;

use crate::jobs::JobStatus;

#[derive(Error, Debug)]
pub enum PapconvError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Submission rejected: {0}")]
    Submission(#[from] SubmissionError),

    #[error("Lookup failed: {0}")]
    Lookup(#[from] LookupError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write settings file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },

    #[error("Failed to initialize logging: {0}")]
    Logging(String),
}

/// Reasons a submission is refused before any Job exists.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("No file selected")]
    EmptyFilename,

    #[error("File '{filename}' has no extension")]
    MissingExtension { filename: String },

    #[error("File type '.{extension}' is not allowed")]
    DisallowedType { filename: String, extension: String },

    #[error("File '{filename}' is {size} bytes, exceeding the {limit} byte limit")]
    TooLarge {
        filename: String,
        size: u64,
        limit: u64,
    },

    #[error("File '{filename}' is empty")]
    EmptyUpload { filename: String },

    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Unsupported URL scheme '{scheme}' (expected http or https)")]
    UnsupportedScheme { scheme: String },

    #[error("Invalid settings: {0}")]
    InvalidSettings(String),
}

#[derive(Error, Debug)]
pub enum SubmissionError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Failed to store upload: {0}")]
    Storage(#[from] StorageError),

    #[error("Failed to load base settings: {0}")]
    Settings(#[from] ConfigError),

    #[error("Failed to enqueue job: {0}")]
    Worker(#[from] WorkerError),
}

impl SubmissionError {
    /// Returns the validation failure, if this rejection was one.
    pub fn as_validation(&self) -> Option<&ValidationError> {
        match self {
            SubmissionError::Validation(e) => Some(e),
            _ => None,
        }
    }
}

/// Errors raised by a conversion engine while constructing or running a pipeline.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("Unsupported input: {0}")]
    UnsupportedInput(String),

    #[error("Corrupt document: {0}")]
    Corrupt(String),

    #[error("{0}")]
    Failed(String),

    #[error("Engine panicked: {0}")]
    Panicked(String),
}

/// Why a Job ended in `failed`. Rendered into the Job's `error` field.
#[derive(Error, Debug)]
pub enum ConversionError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("Document timeout of {seconds}s exceeded")]
    Timeout { seconds: u64 },

    #[error("Pipeline construction failed: {0}")]
    PipelineConstruction(String),

    #[error("Failed to prepare source: {0}")]
    Source(StorageError),

    #[error("Downloaded document rejected: {0}")]
    Rejected(ValidationError),

    #[error("Failed to store artifacts: {0}")]
    Artifact(StorageError),
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to remove '{path}': {source}")]
    Remove {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to move '{from}' to '{to}': {source}")]
    MoveFile {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("File already exists: {0}")]
    FileExists(PathBuf),

    #[error("Source file missing: {0}")]
    MissingSource(PathBuf),

    #[error("Download of '{url}' failed: {reason}")]
    Download { url: String, reason: String },

    #[error("Download exceeded the {limit} byte limit")]
    DownloadTooLarge { limit: u64 },
}

/// Errors surfaced by the read side (status, results, artifacts, delete).
#[derive(Error, Debug)]
pub enum LookupError {
    #[error("Job {0} not found")]
    NotFound(String),

    #[error("Job {job_id} is not completed (status: {status})")]
    NotReady { job_id: String, status: JobStatus },

    #[error("Job {job_id} failed: {error}")]
    Failed { job_id: String, error: String },

    #[error("{artifact} not found for job {job_id}")]
    ArtifactNotFound { job_id: String, artifact: String },

    #[error("Job {job_id} is still processing")]
    Busy { job_id: String },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Failed to spawn worker: {0}")]
    SpawnFailed(String),

    #[error("Worker channel closed unexpectedly")]
    ChannelClosed,
}

pub type Result<T> = std::result::Result<T, PapconvError>;
