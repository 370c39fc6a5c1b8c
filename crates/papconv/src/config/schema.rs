use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Service-level configuration, loaded once at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub version: String,
    pub upload_directory: String,
    pub output_directory: String,
    #[serde(default)]
    pub database_path: Option<String>,
    /// Persisted base conversion settings. Defaults apply when unset.
    #[serde(default)]
    pub settings_file: Option<String>,
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,
    #[serde(default = "default_allowed_extensions")]
    pub allowed_extensions: Vec<String>,
    #[serde(default = "default_pipeline_cache_capacity")]
    pub pipeline_cache_capacity: u64,
    #[serde(default = "default_progress_channel_capacity")]
    pub progress_channel_capacity: usize,
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_worker_count() -> usize {
    2
}

fn default_max_upload_bytes() -> u64 {
    100 * 1024 * 1024
}

pub fn default_allowed_extensions() -> Vec<String> {
    [
        "pdf", "docx", "pptx", "xlsx", "html", "htm", "md", "markdown", "csv", "png", "jpg", "jpeg",
        "tiff", "tif", "gif", "webp", "bmp", "wav", "mp3", "vtt", "xml", "asciidoc", "adoc", "json",
        "txt",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_pipeline_cache_capacity() -> u64 {
    8
}

fn default_progress_channel_capacity() -> usize {
    256
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl ServiceConfig {
    pub fn new(upload_directory: impl Into<String>, output_directory: impl Into<String>) -> Self {
        Self {
            version: "1.0".to_string(),
            upload_directory: upload_directory.into(),
            output_directory: output_directory.into(),
            database_path: None,
            settings_file: None,
            worker_count: default_worker_count(),
            max_upload_bytes: default_max_upload_bytes(),
            allowed_extensions: default_allowed_extensions(),
            pipeline_cache_capacity: default_pipeline_cache_capacity(),
            progress_channel_capacity: default_progress_channel_capacity(),
            logging: LoggingConfig::default(),
        }
    }

    /// Database location, falling back to the platform data directory.
    pub fn database_path(&self) -> PathBuf {
        match &self.database_path {
            Some(path) => PathBuf::from(path),
            None => dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("papconv")
                .join("history.db"),
        }
    }

    pub fn is_allowed_extension(&self, extension: &str) -> bool {
        let extension = extension.trim_start_matches('.');
        self.allowed_extensions
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(extension))
    }
}
