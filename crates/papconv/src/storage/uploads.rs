use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::StorageError;
use crate::jobs::url_filename;
use crate::sanitize;

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(120);

/// A document materialized on local disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub path: PathBuf,
    /// Sanitized name including extension.
    pub filename: String,
    pub size: u64,
}

/// Materializes uploads and remote documents as local files.
pub trait FileStore: Send + Sync {
    fn save_upload(
        &self,
        original_filename: &str,
        content: &[u8],
    ) -> Result<StoredFile, StorageError>;

    /// Downloads `url`, refusing bodies larger than `limit` bytes.
    fn fetch_url(&self, url: &str, limit: u64) -> Result<StoredFile, StorageError>;

    fn remove(&self, path: &Path) -> Result<(), StorageError>;
}

pub struct UploadStore {
    directory: PathBuf,
}

impl UploadStore {
    pub fn new<P: AsRef<Path>>(directory: P) -> Self {
        Self {
            directory: directory.as_ref().to_path_buf(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn ensure_directory(&self) -> Result<(), StorageError> {
        std::fs::create_dir_all(&self.directory).map_err(|e| StorageError::CreateDirectory {
            path: self.directory.clone(),
            source: e,
        })
    }

    /// Writes `content` under a collision-free `<stem>_<8 hex><ext>` name.
    fn write_unique(&self, filename: &str, content: &[u8]) -> Result<StoredFile, StorageError> {
        use std::io::Write;

        self.ensure_directory()?;
        let (stem, ext) = match filename.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => (stem, format!(".{}", ext)),
            _ => (filename, String::new()),
        };
        let stem = if stem.is_empty() { "upload" } else { stem };

        for _ in 0..16 {
            let suffix = uuid::Uuid::new_v4().simple().to_string();
            let unique = format!("{}_{}{}", stem, &suffix[..8], ext);
            let path = self.directory.join(&unique);

            match std::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
            {
                Ok(mut file) => {
                    file.write_all(content).map_err(|e| StorageError::WriteFile {
                        path: path.clone(),
                        source: e,
                    })?;
                    return Ok(StoredFile {
                        path,
                        filename: filename.to_string(),
                        size: content.len() as u64,
                    });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(StorageError::WriteFile { path, source: e }),
            }
        }

        Err(StorageError::FileExists(self.directory.join(filename)))
    }
}

impl FileStore for UploadStore {
    fn save_upload(
        &self,
        original_filename: &str,
        content: &[u8],
    ) -> Result<StoredFile, StorageError> {
        let filename = sanitize::secure_filename(original_filename);
        let stored = self.write_unique(&filename, content)?;
        log::debug!(
            "Stored upload {} ({} bytes)",
            sanitize::redact_path(&stored.path),
            stored.size
        );
        Ok(stored)
    }

    fn fetch_url(&self, url: &str, limit: u64) -> Result<StoredFile, StorageError> {
        let download_error = |reason: String| StorageError::Download {
            url: sanitize::redact_url(url),
            reason,
        };

        let client = reqwest::blocking::Client::builder()
            .timeout(DOWNLOAD_TIMEOUT)
            .build()
            .map_err(|e| download_error(e.to_string()))?;

        let response = client
            .get(url)
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|e| download_error(e.to_string()))?;

        if response.content_length().is_some_and(|len| len > limit) {
            return Err(StorageError::DownloadTooLarge { limit });
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_string());

        let mut body = Vec::new();
        response
            .take(limit + 1)
            .read_to_end(&mut body)
            .map_err(|e| download_error(e.to_string()))?;
        if body.len() as u64 > limit {
            return Err(StorageError::DownloadTooLarge { limit });
        }

        let mut filename = sanitize::secure_filename(&url_filename(url));
        if !filename.contains('.') {
            if let Some(ext) = content_type
                .as_deref()
                .and_then(mime_guess::get_mime_extensions_str)
                .and_then(|exts| exts.first())
            {
                filename = format!("{}.{}", filename, ext);
            }
        }

        let stored = self.write_unique(&filename, &body)?;
        log::info!(
            "Downloaded {} to {} ({} bytes)",
            sanitize::redact_url(url),
            sanitize::redact_path(&stored.path),
            stored.size
        );
        Ok(stored)
    }

    fn remove(&self, path: &Path) -> Result<(), StorageError> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Remove {
                path: path.to_path_buf(),
                source: e,
            }),
        }
    }
}
