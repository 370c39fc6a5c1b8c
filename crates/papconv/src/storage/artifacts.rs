//! Per-job artifact persistence.
//!
//! Each job owns `<root>/<job_id>/`. Files are written outside the index lock
//! and registered afterwards, so a reader sees an artifact only once its file
//! is complete. Reads hold the index read lock while touching the file and
//! `delete` takes the write lock, which makes deletion atomic for readers.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Serialize;

use crate::config::ExportFormat;
use crate::engine::{EngineChunk, EngineImage, EngineTable};
use crate::error::{LookupError, StorageError};
use crate::sanitize;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ImageRecord {
    pub id: usize,
    pub filename: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub size: u64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TableRecord {
    pub id: usize,
    pub rows: Vec<Vec<String>>,
    pub row_count: usize,
    pub column_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub csv_filename: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_filename: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChunkRecord {
    pub id: usize,
    pub text: String,
    pub headings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<usize>,
}

/// Bytes of a stored artifact plus what a download needs.
#[derive(Debug, Clone)]
pub struct ArtifactFile {
    pub bytes: Vec<u8>,
    pub filename: String,
    pub mime_type: String,
}

impl ArtifactFile {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}

struct JobArtifacts {
    dir: PathBuf,
    stem: String,
    exports: BTreeMap<ExportFormat, PathBuf>,
    images: Vec<ImageRecord>,
    tables: Vec<TableRecord>,
    chunks: Vec<ChunkRecord>,
}

pub struct ArtifactStore {
    root: PathBuf,
    index: RwLock<HashMap<String, JobArtifacts>>,
}

impl ArtifactStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            index: RwLock::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, JobArtifacts>> {
        self.index.read().unwrap_or_else(|poisoned| {
            log::warn!("Artifact index lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, JobArtifacts>> {
        self.index.write().unwrap_or_else(|poisoned| {
            log::warn!("Artifact index lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn job_dir(&self, job_id: &str) -> PathBuf {
        self.root.join(job_id)
    }

    /// Allocates the job's namespace. Idempotent.
    pub fn create_namespace(&self, job_id: &str, stem: &str) -> Result<PathBuf, StorageError> {
        let dir = self.job_dir(job_id);
        ensure_directory(&dir)?;

        let stem = match sanitize::secure_filename(stem) {
            s if s.is_empty() => "document".to_string(),
            s => s,
        };
        self.write()
            .entry(job_id.to_string())
            .or_insert_with(|| JobArtifacts {
                dir: dir.clone(),
                stem,
                exports: BTreeMap::new(),
                images: Vec::new(),
                tables: Vec::new(),
                chunks: Vec::new(),
            });
        Ok(dir)
    }

    fn namespace(&self, job_id: &str) -> Result<(PathBuf, String), StorageError> {
        self.read()
            .get(job_id)
            .map(|a| (a.dir.clone(), a.stem.clone()))
            .ok_or_else(|| StorageError::MissingSource(self.job_dir(job_id)))
    }

    /// Writes one export and returns its path.
    pub fn save_export(
        &self,
        job_id: &str,
        format: ExportFormat,
        content: &[u8],
    ) -> Result<PathBuf, StorageError> {
        let (dir, stem) = self.namespace(job_id)?;
        let path = dir.join(format!("{}{}", stem, format.extension()));
        write_file(&path, content)?;

        if let Some(entry) = self.write().get_mut(job_id) {
            entry.exports.insert(format, path.clone());
        }
        Ok(path)
    }

    pub fn save_image(
        &self,
        job_id: &str,
        image: &EngineImage,
    ) -> Result<ImageRecord, StorageError> {
        let (dir, _) = self.namespace(job_id)?;
        let id = self.read().get(job_id).map(|a| a.images.len() + 1).unwrap_or(1);
        let filename = format!("image_{}.png", id);
        write_file(&dir.join("images").join(&filename), &image.bytes)?;

        let record = ImageRecord {
            id,
            filename,
            caption: image.caption.clone(),
            label: image.label.clone(),
            size: image.bytes.len() as u64,
        };
        if let Some(entry) = self.write().get_mut(job_id) {
            entry.images.push(record.clone());
        }
        Ok(record)
    }

    pub fn save_table(
        &self,
        job_id: &str,
        table: &EngineTable,
    ) -> Result<TableRecord, StorageError> {
        let (dir, _) = self.namespace(job_id)?;
        let id = self.read().get(job_id).map(|a| a.tables.len() + 1).unwrap_or(1);
        let tables_dir = dir.join("tables");

        let csv_filename = format!("table_{}.csv", id);
        write_file(&tables_dir.join(&csv_filename), to_csv(&table.rows).as_bytes())?;

        let image_filename = match &table.image {
            Some(bytes) => {
                let name = format!("table_{}.png", id);
                write_file(&tables_dir.join(&name), bytes)?;
                Some(name)
            }
            None => None,
        };

        let record = TableRecord {
            id,
            rows: table.rows.clone(),
            row_count: table.rows.len(),
            column_count: table.rows.iter().map(Vec::len).max().unwrap_or(0),
            caption: table.caption.clone(),
            label: table.label.clone(),
            csv_filename,
            image_filename,
        };
        if let Some(entry) = self.write().get_mut(job_id) {
            entry.tables.push(record.clone());
        }
        Ok(record)
    }

    /// Writes `<stem>.chunks.json` and registers the chunks.
    pub fn save_chunks(
        &self,
        job_id: &str,
        chunks: &[EngineChunk],
    ) -> Result<Vec<ChunkRecord>, StorageError> {
        let (dir, stem) = self.namespace(job_id)?;
        let records: Vec<ChunkRecord> = chunks
            .iter()
            .enumerate()
            .map(|(i, c)| ChunkRecord {
                id: i + 1,
                text: c.text.clone(),
                headings: c.headings.clone(),
                page: c.page,
            })
            .collect();

        let path = dir.join(format!("{}{}", stem, ExportFormat::Chunks.extension()));
        let json = serde_json::to_vec_pretty(&records).map_err(|e| StorageError::WriteFile {
            path: path.clone(),
            source: std::io::Error::other(e),
        })?;
        write_file(&path, &json)?;

        if let Some(entry) = self.write().get_mut(job_id) {
            entry.exports.insert(ExportFormat::Chunks, path);
            entry.chunks = records.clone();
        }
        Ok(records)
    }

    /// Export formats written so far for a job.
    pub fn formats(&self, job_id: &str) -> Vec<ExportFormat> {
        self.read()
            .get(job_id)
            .map(|a| a.exports.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn export_path(&self, job_id: &str, format: ExportFormat) -> Option<PathBuf> {
        self.read()
            .get(job_id)
            .and_then(|a| a.exports.get(&format).cloned())
    }

    pub fn list_images(&self, job_id: &str) -> Vec<ImageRecord> {
        self.read()
            .get(job_id)
            .map(|a| a.images.clone())
            .unwrap_or_default()
    }

    pub fn list_tables(&self, job_id: &str) -> Vec<TableRecord> {
        self.read()
            .get(job_id)
            .map(|a| a.tables.clone())
            .unwrap_or_default()
    }

    pub fn list_chunks(&self, job_id: &str) -> Vec<ChunkRecord> {
        self.read()
            .get(job_id)
            .map(|a| a.chunks.clone())
            .unwrap_or_default()
    }

    pub fn read_export(
        &self,
        job_id: &str,
        format: ExportFormat,
    ) -> Result<ArtifactFile, LookupError> {
        let index = self.read();
        let path = index
            .get(job_id)
            .and_then(|a| a.exports.get(&format))
            .ok_or_else(|| LookupError::ArtifactNotFound {
                job_id: job_id.to_string(),
                artifact: format!("Export format '{}'", format),
            })?;
        let bytes = read_file(path)?;
        Ok(ArtifactFile {
            bytes,
            filename: sanitize::redact_path(path),
            mime_type: format.mime_type().to_string(),
        })
    }

    pub fn read_image(&self, job_id: &str, image_id: usize) -> Result<ArtifactFile, LookupError> {
        let index = self.read();
        let entry = index.get(job_id);
        let record = entry
            .and_then(|a| a.images.iter().find(|r| r.id == image_id))
            .ok_or_else(|| LookupError::ArtifactNotFound {
                job_id: job_id.to_string(),
                artifact: format!("Image {}", image_id),
            })?;
        let path = self.job_dir(job_id).join("images").join(&record.filename);
        Ok(ArtifactFile {
            bytes: read_file(&path)?,
            filename: record.filename.clone(),
            mime_type: mime_of(&path),
        })
    }

    pub fn read_table_csv(
        &self,
        job_id: &str,
        table_id: usize,
    ) -> Result<ArtifactFile, LookupError> {
        let index = self.read();
        let record = find_table(&index, job_id, table_id)?;
        let path = self.job_dir(job_id).join("tables").join(&record.csv_filename);
        Ok(ArtifactFile {
            bytes: read_file(&path)?,
            filename: record.csv_filename.clone(),
            mime_type: "text/csv".to_string(),
        })
    }

    pub fn read_table_image(
        &self,
        job_id: &str,
        table_id: usize,
    ) -> Result<ArtifactFile, LookupError> {
        let index = self.read();
        let record = find_table(&index, job_id, table_id)?;
        let filename = record
            .image_filename
            .as_ref()
            .ok_or_else(|| LookupError::ArtifactNotFound {
                job_id: job_id.to_string(),
                artifact: format!("Image for table {}", table_id),
            })?;
        let path = self.job_dir(job_id).join("tables").join(filename);
        Ok(ArtifactFile {
            bytes: read_file(&path)?,
            filename: filename.clone(),
            mime_type: mime_of(&path),
        })
    }

    /// Removes every artifact of a job. Returns whether anything existed.
    pub fn delete(&self, job_id: &str) -> Result<bool, StorageError> {
        let dir = self.job_dir(job_id);
        let doomed = {
            let mut index = self.write();
            let indexed = index.remove(job_id).is_some();
            if !dir.exists() {
                return Ok(indexed);
            }
            // Move out of the namespace while readers are excluded.
            let doomed = self.root.join(format!(
                ".deleted-{}-{}",
                job_id,
                uuid::Uuid::new_v4().simple()
            ));
            std::fs::rename(&dir, &doomed).map_err(|e| StorageError::MoveFile {
                from: dir.clone(),
                to: doomed.clone(),
                source: e,
            })?;
            doomed
        };

        std::fs::remove_dir_all(&doomed).map_err(|e| StorageError::Remove {
            path: doomed.clone(),
            source: e,
        })?;
        log::debug!("Deleted artifacts for job {}", job_id);
        Ok(true)
    }
}

fn find_table<'a>(
    index: &'a HashMap<String, JobArtifacts>,
    job_id: &str,
    table_id: usize,
) -> Result<&'a TableRecord, LookupError> {
    index
        .get(job_id)
        .and_then(|a| a.tables.iter().find(|r| r.id == table_id))
        .ok_or_else(|| LookupError::ArtifactNotFound {
            job_id: job_id.to_string(),
            artifact: format!("Table {}", table_id),
        })
}

fn mime_of(path: &Path) -> String {
    mime_guess::from_path(path)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

fn ensure_directory(path: &Path) -> Result<(), StorageError> {
    std::fs::create_dir_all(path).map_err(|e| StorageError::CreateDirectory {
        path: path.to_path_buf(),
        source: e,
    })
}

fn write_file(path: &Path, content: &[u8]) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        ensure_directory(parent)?;
    }
    std::fs::write(path, content).map_err(|e| StorageError::WriteFile {
        path: path.to_path_buf(),
        source: e,
    })
}

fn read_file(path: &Path) -> Result<Vec<u8>, StorageError> {
    std::fs::read(path).map_err(|e| StorageError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })
}

/// RFC 4180 encoding: fields containing `,`, `"` or line breaks are quoted.
pub fn to_csv(rows: &[Vec<String>]) -> String {
    let mut out = String::new();
    for row in rows {
        let line: Vec<String> = row
            .iter()
            .map(|field| {
                if field.contains([',', '"', '\n', '\r']) {
                    format!("\"{}\"", field.replace('"', "\"\""))
                } else {
                    field.clone()
                }
            })
            .collect();
        out.push_str(&line.join(","));
        out.push_str("\r\n");
    }
    out
}
