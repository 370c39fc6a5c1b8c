//! History repository: CRUD operations for the `conversions` table.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rusqlite::{params, Row};
use serde::Serialize;

use super::{Database, DatabaseError};
use crate::jobs::{Job, JobSource};

/// One row of the conversion audit trail.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub id: String,
    /// Name of the stored upload, or the URL's last path segment.
    pub filename: String,
    pub original_filename: String,
    pub input_format: Option<String>,
    pub status: String,
    pub confidence: Option<f64>,
    pub created_at: String,
    pub completed_at: Option<String>,
    /// Settings snapshot as JSON.
    pub settings: Option<String>,
    pub error_message: Option<String>,
    pub output_path: Option<String>,
    pub file_size: Option<i64>,
    pub page_count: Option<i64>,
    pub source_url: Option<String>,
}

impl HistoryEntry {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            filename: row.get("filename")?,
            original_filename: row.get("original_filename")?,
            input_format: row.get("input_format")?,
            status: row.get("status")?,
            confidence: row.get("confidence")?,
            created_at: row.get("created_at")?,
            completed_at: row.get("completed_at")?,
            settings: row.get("settings")?,
            error_message: row.get("error_message")?,
            output_path: row.get("output_path")?,
            file_size: row.get("file_size")?,
            page_count: row.get("page_count")?,
            source_url: row.get("source_url")?,
        })
    }

    /// Builds the initial row for a freshly accepted job.
    pub fn from_job(job: &Job) -> Result<Self, DatabaseError> {
        let settings = serde_json::to_string(job.settings.as_ref())?;
        let (filename, file_size, source_url) = match &job.source {
            JobSource::File { path, size, .. } => (
                path.file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| job.filename.clone()),
                Some(*size as i64),
                None,
            ),
            JobSource::Url { url } => (job.filename.clone(), None, Some(url.clone())),
        };

        Ok(Self {
            id: job.id.clone(),
            filename,
            original_filename: job.filename.clone(),
            input_format: job.input_format.map(|f| f.as_str().to_string()),
            status: job.status.as_str().to_string(),
            confidence: job.confidence,
            created_at: job.created_at.to_rfc3339(),
            completed_at: job.completed_at.map(|t| t.to_rfc3339()),
            settings: Some(settings),
            error_message: job.error.clone(),
            output_path: None,
            file_size,
            page_count: None,
            source_url,
        })
    }
}

/// Fields written when a job reaches a terminal state.
#[derive(Debug, Clone, Default)]
pub struct HistoryUpdate {
    pub status: Option<String>,
    pub confidence: Option<f64>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub output_path: Option<String>,
    pub page_count: Option<i64>,
    pub file_size: Option<i64>,
    pub input_format: Option<String>,
}

/// Query filter parameters for history listing.
#[derive(Debug, Default, Clone)]
pub struct HistoryFilter {
    pub status: Option<String>,
    pub input_format: Option<String>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// Aggregate counts over the whole audit trail.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryStats {
    pub total: u64,
    pub queued: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
    /// Percentage of rows that completed, rounded to one decimal.
    pub success_rate: f64,
    /// Row count per detected input format. Rows without a format are skipped.
    pub format_breakdown: BTreeMap<String, u64>,
}

impl HistoryStats {
    fn from_counts(
        by_status: &BTreeMap<String, u64>,
        format_breakdown: BTreeMap<String, u64>,
    ) -> Self {
        let count = |status: &str| by_status.get(status).copied().unwrap_or(0);
        let total = by_status.values().sum();
        let completed = count("completed");
        let success_rate = if total == 0 {
            0.0
        } else {
            (completed as f64 / total as f64 * 1000.0).round() / 10.0
        };

        Self {
            total,
            queued: count("queued"),
            processing: count("processing"),
            completed,
            failed: count("failed"),
            success_rate,
            format_breakdown,
        }
    }
}

/// Durable audit trail of conversions, independent of the live registry.
pub trait HistoryStore: Send + Sync {
    fn record(&self, entry: &HistoryEntry) -> Result<(), DatabaseError>;

    /// Applies the set fields of `update`; unset fields keep their value.
    /// Returns `false` when no row has this id.
    fn update(&self, job_id: &str, update: &HistoryUpdate) -> Result<bool, DatabaseError>;

    fn get(&self, job_id: &str) -> Result<Option<HistoryEntry>, DatabaseError>;

    /// Returns matching rows, newest first, together with the total match count.
    fn list(&self, filter: &HistoryFilter) -> Result<(Vec<HistoryEntry>, u64), DatabaseError>;

    fn delete(&self, job_id: &str) -> Result<bool, DatabaseError>;

    fn stats(&self) -> Result<HistoryStats, DatabaseError>;
}

/// History backed by the SQLite `conversions` table.
#[derive(Clone)]
pub struct SqliteHistoryStore {
    db: Database,
}

impl SqliteHistoryStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }
}

impl HistoryStore for SqliteHistoryStore {
    fn record(&self, entry: &HistoryEntry) -> Result<(), DatabaseError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO conversions (id, filename, original_filename, input_format, status,
                 confidence, created_at, completed_at, settings, error_message, output_path,
                 file_size, page_count, source_url)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                params![
                    entry.id,
                    entry.filename,
                    entry.original_filename,
                    entry.input_format,
                    entry.status,
                    entry.confidence,
                    entry.created_at,
                    entry.completed_at,
                    entry.settings,
                    entry.error_message,
                    entry.output_path,
                    entry.file_size,
                    entry.page_count,
                    entry.source_url,
                ],
            )?;
            Ok(())
        })
    }

    fn update(&self, job_id: &str, update: &HistoryUpdate) -> Result<bool, DatabaseError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE conversions SET
                 status = COALESCE(?2, status),
                 confidence = COALESCE(?3, confidence),
                 completed_at = COALESCE(?4, completed_at),
                 error_message = COALESCE(?5, error_message),
                 output_path = COALESCE(?6, output_path),
                 page_count = COALESCE(?7, page_count),
                 file_size = COALESCE(?8, file_size),
                 input_format = COALESCE(?9, input_format)
                 WHERE id = ?1",
                params![
                    job_id,
                    update.status,
                    update.confidence,
                    update.completed_at.map(|t| t.to_rfc3339()),
                    update.error_message,
                    update.output_path,
                    update.page_count,
                    update.file_size,
                    update.input_format,
                ],
            )?;
            Ok(changed > 0)
        })
    }

    fn get(&self, job_id: &str) -> Result<Option<HistoryEntry>, DatabaseError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT * FROM conversions WHERE id = ?1")?;
            let mut rows = stmt.query_map(params![job_id], HistoryEntry::from_row)?;
            match rows.next() {
                Some(Ok(row)) => Ok(Some(row)),
                Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
                None => Ok(None),
            }
        })
    }

    fn list(&self, filter: &HistoryFilter) -> Result<(Vec<HistoryEntry>, u64), DatabaseError> {
        self.db.with_conn(|conn| {
            let mut conditions = Vec::new();
            let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

            if let Some(ref status) = filter.status {
                conditions.push(format!("status = ?{}", param_values.len() + 1));
                param_values.push(Box::new(status.clone()));
            }
            if let Some(ref input_format) = filter.input_format {
                conditions.push(format!("input_format = ?{}", param_values.len() + 1));
                param_values.push(Box::new(input_format.clone()));
            }

            let where_clause = if conditions.is_empty() {
                String::new()
            } else {
                format!("WHERE {}", conditions.join(" AND "))
            };

            let count_sql = format!("SELECT COUNT(*) FROM conversions {}", where_clause);
            let params_ref: Vec<&dyn rusqlite::types::ToSql> =
                param_values.iter().map(|p| p.as_ref()).collect();
            let total: u64 = conn.query_row(&count_sql, params_ref.as_slice(), |r| r.get(0))?;

            let limit = filter.limit.unwrap_or(100) as i64;
            let offset = filter.offset.unwrap_or(0) as i64;
            param_values.push(Box::new(limit));
            param_values.push(Box::new(offset));
            let query_sql = format!(
                "SELECT * FROM conversions {} ORDER BY created_at DESC LIMIT ?{} OFFSET ?{}",
                where_clause,
                param_values.len() - 1,
                param_values.len()
            );

            let params_ref: Vec<&dyn rusqlite::types::ToSql> =
                param_values.iter().map(|p| p.as_ref()).collect();
            let mut stmt = conn.prepare(&query_sql)?;
            let rows: Vec<HistoryEntry> = stmt
                .query_map(params_ref.as_slice(), HistoryEntry::from_row)?
                .collect::<Result<Vec<_>, _>>()?;

            Ok((rows, total))
        })
    }

    fn delete(&self, job_id: &str) -> Result<bool, DatabaseError> {
        self.db.with_conn(|conn| {
            let removed = conn.execute("DELETE FROM conversions WHERE id = ?1", params![job_id])?;
            Ok(removed > 0)
        })
    }

    fn stats(&self) -> Result<HistoryStats, DatabaseError> {
        self.db.with_conn(|conn| {
            let grouped = |sql: &str| -> Result<BTreeMap<String, u64>, rusqlite::Error> {
                let mut stmt = conn.prepare(sql)?;
                let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
                rows.collect()
            };

            let by_status = grouped("SELECT status, COUNT(*) FROM conversions GROUP BY status")?;
            let by_format = grouped(
                "SELECT input_format, COUNT(*) FROM conversions
                 WHERE input_format IS NOT NULL GROUP BY input_format",
            )?;
            Ok(HistoryStats::from_counts(&by_status, by_format))
        })
    }
}

/// History that records nothing. Used when no database is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHistoryStore;

impl HistoryStore for NoopHistoryStore {
    fn record(&self, _entry: &HistoryEntry) -> Result<(), DatabaseError> {
        Ok(())
    }

    fn update(&self, _job_id: &str, _update: &HistoryUpdate) -> Result<bool, DatabaseError> {
        Ok(false)
    }

    fn get(&self, _job_id: &str) -> Result<Option<HistoryEntry>, DatabaseError> {
        Ok(None)
    }

    fn list(&self, _filter: &HistoryFilter) -> Result<(Vec<HistoryEntry>, u64), DatabaseError> {
        Ok((Vec::new(), 0))
    }

    fn delete(&self, _job_id: &str) -> Result<bool, DatabaseError> {
        Ok(false)
    }

    fn stats(&self) -> Result<HistoryStats, DatabaseError> {
        Ok(HistoryStats::default())
    }
}
