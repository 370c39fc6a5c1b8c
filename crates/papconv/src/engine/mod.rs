//! Conversion engine boundary.
//!
//! An engine builds [`DocumentPipeline`]s from [`PipelineOptions`]. Building a
//! pipeline is expensive (model loading), so constructed pipelines are shared
//! through the pipeline cache and must tolerate concurrent `convert` calls.

pub mod text;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;

use crate::config::{ChunkingSettings, ConversionSettings, ExportFormat};
use crate::error::EngineError;
use crate::pipeline::PipelineOptions;

pub use text::TextEngine;

pub trait ConversionEngine: Send + Sync {
    fn name(&self) -> &str;

    fn construct(
        &self,
        options: &PipelineOptions,
    ) -> Result<Box<dyn DocumentPipeline>, EngineError>;
}

pub trait DocumentPipeline: Send + Sync {
    fn convert(
        &self,
        request: &ConvertRequest,
        progress: &dyn EngineProgress,
    ) -> Result<ConversionOutput, EngineError>;
}

/// Per-conversion inputs that do not affect pipeline construction.
#[derive(Debug, Clone)]
pub struct ConvertRequest {
    pub source: PathBuf,
    pub formats: Vec<ExportFormat>,
    /// Chunk the document when set.
    pub chunking: Option<ChunkingSettings>,
}

impl ConvertRequest {
    pub fn new(source: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            formats: ExportFormat::ALL.to_vec(),
            chunking: None,
        }
    }

    pub fn from_settings(source: impl Into<PathBuf>, settings: &ConversionSettings) -> Self {
        Self {
            source: source.into(),
            formats: settings.output.formats.clone(),
            chunking: settings
                .chunking
                .enabled
                .then(|| settings.chunking.clone()),
        }
    }

    pub fn wants(&self, format: ExportFormat) -> bool {
        self.formats.contains(&format)
    }

    pub fn source(&self) -> &Path {
        &self.source
    }
}

pub type PipelineHandle = Arc<dyn DocumentPipeline>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineStage {
    /// Layout analysis, OCR.
    Analyzing,
    /// Structure and table extraction.
    Extracting,
}

/// Sub-step progress from inside an engine call. `fraction` is clamped to [0, 1].
pub trait EngineProgress: Send + Sync {
    fn report(&self, stage: EngineStage, fraction: f32);
}

pub struct NoopEngineProgress;

impl EngineProgress for NoopEngineProgress {
    fn report(&self, _stage: EngineStage, _fraction: f32) {}
}

#[derive(Debug, Clone, Default)]
pub struct ConversionOutput {
    /// Rendered bytes for every export format the engine produced.
    pub exports: BTreeMap<ExportFormat, Vec<u8>>,
    pub images: Vec<EngineImage>,
    pub tables: Vec<EngineTable>,
    pub chunks: Vec<EngineChunk>,
    pub page_count: usize,
    pub confidence: Option<f64>,
    pub warnings: Vec<String>,
}

impl ConversionOutput {
    pub fn export_text(&self, format: ExportFormat) -> Option<String> {
        self.exports
            .get(&format)
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
    }
}

#[derive(Debug, Clone, Default)]
pub struct EngineImage {
    pub bytes: Vec<u8>,
    pub caption: Option<String>,
    pub label: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct EngineTable {
    pub rows: Vec<Vec<String>>,
    pub caption: Option<String>,
    pub label: Option<String>,
    pub image: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct EngineChunk {
    pub text: String,
    pub headings: Vec<String>,
    pub page: Option<usize>,
}
