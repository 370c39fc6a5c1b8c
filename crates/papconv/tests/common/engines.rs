//! Fake conversion engine for orchestration tests.
//!
//! Each document is a small script, one directive per line:
//! - `sleep <ms>`: block the conversion for that long
//! - `fail <message>`: return a corrupt-document error
//! - `panic`: panic inside the engine
//! - `confidence <f64>`: report a confidence score
//! - `warn <message>`: report a partial-success warning
//!
//! Any other line becomes document text.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use papconv::engine::{
    ConversionOutput, ConvertRequest, EngineImage, EngineProgress, EngineStage, EngineTable,
};
use papconv::pipeline::PipelineOptions;
use papconv::{ConversionEngine, DocumentPipeline, EngineError, ExportFormat};

#[derive(Default)]
pub struct EngineStats {
    pub constructions: AtomicUsize,
    pub conversions: AtomicUsize,
    pub running: AtomicUsize,
    pub peak_running: AtomicUsize,
    /// Languages of constructed pipelines, in construction order.
    pub constructed_languages: Mutex<Vec<String>>,
}

pub struct ScriptedEngine {
    stats: Arc<EngineStats>,
    construct_delay: Duration,
    /// Pipelines for this OCR language fail to construct.
    missing_model: Option<String>,
}

impl ScriptedEngine {
    pub fn new() -> Arc<Self> {
        Self::with_construct_delay(Duration::ZERO)
    }

    pub fn with_construct_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            stats: Arc::new(EngineStats::default()),
            construct_delay: delay,
            missing_model: None,
        })
    }

    pub fn without_model_for(language: &str) -> Arc<Self> {
        Arc::new(Self {
            stats: Arc::new(EngineStats::default()),
            construct_delay: Duration::ZERO,
            missing_model: Some(language.to_string()),
        })
    }

    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    pub fn constructions(&self) -> usize {
        self.stats.constructions.load(Ordering::SeqCst)
    }

    pub fn peak_running(&self) -> usize {
        self.stats.peak_running.load(Ordering::SeqCst)
    }
}

impl ConversionEngine for ScriptedEngine {
    fn name(&self) -> &str {
        "scripted"
    }

    fn construct(
        &self,
        options: &PipelineOptions,
    ) -> Result<Box<dyn DocumentPipeline>, EngineError> {
        thread::sleep(self.construct_delay);
        self.stats.constructions.fetch_add(1, Ordering::SeqCst);
        self.stats
            .constructed_languages
            .lock()
            .unwrap()
            .push(options.ocr_language.clone());
        if self.missing_model.as_deref() == Some(options.ocr_language.as_str()) {
            return Err(EngineError::Failed(format!(
                "no OCR model for '{}'",
                options.ocr_language
            )));
        }
        Ok(Box::new(ScriptedPipeline {
            stats: Arc::clone(&self.stats),
        }))
    }
}

struct ScriptedPipeline {
    stats: Arc<EngineStats>,
}

struct RunningGuard<'a>(&'a EngineStats);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.running.fetch_sub(1, Ordering::SeqCst);
    }
}

impl DocumentPipeline for ScriptedPipeline {
    fn convert(
        &self,
        request: &ConvertRequest,
        progress: &dyn EngineProgress,
    ) -> Result<ConversionOutput, EngineError> {
        let now = self.stats.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.stats.peak_running.fetch_max(now, Ordering::SeqCst);
        let _guard = RunningGuard(&self.stats);
        self.stats.conversions.fetch_add(1, Ordering::SeqCst);

        let script = std::fs::read_to_string(request.source())
            .map_err(|e| EngineError::Failed(e.to_string()))?;

        let mut text = Vec::new();
        let mut confidence = None;
        let mut warnings = Vec::new();
        progress.report(EngineStage::Analyzing, 0.0);

        for line in script.lines() {
            let (directive, rest) = line.split_once(' ').unwrap_or((line, ""));
            match directive {
                "sleep" => {
                    let ms = rest.trim().parse().unwrap_or(0);
                    thread::sleep(Duration::from_millis(ms));
                    progress.report(EngineStage::Analyzing, 1.0);
                }
                "fail" => return Err(EngineError::Corrupt(rest.to_string())),
                "panic" => panic!("scripted engine panic"),
                "confidence" => confidence = rest.trim().parse().ok(),
                "warn" => warnings.push(rest.to_string()),
                _ => text.push(line.to_string()),
            }
        }
        progress.report(EngineStage::Extracting, 1.0);

        let body = text.join("\n");
        let mut exports = BTreeMap::new();
        for format in [ExportFormat::Markdown, ExportFormat::Text, ExportFormat::Html] {
            if request.wants(format) {
                exports.insert(format, body.clone().into_bytes());
            }
        }

        Ok(ConversionOutput {
            exports,
            images: vec![EngineImage {
                bytes: vec![0x89, b'P', b'N', b'G'],
                caption: Some("Figure 1".to_string()),
                label: Some("picture".to_string()),
            }],
            tables: vec![EngineTable {
                rows: vec![
                    vec!["name".to_string(), "qty".to_string()],
                    vec!["bolts".to_string(), "12".to_string()],
                ],
                caption: None,
                label: Some("table".to_string()),
                image: Some(vec![0x89, b'P', b'N', b'G']),
            }],
            chunks: Vec::new(),
            page_count: 1,
            confidence,
            warnings,
        })
    }
}
