use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::config::{ConversionSettings, Device, OcrBackend, TableMode};

/// The subset of [`ConversionSettings`] that changes what an engine has to build.
///
/// Output formats, chunking and timeouts are applied per conversion and do
/// not participate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineOptions {
    pub ocr_enabled: bool,
    pub ocr_backend: OcrBackend,
    pub ocr_language: String,
    pub ocr_use_gpu: bool,
    pub force_full_page_ocr: bool,
    /// Thresholds are carried as text so that equality and hashing are exact.
    pub ocr_confidence_threshold: String,
    pub ocr_bitmap_area_threshold: String,
    pub tables_enabled: bool,
    pub table_mode: TableMode,
    pub do_cell_matching: bool,
    pub generate_page_images: bool,
    pub generate_picture_images: bool,
    pub generate_table_images: bool,
    pub images_scale: String,
    pub device: Device,
    pub num_threads: usize,
    pub code_enrichment: bool,
    pub formula_enrichment: bool,
    pub picture_classification: bool,
    pub picture_description: bool,
}

impl PipelineOptions {
    pub fn from_settings(settings: &ConversionSettings) -> Self {
        Self {
            ocr_enabled: settings.ocr.enabled,
            ocr_backend: settings.ocr.backend,
            ocr_language: settings.ocr.language.clone(),
            ocr_use_gpu: settings.ocr.use_gpu,
            force_full_page_ocr: settings.ocr.force_full_page_ocr,
            ocr_confidence_threshold: settings.ocr.confidence_threshold.to_string(),
            ocr_bitmap_area_threshold: settings.ocr.bitmap_area_threshold.to_string(),
            tables_enabled: settings.tables.enabled,
            table_mode: settings.tables.mode,
            do_cell_matching: settings.tables.do_cell_matching,
            generate_page_images: settings.images.generate_page_images,
            generate_picture_images: settings.images.generate_picture_images,
            generate_table_images: settings.images.generate_table_images,
            images_scale: settings.images.images_scale.to_string(),
            device: settings.performance.device,
            num_threads: settings.performance.num_threads,
            code_enrichment: settings.enrichment.code_enrichment,
            formula_enrichment: settings.enrichment.formula_enrichment,
            picture_classification: settings.enrichment.picture_classification,
            picture_description: settings.enrichment.picture_description,
        }
    }
}

/// Cache key for a constructed pipeline.
///
/// Equality is defined on the canonical serialization; the digest is only
/// a short label for logs.
#[derive(Debug, Clone)]
pub struct PipelineKey {
    canonical: String,
    digest: String,
}

impl PipelineKey {
    pub fn from_options(options: &PipelineOptions) -> Self {
        // Struct fields serialize in declaration order, so this is stable.
        let canonical = serde_json::to_string(options).unwrap_or_else(|e| {
            log::warn!("Falling back to debug formatting for pipeline key: {}", e);
            format!("{:?}", options)
        });
        let mut hasher = DefaultHasher::new();
        canonical.hash(&mut hasher);
        let digest = format!("{:016x}", hasher.finish());
        Self { canonical, digest }
    }

    pub fn from_settings(settings: &ConversionSettings) -> Self {
        Self::from_options(&PipelineOptions::from_settings(settings))
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }

    pub fn canonical(&self) -> &str {
        &self.canonical
    }
}

impl PartialEq for PipelineKey {
    fn eq(&self, other: &Self) -> bool {
        self.canonical == other.canonical
    }
}

impl Eq for PipelineKey {}

impl Hash for PipelineKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.canonical.hash(state);
    }
}

impl std::fmt::Display for PipelineKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.digest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExportFormat;

    #[test]
    fn test_equal_settings_produce_equal_keys() {
        let a = PipelineKey::from_settings(&ConversionSettings::default());
        let b = PipelineKey::from_settings(&ConversionSettings::default());
        assert_eq!(a, b);
        assert_eq!(a.digest(), b.digest());
    }

    #[test]
    fn test_cost_relevant_change_changes_key() {
        let base = ConversionSettings::default();
        let base_key = PipelineKey::from_settings(&base);

        let mut lang = base.clone();
        lang.ocr.language = "de".to_string();
        assert_ne!(PipelineKey::from_settings(&lang), base_key);

        let mut mode = base.clone();
        mode.tables.mode = TableMode::Fast;
        assert_ne!(PipelineKey::from_settings(&mode), base_key);

        let mut threads = base.clone();
        threads.performance.num_threads += 1;
        assert_ne!(PipelineKey::from_settings(&threads), base_key);

        let mut device = base.clone();
        device.performance.device = Device::Cpu;
        assert_ne!(PipelineKey::from_settings(&device), base_key);
    }

    #[test]
    fn test_per_conversion_settings_do_not_change_key() {
        let base = ConversionSettings::default();
        let mut other = base.clone();
        other.output.formats = vec![ExportFormat::Markdown];
        other.chunking.enabled = true;
        other.performance.document_timeout = Some(10);

        assert_eq!(
            PipelineKey::from_settings(&base),
            PipelineKey::from_settings(&other)
        );
    }
}
