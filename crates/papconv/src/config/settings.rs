//! Per-job conversion settings and their partial overrides.
//!
//! A Job captures a fully resolved [`ConversionSettings`] at submission time.
//! Callers supply a [`SettingsOverride`] whose fields are all optional; it is
//! merged over the base settings from the settings store.

use serde::{Deserialize, Serialize};

use crate::config::formats::ExportFormat;
use crate::error::ValidationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OcrBackend {
    EasyOcr,
    Tesseract,
    OcrMac,
    RapidOcr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableMode {
    Fast,
    Accurate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    Auto,
    Cpu,
    Cuda,
    Mps,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversionSettings {
    pub ocr: OcrSettings,
    pub tables: TableSettings,
    pub images: ImageSettings,
    pub output: OutputSettings,
    pub performance: PerformanceSettings,
    pub chunking: ChunkingSettings,
    pub enrichment: EnrichmentSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrSettings {
    pub enabled: bool,
    pub language: String,
    pub force_full_page_ocr: bool,
    pub backend: OcrBackend,
    pub use_gpu: bool,
    pub confidence_threshold: f32,
    pub bitmap_area_threshold: f32,
}

impl Default for OcrSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            language: "en".to_string(),
            force_full_page_ocr: false,
            backend: OcrBackend::EasyOcr,
            use_gpu: false,
            confidence_threshold: 0.5,
            bitmap_area_threshold: 0.05,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableSettings {
    pub enabled: bool,
    pub structure_extraction: bool,
    pub mode: TableMode,
    pub do_cell_matching: bool,
}

impl Default for TableSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            structure_extraction: true,
            mode: TableMode::Accurate,
            do_cell_matching: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageSettings {
    pub extract: bool,
    pub classify: bool,
    pub generate_page_images: bool,
    pub generate_picture_images: bool,
    pub generate_table_images: bool,
    pub images_scale: f32,
}

impl Default for ImageSettings {
    fn default() -> Self {
        Self {
            extract: true,
            classify: true,
            generate_page_images: false,
            generate_picture_images: true,
            generate_table_images: true,
            images_scale: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    pub default_format: ExportFormat,
    /// Export formats persisted for each job.
    pub formats: Vec<ExportFormat>,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            default_format: ExportFormat::Markdown,
            formats: ExportFormat::ALL.to_vec(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceSettings {
    pub device: Device,
    pub num_threads: usize,
    /// Upper bound on a single engine call, in seconds. `None` disables it.
    pub document_timeout: Option<u64>,
}

impl Default for PerformanceSettings {
    fn default() -> Self {
        Self {
            device: Device::Auto,
            num_threads: num_cpus::get().clamp(1, 4),
            document_timeout: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingSettings {
    pub enabled: bool,
    pub max_tokens: usize,
    pub merge_peers: bool,
}

impl Default for ChunkingSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            max_tokens: 512,
            merge_peers: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrichmentSettings {
    pub code_enrichment: bool,
    pub formula_enrichment: bool,
    pub picture_classification: bool,
    pub picture_description: bool,
}

impl ConversionSettings {
    /// Returns a copy with every field present in `overrides` replaced.
    pub fn merged(&self, overrides: &SettingsOverride) -> Self {
        let mut merged = self.clone();
        if let Some(ocr) = &overrides.ocr {
            ocr.apply_to(&mut merged.ocr);
        }
        if let Some(tables) = &overrides.tables {
            tables.apply_to(&mut merged.tables);
        }
        if let Some(images) = &overrides.images {
            images.apply_to(&mut merged.images);
        }
        if let Some(output) = &overrides.output {
            output.apply_to(&mut merged.output);
        }
        if let Some(performance) = &overrides.performance {
            performance.apply_to(&mut merged.performance);
        }
        if let Some(chunking) = &overrides.chunking {
            chunking.apply_to(&mut merged.chunking);
        }
        if let Some(enrichment) = &overrides.enrichment {
            enrichment.apply_to(&mut merged.enrichment);
        }
        merged
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        let invalid = |msg: &str| Err(ValidationError::InvalidSettings(msg.to_string()));

        if self.ocr.language.trim().is_empty() {
            return invalid("ocr.language must not be empty");
        }
        if !(0.0..=1.0).contains(&self.ocr.confidence_threshold) {
            return invalid("ocr.confidence_threshold must be within [0, 1]");
        }
        if !(0.0..=1.0).contains(&self.ocr.bitmap_area_threshold) {
            return invalid("ocr.bitmap_area_threshold must be within [0, 1]");
        }
        if !(self.images.images_scale > 0.0 && self.images.images_scale <= 10.0) {
            return invalid("images.images_scale must be within (0, 10]");
        }
        if self.performance.num_threads == 0 {
            return invalid("performance.num_threads must be at least 1");
        }
        if self.performance.document_timeout == Some(0) {
            return invalid("performance.document_timeout must be positive when set");
        }
        if self.chunking.max_tokens == 0 {
            return invalid("chunking.max_tokens must be at least 1");
        }
        if self.output.formats.is_empty() {
            return invalid("output.formats must list at least one format");
        }
        Ok(())
    }
}

fn set<T: Clone>(target: &mut T, value: &Option<T>) {
    if let Some(v) = value {
        *target = v.clone();
    }
}

/// Partial settings supplied with a submission or a settings update.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsOverride {
    pub ocr: Option<OcrOverride>,
    pub tables: Option<TableOverride>,
    pub images: Option<ImageOverride>,
    pub output: Option<OutputOverride>,
    pub performance: Option<PerformanceOverride>,
    pub chunking: Option<ChunkingOverride>,
    pub enrichment: Option<EnrichmentOverride>,
}

impl SettingsOverride {
    pub fn is_empty(&self) -> bool {
        *self == SettingsOverride::default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrOverride {
    pub enabled: Option<bool>,
    pub language: Option<String>,
    pub force_full_page_ocr: Option<bool>,
    pub backend: Option<OcrBackend>,
    pub use_gpu: Option<bool>,
    pub confidence_threshold: Option<f32>,
    pub bitmap_area_threshold: Option<f32>,
}

impl OcrOverride {
    fn apply_to(&self, s: &mut OcrSettings) {
        set(&mut s.enabled, &self.enabled);
        set(&mut s.language, &self.language);
        set(&mut s.force_full_page_ocr, &self.force_full_page_ocr);
        set(&mut s.backend, &self.backend);
        set(&mut s.use_gpu, &self.use_gpu);
        set(&mut s.confidence_threshold, &self.confidence_threshold);
        set(&mut s.bitmap_area_threshold, &self.bitmap_area_threshold);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableOverride {
    pub enabled: Option<bool>,
    pub structure_extraction: Option<bool>,
    pub mode: Option<TableMode>,
    pub do_cell_matching: Option<bool>,
}

impl TableOverride {
    fn apply_to(&self, s: &mut TableSettings) {
        set(&mut s.enabled, &self.enabled);
        set(&mut s.structure_extraction, &self.structure_extraction);
        set(&mut s.mode, &self.mode);
        set(&mut s.do_cell_matching, &self.do_cell_matching);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageOverride {
    pub extract: Option<bool>,
    pub classify: Option<bool>,
    pub generate_page_images: Option<bool>,
    pub generate_picture_images: Option<bool>,
    pub generate_table_images: Option<bool>,
    pub images_scale: Option<f32>,
}

impl ImageOverride {
    fn apply_to(&self, s: &mut ImageSettings) {
        set(&mut s.extract, &self.extract);
        set(&mut s.classify, &self.classify);
        set(&mut s.generate_page_images, &self.generate_page_images);
        set(
            &mut s.generate_picture_images,
            &self.generate_picture_images,
        );
        set(&mut s.generate_table_images, &self.generate_table_images);
        set(&mut s.images_scale, &self.images_scale);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputOverride {
    pub default_format: Option<ExportFormat>,
    pub formats: Option<Vec<ExportFormat>>,
}

impl OutputOverride {
    fn apply_to(&self, s: &mut OutputSettings) {
        set(&mut s.default_format, &self.default_format);
        set(&mut s.formats, &self.formats);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceOverride {
    pub device: Option<Device>,
    pub num_threads: Option<usize>,
    pub document_timeout: Option<u64>,
}

impl PerformanceOverride {
    fn apply_to(&self, s: &mut PerformanceSettings) {
        set(&mut s.device, &self.device);
        set(&mut s.num_threads, &self.num_threads);
        if self.document_timeout.is_some() {
            s.document_timeout = self.document_timeout;
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingOverride {
    pub enabled: Option<bool>,
    pub max_tokens: Option<usize>,
    pub merge_peers: Option<bool>,
}

impl ChunkingOverride {
    fn apply_to(&self, s: &mut ChunkingSettings) {
        set(&mut s.enabled, &self.enabled);
        set(&mut s.max_tokens, &self.max_tokens);
        set(&mut s.merge_peers, &self.merge_peers);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrichmentOverride {
    pub code_enrichment: Option<bool>,
    pub formula_enrichment: Option<bool>,
    pub picture_classification: Option<bool>,
    pub picture_description: Option<bool>,
}

impl EnrichmentOverride {
    fn apply_to(&self, s: &mut EnrichmentSettings) {
        set(&mut s.code_enrichment, &self.code_enrichment);
        set(&mut s.formula_enrichment, &self.formula_enrichment);
        set(&mut s.picture_classification, &self.picture_classification);
        set(&mut s.picture_description, &self.picture_description);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let s = ConversionSettings::default();
        assert!(s.ocr.enabled);
        assert_eq!(s.ocr.language, "en");
        assert_eq!(s.tables.mode, TableMode::Accurate);
        assert!(s.images.generate_picture_images);
        assert!(!s.images.generate_page_images);
        assert_eq!(s.performance.device, Device::Auto);
        assert!(s.performance.num_threads >= 1);
        assert!(s.performance.document_timeout.is_none());
        assert!(!s.chunking.enabled);
        assert_eq!(s.chunking.max_tokens, 512);
        assert_eq!(s.output.formats.len(), ExportFormat::ALL.len());
        assert!(s.validate().is_ok());
    }

    #[test]
    fn test_merge_replaces_only_present_fields() {
        let base = ConversionSettings::default();
        let overrides: SettingsOverride = serde_json::from_str(
            r#"{"ocr": {"language": "de", "backend": "tesseract"}, "chunking": {"enabled": true}}"#,
        )
        .unwrap();

        let merged = base.merged(&overrides);
        assert_eq!(merged.ocr.language, "de");
        assert_eq!(merged.ocr.backend, OcrBackend::Tesseract);
        assert!(merged.ocr.enabled);
        assert!(merged.chunking.enabled);
        assert_eq!(merged.chunking.max_tokens, 512);
        assert_eq!(merged.tables, base.tables);
        // base untouched
        assert_eq!(base.ocr.language, "en");
    }

    #[test]
    fn test_empty_override_is_identity() {
        let base = ConversionSettings::default();
        let overrides = SettingsOverride::default();
        assert!(overrides.is_empty());
        assert_eq!(base.merged(&overrides), base);
    }

    #[test]
    fn test_partial_settings_file_fills_defaults() {
        let settings: ConversionSettings =
            serde_json::from_str(r#"{"performance": {"document_timeout": 30}}"#).unwrap();
        assert_eq!(settings.performance.document_timeout, Some(30));
        assert_eq!(settings.performance.device, Device::Auto);
        assert_eq!(settings.ocr, OcrSettings::default());
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        let mut s = ConversionSettings::default();
        s.performance.num_threads = 0;
        assert!(matches!(
            s.validate(),
            Err(ValidationError::InvalidSettings(msg)) if msg.contains("num_threads")
        ));

        let mut s = ConversionSettings::default();
        s.ocr.confidence_threshold = 1.5;
        assert!(s.validate().is_err());

        let mut s = ConversionSettings::default();
        s.performance.document_timeout = Some(0);
        assert!(s.validate().is_err());

        let mut s = ConversionSettings::default();
        s.output.formats.clear();
        assert!(s.validate().is_err());
    }

    #[test]
    fn test_unknown_backend_is_rejected() {
        let result: Result<SettingsOverride, _> =
            serde_json::from_str(r#"{"ocr": {"backend": "magic"}}"#);
        assert!(result.is_err());
    }
}
