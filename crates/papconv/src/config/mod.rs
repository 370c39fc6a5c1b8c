pub mod formats;
pub mod loader;
pub mod schema;
pub mod settings;
pub mod store;

pub use formats::{
    extension_of, ExportFormat, ExportFormatInfo, InputFormat, InputFormatInfo, SupportedFormats,
};
pub use loader::{load_config, load_config_from_str};
pub use schema::{LoggingConfig, ServiceConfig};
pub use settings::{
    ChunkingSettings, ConversionSettings, Device, EnrichmentSettings, ImageSettings, OcrBackend,
    OcrSettings, OutputSettings, PerformanceSettings, SettingsOverride, TableMode, TableSettings,
};
pub use store::{JsonSettingsStore, MemorySettingsStore, SettingsStore};
