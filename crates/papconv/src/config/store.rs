use std::path::{Path, PathBuf};
use std::sync::RwLock;

use crate::config::settings::ConversionSettings;
use crate::error::ConfigError;

/// Source of the base conversion settings that submissions merge over.
pub trait SettingsStore: Send + Sync {
    fn load(&self) -> Result<ConversionSettings, ConfigError>;

    fn save(&self, settings: &ConversionSettings) -> Result<(), ConfigError>;

    fn reset(&self) -> Result<ConversionSettings, ConfigError> {
        let defaults = ConversionSettings::default();
        self.save(&defaults)?;
        Ok(defaults)
    }
}

/// Settings persisted as a JSON file merged over the defaults.
pub struct JsonSettingsStore {
    path: PathBuf,
}

impl JsonSettingsStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SettingsStore for JsonSettingsStore {
    fn load(&self) -> Result<ConversionSettings, ConfigError> {
        if !self.path.exists() {
            return Ok(ConversionSettings::default());
        }

        let content = std::fs::read_to_string(&self.path).map_err(|e| ConfigError::ReadFile {
            path: self.path.clone(),
            source: e,
        })?;

        match serde_json::from_str::<ConversionSettings>(&content) {
            Ok(settings) => Ok(settings),
            Err(e) => {
                log::warn!(
                    "Ignoring unreadable settings file {}: {}",
                    self.path.display(),
                    e
                );
                Ok(ConversionSettings::default())
            }
        }
    }

    fn save(&self, settings: &ConversionSettings) -> Result<(), ConfigError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::WriteFile {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let content = serde_json::to_string_pretty(settings)?;
        std::fs::write(&self.path, content).map_err(|e| ConfigError::WriteFile {
            path: self.path.clone(),
            source: e,
        })?;

        log::debug!("Saved settings to {}", self.path.display());
        Ok(())
    }
}

#[derive(Default)]
pub struct MemorySettingsStore {
    settings: RwLock<ConversionSettings>,
}

impl MemorySettingsStore {
    pub fn new(settings: ConversionSettings) -> Self {
        Self {
            settings: RwLock::new(settings),
        }
    }
}

impl SettingsStore for MemorySettingsStore {
    fn load(&self) -> Result<ConversionSettings, ConfigError> {
        let guard = self.settings.read().unwrap_or_else(|poisoned| {
            log::warn!("Settings lock was poisoned, recovering");
            poisoned.into_inner()
        });
        Ok(guard.clone())
    }

    fn save(&self, settings: &ConversionSettings) -> Result<(), ConfigError> {
        let mut guard = self.settings.write().unwrap_or_else(|poisoned| {
            log::warn!("Settings lock was poisoned, recovering");
            poisoned.into_inner()
        });
        *guard = settings.clone();
        Ok(())
    }
}
