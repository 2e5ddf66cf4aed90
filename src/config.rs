//! Engine configuration, loaded from an optional JSON file.

use crate::database;
use crate::diagnosis::ClassifierConfig;
use crate::error::{RecoveryError, Result};
use crate::types::{CardFormat, ScanOptions};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// All fields are optional in the file; missing ones take their defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub classifier: ClassifierConfig,
    /// Searched before the environment path list and `./signatures`
    pub database_paths: Vec<PathBuf>,
    /// Consult `MEMCARD_RECOVERY_DB`
    pub use_env_search_path: bool,
    /// Skip format detection
    pub format: Option<CardFormat>,
    pub scan: ScanOptions,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            classifier: ClassifierConfig::default(),
            database_paths: Vec::new(),
            use_env_search_path: true,
            format: None,
            scan: ScanOptions::default(),
        }
    }
}

impl EngineConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read(path).map_err(|err| {
            RecoveryError::Config(format!("cannot read {}: {}", path.display(), err))
        })?;
        let config: Self = serde_json::from_slice(&data)
            .map_err(|err| RecoveryError::Config(format!("{}: {}", path.display(), err)))?;
        config.validate()?;
        log::debug!("loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let threshold = self.classifier.blank_header_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(RecoveryError::Config(format!(
                "blank_header_threshold must be within 0..=1, got {threshold}"
            )));
        }
        Ok(())
    }

    /// `extra` paths first, then the configured ones, then the defaults
    pub fn search_paths(&self, extra: &[PathBuf]) -> Vec<PathBuf> {
        let explicit: Vec<PathBuf> = extra
            .iter()
            .chain(self.database_paths.iter())
            .cloned()
            .collect();
        database::search_paths(&explicit, self.use_env_search_path)
    }
}
