//! Engine configuration
//!
//! Settings live in a JSON file (by default `{data_dir}/strata/config.json`)
//! and can be overridden from the environment:
//!
//! - `STRATA_ROOT`: storage root of the metastore
//! - `STRATA_LOG_LEVEL`: default log filter when `RUST_LOG` is unset

use crate::error::{Result, ResultExt as _, StrataError};
use crate::exporter::ExportFormat;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const ROOT_ENV: &str = "STRATA_ROOT";
pub const LOG_LEVEL_ENV: &str = "STRATA_LOG_LEVEL";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Storage root holding `tables/` and `volumes/`
    pub root: PathBuf,
    /// Where rolling log files go; `None` uses the platform data directory
    pub log_dir: Option<PathBuf>,
    /// Default tracing filter (e.g. `info`, `strata=debug`)
    pub log_level: String,
    /// Format used by exporters that do not name one
    pub default_export_format: ExportFormat,
    /// Raise `EmptyPipelineResult` when a pipe produces no rows
    pub strict: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            root: app_dir().join("lakehouse"),
            log_dir: None,
            log_level: "info".to_owned(),
            default_export_format: ExportFormat::Csv,
            strict: false,
        }
    }
}

fn app_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("strata")
}

/// Location of the default configuration file
pub fn default_config_path() -> PathBuf {
    app_dir().join("config.json")
}

impl EngineConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| StrataError::Config(e.to_string()))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(StrataError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        Self::from_json(&content)
    }

    /// Loads the default config file, falling back to defaults when absent
    pub fn load_or_default() -> Result<Self> {
        let path = default_config_path();
        let config = if path.exists() {
            Self::from_file(&path)?
        } else {
            Self::default()
        };
        Ok(config.apply_env_overrides())
    }

    pub fn to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn apply_env_overrides(self) -> Self {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Applies overrides from any key lookup (the process environment in practice)
    pub fn apply_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(root) = lookup(ROOT_ENV).filter(|v| !v.is_empty()) {
            self.root = PathBuf::from(root);
        }
        if let Some(level) = lookup(LOG_LEVEL_ENV).filter(|v| !v.is_empty()) {
            self.log_level = level;
        }
        self
    }

    pub fn log_dir(&self) -> PathBuf {
        self.log_dir
            .clone()
            .unwrap_or_else(|| app_dir().join("logs"))
    }
}
