//! Storage root and path layout
//!
//! ```text
//! {root}/tables/{domain}/{quality}/{name}                     table data
//! {root}/tables/{domain}/{quality}/{name}.quarantine/{kind}   quarantined rows
//! {root}/volumes/ingestion/{domain}/{name}                   inbound files
//! {root}/volumes/state/{domain}/{quality}/{name}/.STATE      last-write marker
//! {root}/volumes/exports/{domain}/{quality}/{name}           export output
//! ```

use crate::check::CheckAction;
use crate::config::EngineConfig;
use crate::error::{Result, ResultExt as _};
use crate::quality::TableQuality;
use crate::store::{ParquetStore, TableStore};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const STATE_FILE: &str = ".STATE";

/// Root of a lakehouse plus the store that owns its tables
#[derive(Debug, Clone)]
pub struct Metastore {
    root: PathBuf,
    store: Arc<dyn TableStore>,
}

impl Metastore {
    /// Opens (creating if needed) a metastore at `root` backed by [`ParquetStore`]
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        for dir in [root.join("tables"), root.join("volumes")] {
            fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }
        tracing::debug!("Opened metastore at {}", root.display());
        Ok(Self {
            root,
            store: Arc::new(ParquetStore::new()),
        })
    }

    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        Self::new(config.root.clone())
    }

    /// Swaps the table storage backend
    pub fn with_store(mut self, store: Arc<dyn TableStore>) -> Self {
        self.store = store;
        self
    }

    pub fn store(&self) -> &dyn TableStore {
        self.store.as_ref()
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn tables_root(&self) -> PathBuf {
        self.root.join("tables")
    }

    pub fn volumes_root(&self) -> PathBuf {
        self.root.join("volumes")
    }

    pub fn table_dir(&self, domain: &str, quality: TableQuality, name: &str) -> PathBuf {
        self.tables_root()
            .join(domain)
            .join(quality.as_str())
            .join(name)
    }

    pub fn quarantine_dir(
        &self,
        domain: &str,
        quality: TableQuality,
        name: &str,
        kind: CheckAction,
    ) -> PathBuf {
        self.tables_root()
            .join(domain)
            .join(quality.as_str())
            .join(format!("{name}.quarantine"))
            .join(kind.quarantine_name())
    }

    pub fn ingestion_zone(&self, domain: &str, name: &str) -> PathBuf {
        self.volumes_root().join("ingestion").join(domain).join(name)
    }

    pub fn state_dir(&self, domain: &str, quality: TableQuality, name: &str) -> PathBuf {
        self.volumes_root()
            .join("state")
            .join(domain)
            .join(quality.as_str())
            .join(name)
    }

    pub fn state_file(&self, domain: &str, quality: TableQuality, name: &str) -> PathBuf {
        self.state_dir(domain, quality, name).join(STATE_FILE)
    }

    pub fn exports_dir(&self, domain: &str, quality: TableQuality, name: &str) -> PathBuf {
        self.volumes_root()
            .join("exports")
            .join(domain)
            .join(quality.as_str())
            .join(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_layout() -> Result<()> {
        let dir = TempDir::new()?;
        let metastore = Metastore::new(dir.path())?;
        assert!(dir.path().join("tables").is_dir());
        assert!(dir.path().join("volumes").is_dir());

        assert_eq!(
            metastore.table_dir("hr", TableQuality::Conformed, "activity"),
            dir.path().join("tables/hr/conformed/activity")
        );
        assert_eq!(
            metastore.quarantine_dir("hr", TableQuality::Raw, "files", CheckAction::Quarantine),
            dir.path().join("tables/hr/raw/files.quarantine/quarantined")
        );
        assert_eq!(
            metastore.ingestion_zone("hr", "files"),
            dir.path().join("volumes/ingestion/hr/files")
        );
        assert_eq!(
            metastore.state_file("hr", TableQuality::Canonical, "user"),
            dir.path().join("volumes/state/hr/canonical/user/.STATE")
        );
        assert_eq!(
            metastore.exports_dir("hr", TableQuality::Canonical, "user"),
            dir.path().join("volumes/exports/hr/canonical/user")
        );
        Ok(())
    }

    #[test]
    fn test_from_config() -> Result<()> {
        let dir = TempDir::new()?;
        let config = EngineConfig {
            root: dir.path().join("lake"),
            ..EngineConfig::default()
        };
        let metastore = Metastore::from_config(&config)?;
        assert_eq!(metastore.root(), dir.path().join("lake"));
        assert!(metastore.tables_root().is_dir());
        Ok(())
    }
}
