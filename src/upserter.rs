//! Promotes the latest record per key from a lineage-carrying table

use crate::error::{Result, StrataError};
use crate::pipe::FrameMap;
use crate::quality::{FILE_MOD_TS, FILE_PATH, TableQuality};
use crate::table::{Table, WriteMode, latest_per_key};
use polars::prelude::*;

/// Reads a raw or conformed `source` and upserts its newest row per primary
/// key of `table` (canonical or standard)
#[derive(Debug, Clone)]
pub struct Upserter {
    source: Table,
    table: Table,
}

impl Upserter {
    pub fn new(source: Table, table: Table) -> Result<Self> {
        if !matches!(source.quality(), TableQuality::Raw | TableQuality::Conformed) {
            return Err(StrataError::invalid_argument(
                "source",
                format!("{} must be a raw or conformed table", source.id()),
            ));
        }
        if !matches!(table.quality(), TableQuality::Canonical | TableQuality::Standard) {
            return Err(StrataError::invalid_argument(
                "table",
                format!("{} must be a canonical or standard table", table.id()),
            ));
        }
        if table.primary_keys().is_empty() {
            return Err(StrataError::MissingPrimaryKeys { table: table.id() });
        }
        if let Some(key) = table
            .primary_keys()
            .iter()
            .find(|k| !source.storage_schema().contains(k))
        {
            return Err(StrataError::invalid_argument(
                "primary_keys",
                format!("key '{key}' is not a column of {}", source.id()),
            ));
        }
        Ok(Self { source, table })
    }

    pub fn source(&self) -> &Table {
        &self.source
    }

    pub fn table(&self) -> &Table {
        &self.table
    }

    pub fn write_mode(&self) -> WriteMode {
        WriteMode::Upsert
    }

    pub fn load(&self) -> Result<FrameMap> {
        let mut frames = FrameMap::new();
        frames.insert(self.source.id(), self.source.read()?);
        Ok(frames)
    }

    /// Newest row per key; files are ranked by path, then modification time
    pub fn transform(&self, frames: &FrameMap) -> Result<DataFrame> {
        let df = match frames.get(&self.source.id()) {
            Some(df) => df.clone(),
            None => DataFrame::empty_with_schema(self.source.processing_schema()),
        };
        let order = [FILE_PATH.to_owned(), FILE_MOD_TS.to_owned()];
        Ok(latest_per_key(df.lazy(), self.table.primary_keys(), &order, true).collect()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metastore::Metastore;
    use crate::schema_map::{PrimitiveType, StorageField, StorageSchema};
    use crate::table::TableDefinition;
    use tempfile::TempDir;

    fn schema() -> StorageSchema {
        StorageSchema::new(vec![
            StorageField::new("id", PrimitiveType::String),
            StorageField::new("name", PrimitiveType::String),
        ])
    }

    fn tables(metastore: &Metastore) -> Result<(Table, Table)> {
        let source = Table::new(
            metastore,
            TableDefinition::new("test", TableQuality::Conformed, "name", schema()),
        )?;
        let target = Table::new(
            metastore,
            TableDefinition::new("test", TableQuality::Canonical, "name", schema())
                .with_primary_keys(&["id"]),
        )?;
        Ok((source, target))
    }

    #[test]
    fn test_quality_constraints() -> Result<()> {
        let dir = TempDir::new()?;
        let metastore = Metastore::new(dir.path())?;
        let (source, target) = tables(&metastore)?;

        assert!(Upserter::new(target.clone(), target.clone()).is_err());
        assert!(Upserter::new(source.clone(), source.clone()).is_err());

        let keyless = Table::new(
            &metastore,
            TableDefinition::new("test", TableQuality::Canonical, "keyless", schema()),
        )?;
        assert!(matches!(
            Upserter::new(source.clone(), keyless),
            Err(StrataError::MissingPrimaryKeys { .. })
        ));
        assert!(Upserter::new(source, target).is_ok());
        Ok(())
    }

    #[test]
    fn test_keeps_latest_file_per_key() -> Result<()> {
        let dir = TempDir::new()?;
        let metastore = Metastore::new(dir.path())?;
        let (source, target) = tables(&metastore)?;

        let df = df! {
            FILE_PATH => ["in/2024-01-01/a.json", "in/2024-02-01/a.json", "in/2024-01-01/a.json"],
            FILE_MOD_TS => [1i64, 2, 1],
            "id" => ["1", "1", "2"],
            "name" => ["old", "new", "only"],
        }?;
        let upserter = Upserter::new(source.clone(), target)?;
        let mut frames = FrameMap::new();
        frames.insert(source.id(), df);

        let out = upserter
            .transform(&frames)?
            .sort(["id"], SortMultipleOptions::default())?;
        let names: Vec<&str> = out.column("name")?.str()?.into_no_null_iter().collect();
        assert_eq!(names, vec!["new", "only"]);
        Ok(())
    }
}
