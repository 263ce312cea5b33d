//! Table storage backend
//!
//! The engine talks to physical storage only through [`TableStore`]: create a
//! table location, read it whole, write with append/overwrite semantics,
//! merge on keys, drop. [`ParquetStore`] keeps each table as a directory:
//!
//! ```text
//! {table}/
//!   _schema.json
//!   part-00000-{uuid}.parquet
//!   region=EU/part-00001-{uuid}.parquet   (when partitioned)
//! ```
//!
//! Part files carry a monotonically increasing sequence number so that reads
//! return rows in write order.

use crate::error::{Result, ResultExt as _, StrataError};
use crate::schema_map::{StorageSchema, align_schema};
use polars::prelude::*;
use std::fmt;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub const SCHEMA_FILE: &str = "_schema.json";
const PART_PREFIX: &str = "part-";
const HIVE_NULL: &str = "__HIVE_DEFAULT_PARTITION__";

/// Write semantics understood by the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveMode {
    Append,
    Overwrite,
}

/// Key-equality merge condition between a source (`s`) and target (`t`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergePredicate {
    keys: Vec<String>,
}

impl MergePredicate {
    /// Returns `None` when there are no keys to match on
    pub fn new(keys: &[String]) -> Option<Self> {
        if keys.is_empty() {
            None
        } else {
            Some(Self {
                keys: keys.to_vec(),
            })
        }
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    fn key_exprs(&self) -> Vec<Expr> {
        self.keys.iter().map(|k| col(k.as_str())).collect()
    }
}

impl fmt::Display for MergePredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let clauses: Vec<String> = self.keys.iter().map(|k| format!("s.{k} = t.{k}")).collect();
        f.write_str(&clauses.join(" AND "))
    }
}

/// Transactional table storage, addressed by location
pub trait TableStore: fmt::Debug + Send + Sync {
    fn exists(&self, location: &Path) -> bool;

    /// Creates the location and records its schema; no-op if it already exists
    fn create(&self, location: &Path, schema: &StorageSchema) -> Result<()>;

    fn read_schema(&self, location: &Path) -> Result<StorageSchema>;

    /// Current contents aligned to `schema`; empty frame if nothing was written
    fn read(&self, location: &Path, schema: &Schema) -> Result<DataFrame>;

    fn write(
        &self,
        location: &Path,
        df: &DataFrame,
        mode: SaveMode,
        partition_keys: &[String],
    ) -> Result<()>;

    /// Replaces target rows matching `source` on the predicate keys, inserts the rest
    fn merge(
        &self,
        location: &Path,
        source: &DataFrame,
        predicate: &MergePredicate,
        partition_keys: &[String],
    ) -> Result<()>;

    /// Removes the location; succeeds if it is already gone
    fn delete(&self, location: &Path) -> Result<()>;
}

/// Directory-of-parquet-files store
#[derive(Debug, Default, Clone, Copy)]
pub struct ParquetStore;

impl ParquetStore {
    pub fn new() -> Self {
        Self
    }

    /// Part files under `location`, in write order
    fn part_files(location: &Path) -> Result<Vec<PathBuf>> {
        let mut parts = Vec::new();
        if location.is_dir() {
            collect_parts(location, &mut parts)?;
        }
        parts.sort_by(|a, b| {
            part_sequence(a)
                .cmp(&part_sequence(b))
                .then_with(|| a.cmp(b))
        });
        Ok(parts)
    }

    fn next_sequence(location: &Path) -> Result<u64> {
        Ok(Self::part_files(location)?
            .iter()
            .filter_map(|p| part_sequence(p))
            .max()
            .map_or(0, |s| s + 1))
    }

    fn write_part(dir: &Path, sequence: u64, df: &mut DataFrame) -> Result<PathBuf> {
        fs::create_dir_all(dir)?;
        let path = dir.join(format!("{PART_PREFIX}{sequence:05}-{}.parquet", Uuid::new_v4()));
        let file = File::create(&path)
            .with_context(|| format!("Failed to create part file {}", path.display()))?;
        ParquetWriter::new(file).finish(df)?;
        Ok(path)
    }

    fn write_parts(
        location: &Path,
        df: &DataFrame,
        partition_keys: &[String],
        sequence: u64,
    ) -> Result<Vec<PathBuf>> {
        if df.height() == 0 {
            return Ok(Vec::new());
        }
        if partition_keys.is_empty() {
            let mut df = df.clone();
            return Ok(vec![Self::write_part(location, sequence, &mut df)?]);
        }

        let mut written = Vec::new();
        for mut partition in df.partition_by_stable(partition_keys.iter().map(String::as_str), true)? {
            let mut dir = location.to_path_buf();
            for key in partition_keys {
                let value = partition.column(key)?.get(0)?;
                dir.push(format!("{key}={}", hive_value(&value)));
            }
            written.push(Self::write_part(&dir, sequence, &mut partition)?);
        }
        Ok(written)
    }
}

fn collect_parts(dir: &Path, parts: &mut Vec<PathBuf>) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_parts(&path, parts)?;
        } else if path.extension().and_then(|e| e.to_str()) == Some("parquet")
            && path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(PART_PREFIX))
        {
            parts.push(path);
        }
    }
    Ok(())
}

fn part_sequence(path: &Path) -> Option<u64> {
    path.file_name()?
        .to_str()?
        .strip_prefix(PART_PREFIX)?
        .split('-')
        .next()?
        .parse()
        .ok()
}

fn hive_value(value: &AnyValue<'_>) -> String {
    if value.is_null() {
        HIVE_NULL.to_owned()
    } else {
        value.str_value().replace('/', "%2F")
    }
}

/// Removes now-empty partition directories below `location`
fn prune_empty_dirs(location: &Path) -> Result<()> {
    for entry in fs::read_dir(location)? {
        let path = entry?.path();
        if path.is_dir() {
            prune_empty_dirs(&path)?;
            if fs::read_dir(&path)?.next().is_none() {
                fs::remove_dir(&path)?;
            }
        }
    }
    Ok(())
}

impl TableStore for ParquetStore {
    fn exists(&self, location: &Path) -> bool {
        location.join(SCHEMA_FILE).is_file()
    }

    fn create(&self, location: &Path, schema: &StorageSchema) -> Result<()> {
        if self.exists(location) {
            return Ok(());
        }
        fs::create_dir_all(location)
            .with_context(|| format!("Failed to create table directory {}", location.display()))?;
        fs::write(location.join(SCHEMA_FILE), schema.to_json()?)?;
        tracing::debug!("Created table location {}", location.display());
        Ok(())
    }

    fn read_schema(&self, location: &Path) -> Result<StorageSchema> {
        let path = location.join(SCHEMA_FILE);
        if !path.is_file() {
            return Err(StrataError::Storage(format!(
                "No table at {}",
                location.display()
            )));
        }
        StorageSchema::from_json(&fs::read_to_string(path)?)
    }

    fn read(&self, location: &Path, schema: &Schema) -> Result<DataFrame> {
        let parts = Self::part_files(location)?;
        if parts.is_empty() {
            return Ok(DataFrame::empty_with_schema(schema));
        }

        let frames = parts
            .iter()
            .map(|path| {
                let file = File::open(path)
                    .with_context(|| format!("Failed to open part file {}", path.display()))?;
                let df = ParquetReader::new(file).finish()?;
                Ok(align_schema(df, schema)?.lazy())
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(concat(frames, UnionArgs::default())?.collect()?)
    }

    fn write(
        &self,
        location: &Path,
        df: &DataFrame,
        mode: SaveMode,
        partition_keys: &[String],
    ) -> Result<()> {
        fs::create_dir_all(location)?;
        let previous = match mode {
            SaveMode::Append => Vec::new(),
            SaveMode::Overwrite => Self::part_files(location)?,
        };

        let sequence = Self::next_sequence(location)?;
        let written = Self::write_parts(location, df, partition_keys, sequence)?;

        for path in &previous {
            fs::remove_file(path)?;
        }
        if mode == SaveMode::Overwrite {
            prune_empty_dirs(location)?;
        }

        tracing::debug!(
            rows = df.height(),
            parts = written.len(),
            replaced = previous.len(),
            "Wrote {}",
            location.display()
        );
        Ok(())
    }

    fn merge(
        &self,
        location: &Path,
        source: &DataFrame,
        predicate: &MergePredicate,
        partition_keys: &[String],
    ) -> Result<()> {
        let schema = self.read_schema(location)?.to_processing();
        let target = self.read(location, &schema)?;
        let source = align_schema(source.clone(), &schema)?;

        let unmatched = target.lazy().join(
            source.clone().lazy(),
            predicate.key_exprs(),
            predicate.key_exprs(),
            JoinArgs::new(JoinType::Anti),
        );
        let merged = concat([unmatched, source.lazy()], UnionArgs::default())?.collect()?;

        tracing::debug!("Merging into {} on {}", location.display(), predicate);
        self.write(location, &merged, SaveMode::Overwrite, partition_keys)
    }

    fn delete(&self, location: &Path) -> Result<()> {
        if location.exists() {
            fs::remove_dir_all(location)
                .with_context(|| format!("Failed to drop {}", location.display()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema_map::{PrimitiveType, StorageField};
    use tempfile::TempDir;

    fn schema() -> StorageSchema {
        StorageSchema::new(vec![
            StorageField::new("id", PrimitiveType::Long),
            StorageField::new("region", PrimitiveType::String),
            StorageField::new("amount", PrimitiveType::Double),
        ])
    }

    fn frame(ids: &[i64], regions: &[&str], amounts: &[f64]) -> DataFrame {
        df! {
            "id" => ids,
            "region" => regions,
            "amount" => amounts,
        }
        .expect("valid frame")
    }

    fn ids(df: &DataFrame) -> Result<Vec<i64>> {
        Ok(df.column("id")?.i64()?.into_no_null_iter().collect())
    }

    #[test]
    fn test_create_read_empty() -> Result<()> {
        let dir = TempDir::new()?;
        let location = dir.path().join("sales");
        let store = ParquetStore::new();

        assert!(!store.exists(&location));
        store.create(&location, &schema())?;
        assert!(store.exists(&location));
        assert_eq!(store.read_schema(&location)?, schema());

        let df = store.read(&location, &schema().to_processing())?;
        assert_eq!(df.height(), 0);
        assert_eq!(df.width(), 3);
        Ok(())
    }

    #[test]
    fn test_append_then_overwrite() -> Result<()> {
        let dir = TempDir::new()?;
        let location = dir.path().join("sales");
        let store = ParquetStore::new();
        let processing = schema().to_processing();
        store.create(&location, &schema())?;

        store.write(&location, &frame(&[1, 2], &["EU", "US"], &[1.0, 2.0]), SaveMode::Append, &[])?;
        store.write(&location, &frame(&[3], &["EU"], &[3.0]), SaveMode::Append, &[])?;
        assert_eq!(ids(&store.read(&location, &processing)?)?, vec![1, 2, 3]);

        store.write(&location, &frame(&[9], &["US"], &[9.0]), SaveMode::Overwrite, &[])?;
        assert_eq!(ids(&store.read(&location, &processing)?)?, vec![9]);
        assert_eq!(ParquetStore::part_files(&location)?.len(), 1);
        Ok(())
    }

    #[test]
    fn test_partitioned_layout() -> Result<()> {
        let dir = TempDir::new()?;
        let location = dir.path().join("sales");
        let store = ParquetStore::new();
        store.create(&location, &schema())?;

        let keys = vec!["region".to_owned()];
        store.write(
            &location,
            &frame(&[1, 2, 3], &["EU", "US", "EU"], &[1.0, 2.0, 3.0]),
            SaveMode::Append,
            &keys,
        )?;
        assert!(location.join("region=EU").is_dir());
        assert!(location.join("region=US").is_dir());

        let df = store.read(&location, &schema().to_processing())?;
        assert_eq!(df.height(), 3);

        store.write(&location, &frame(&[4], &["EU"], &[4.0]), SaveMode::Overwrite, &keys)?;
        assert!(!location.join("region=US").exists());
        Ok(())
    }

    #[test]
    fn test_merge_replaces_and_inserts() -> Result<()> {
        let dir = TempDir::new()?;
        let location = dir.path().join("sales");
        let store = ParquetStore::new();
        store.create(&location, &schema())?;
        store.write(&location, &frame(&[1, 2], &["EU", "US"], &[1.0, 2.0]), SaveMode::Append, &[])?;

        let keys = vec!["id".to_owned()];
        let predicate = MergePredicate::new(&keys).expect("keys present");
        store.merge(&location, &frame(&[2, 3], &["US", "EU"], &[20.0, 30.0]), &predicate, &[])?;

        let df = store
            .read(&location, &schema().to_processing())?
            .sort(["id"], SortMultipleOptions::default())?;
        assert_eq!(ids(&df)?, vec![1, 2, 3]);
        let amounts: Vec<f64> = df.column("amount")?.f64()?.into_no_null_iter().collect();
        assert_eq!(amounts, vec![1.0, 20.0, 30.0]);
        Ok(())
    }

    #[test]
    fn test_merge_predicate_rendering() {
        let keys = vec!["id".to_owned(), "region".to_owned()];
        let predicate = MergePredicate::new(&keys).expect("keys present");
        assert_eq!(predicate.to_string(), "s.id = t.id AND s.region = t.region");
        assert!(MergePredicate::new(&[]).is_none());
    }

    #[test]
    fn test_drop_is_idempotent() -> Result<()> {
        let dir = TempDir::new()?;
        let location = dir.path().join("sales");
        let store = ParquetStore::new();
        store.create(&location, &schema())?;
        store.delete(&location)?;
        assert!(!location.exists());
        store.delete(&location)?;
        Ok(())
    }
}
