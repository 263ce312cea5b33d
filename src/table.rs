//! Tables: a schema pair, a storage location and the operations on it
//!
//! A table is identified by `{domain}.{quality}.{name}`. Its storage schema is
//! the tier's metadata fields followed by the user-declared ("raw") fields;
//! the processing schema is the polars view of the same fields.
//!
//! Construction validates the definition and creates the storage location
//! (and, for raw tables, the ingestion zone) if missing, so a `Table` value
//! always refers to an existing table.

mod data;
mod options;

pub use data::{TableData, records_to_frame};
pub use options::{FilterValue, GetOptions, latest_per_key};

use crate::check::{CHECK_NAME_COLUMN, CheckAction, CheckOutcome, Test, run_tests};
use crate::error::{Result, StrataError};
use crate::metastore::Metastore;
use crate::quality::TableQuality;
use crate::schema_map::{PrimitiveType, StorageField, StorageSchema, align_schema};
use crate::store::{MergePredicate, SaveMode};
use chrono::{DateTime, Utc};
use polars::prelude::*;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// How a pipe persists its output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum WriteMode {
    Append,
    Overwrite,
    Upsert,
}

impl WriteMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Append => "APPEND",
            Self::Overwrite => "OVERWRITE",
            Self::Upsert => "UPSERT",
        }
    }
}

impl fmt::Display for WriteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WriteMode {
    type Err = StrataError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_uppercase().as_str() {
            "APPEND" => Ok(Self::Append),
            "OVERWRITE" => Ok(Self::Overwrite),
            "UPSERT" => Ok(Self::Upsert),
            _ => Err(StrataError::UnrecognizedWriteLogic {
                value: s.to_owned(),
            }),
        }
    }
}

/// Everything needed to declare a table
#[derive(Debug, Clone)]
pub struct TableDefinition {
    pub domain: String,
    pub quality: TableQuality,
    pub name: String,
    pub raw_schema: StorageSchema,
    pub primary_keys: Vec<String>,
    pub partition_keys: Vec<String>,
    pub tests: Vec<Test>,
}

impl TableDefinition {
    pub fn new(
        domain: impl Into<String>,
        quality: TableQuality,
        name: impl Into<String>,
        raw_schema: StorageSchema,
    ) -> Self {
        Self {
            domain: domain.into(),
            quality,
            name: name.into(),
            raw_schema,
            primary_keys: Vec::new(),
            partition_keys: Vec::new(),
            tests: Vec::new(),
        }
    }

    pub fn with_primary_keys(mut self, keys: &[&str]) -> Self {
        self.primary_keys = keys.iter().map(|k| (*k).to_owned()).collect();
        self
    }

    pub fn with_partition_keys(mut self, keys: &[&str]) -> Self {
        self.partition_keys = keys.iter().map(|k| (*k).to_owned()).collect();
        self
    }

    pub fn with_test(mut self, test: Test) -> Self {
        self.tests.push(test);
        self
    }
}

/// Serializable snapshot of when a table was last written
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LastModifiedRecord {
    pub domain: String,
    pub quality: TableQuality,
    pub table: String,
    pub path: PathBuf,
    pub last_modified_datetime: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct Table {
    metastore: Metastore,
    domain: String,
    quality: TableQuality,
    name: String,
    raw_schema: StorageSchema,
    storage_schema: StorageSchema,
    processing_schema: Schema,
    primary_keys: Vec<String>,
    partition_keys: Vec<String>,
    tests: Vec<Test>,
    merge_predicate: Option<MergePredicate>,
    location: PathBuf,
}

fn validate_definition(def: &TableDefinition, storage_schema: &StorageSchema) -> Result<()> {
    if def.domain.is_empty() || def.name.is_empty() {
        return Err(StrataError::invalid_argument(
            "name",
            "domain and table name must be non-empty",
        ));
    }
    if def.raw_schema.is_empty() {
        return Err(StrataError::invalid_argument(
            "raw_schema",
            "a table needs at least one column",
        ));
    }

    let metadata = def.quality.metadata_schema();
    let mut seen = HashSet::new();
    for field in &def.raw_schema.fields {
        if metadata.contains(&field.name) {
            return Err(StrataError::invalid_argument(
                "raw_schema",
                format!("column '{}' shadows a metadata column", field.name),
            ));
        }
        if !seen.insert(field.name.as_str()) {
            return Err(StrataError::invalid_argument(
                "raw_schema",
                format!("duplicate column '{}'", field.name),
            ));
        }
    }

    for (parameter, keys) in [
        ("primary_keys", &def.primary_keys),
        ("partition_keys", &def.partition_keys),
    ] {
        if let Some(key) = keys.iter().find(|k| !storage_schema.contains(k)) {
            return Err(StrataError::invalid_argument(
                parameter,
                format!("unknown column '{key}'"),
            ));
        }
    }

    for test in &def.tests {
        if !storage_schema.contains(&test.column) {
            return Err(StrataError::invalid_argument(
                "tests",
                format!("check '{}' targets unknown column '{}'", test.check.name, test.column),
            ));
        }
        if storage_schema.contains(&test.result_column()) {
            return Err(StrataError::invalid_argument(
                "tests",
                format!("result column '{}' collides with a data column", test.result_column()),
            ));
        }
    }
    Ok(())
}

impl Table {
    /// Validates `def` and creates the table if it does not exist yet
    pub fn new(metastore: &Metastore, def: TableDefinition) -> Result<Self> {
        let storage_schema = def.quality.metadata_schema().concat(&def.raw_schema);
        validate_definition(&def, &storage_schema)?;

        let location = metastore.table_dir(&def.domain, def.quality, &def.name);
        let merge_predicate = MergePredicate::new(&def.primary_keys);

        let table = Self {
            metastore: metastore.clone(),
            processing_schema: storage_schema.to_processing(),
            storage_schema,
            location,
            merge_predicate,
            domain: def.domain,
            quality: def.quality,
            name: def.name,
            raw_schema: def.raw_schema,
            primary_keys: def.primary_keys,
            partition_keys: def.partition_keys,
            tests: def.tests,
        };

        table.store_create()?;
        if table.quality == TableQuality::Raw {
            fs::create_dir_all(table.ingestion_zone())?;
        }
        tracing::debug!("Initialized table {}", table.id());
        Ok(table)
    }

    /// Creates the table in storage unless it already exists. Writes call
    /// this too, so a dropped table comes back on its next write.
    fn store_create(&self) -> Result<()> {
        self.metastore
            .store()
            .create(&self.location, &self.storage_schema)
    }

    pub fn id(&self) -> String {
        format!("{}.{}.{}", self.domain, self.quality, self.name)
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn quality(&self) -> TableQuality {
        self.quality
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn metastore(&self) -> &Metastore {
        &self.metastore
    }

    /// User-declared fields only
    pub fn raw_schema(&self) -> &StorageSchema {
        &self.raw_schema
    }

    pub fn raw_processing_schema(&self) -> Schema {
        self.raw_schema.to_processing()
    }

    /// Metadata fields followed by the user fields
    pub fn storage_schema(&self) -> &StorageSchema {
        &self.storage_schema
    }

    pub fn processing_schema(&self) -> &Schema {
        &self.processing_schema
    }

    pub fn columns(&self) -> Vec<&str> {
        self.storage_schema.columns()
    }

    pub fn primary_keys(&self) -> &[String] {
        &self.primary_keys
    }

    pub fn partition_keys(&self) -> &[String] {
        &self.partition_keys
    }

    pub fn tests(&self) -> &[Test] {
        &self.tests
    }

    pub fn has_tests(&self) -> bool {
        !self.tests.is_empty()
    }

    pub fn merge_predicate(&self) -> Option<&MergePredicate> {
        self.merge_predicate.as_ref()
    }

    pub fn location(&self) -> &Path {
        &self.location
    }

    pub fn ingestion_zone(&self) -> PathBuf {
        self.metastore.ingestion_zone(&self.domain, &self.name)
    }

    pub fn exports_dir(&self) -> PathBuf {
        self.metastore
            .exports_dir(&self.domain, self.quality, &self.name)
    }

    pub fn state_file(&self) -> PathBuf {
        self.metastore
            .state_file(&self.domain, self.quality, &self.name)
    }

    pub fn quarantine_location(&self, kind: CheckAction) -> PathBuf {
        self.metastore
            .quarantine_dir(&self.domain, self.quality, &self.name, kind)
    }

    /// Reads the current contents, then applies `options`
    pub fn get(&self, options: &GetOptions) -> Result<DataFrame> {
        options.validate(&self.processing_schema)?;
        let df = self
            .metastore
            .store()
            .read(&self.location, &self.processing_schema)?;
        options.apply(df)
    }

    /// Full contents in storage order
    pub fn read(&self) -> Result<DataFrame> {
        self.get(&GetOptions::default())
    }

    /// Coerces `data` into a frame with this table's processing schema
    pub fn to_frame(&self, data: impl Into<TableData>) -> Result<DataFrame> {
        data.into().to_frame(&self.processing_schema)
    }

    pub fn append(&self, data: impl Into<TableData>) -> Result<()> {
        let df = self.to_frame(data)?;
        self.store_create()?;
        self.metastore
            .store()
            .write(&self.location, &df, SaveMode::Append, &self.partition_keys)?;
        tracing::info!(rows = df.height(), "Appended to {}", self.id());
        self.touch_state_file()
    }

    pub fn overwrite(&self, data: impl Into<TableData>) -> Result<()> {
        let df = self.to_frame(data)?;
        self.store_create()?;
        self.metastore
            .store()
            .write(&self.location, &df, SaveMode::Overwrite, &self.partition_keys)?;
        tracing::info!(rows = df.height(), "Overwrote {}", self.id());
        self.touch_state_file()
    }

    /// Merges on the primary keys: matches are replaced, the rest inserted
    pub fn upsert(&self, data: impl Into<TableData>) -> Result<()> {
        if self.primary_keys.is_empty() {
            return Err(StrataError::MissingPrimaryKeys { table: self.id() });
        }
        let predicate = self
            .merge_predicate
            .as_ref()
            .ok_or_else(|| StrataError::MergePredicateUnavailable { table: self.id() })?;

        let df = self.to_frame(data)?;
        self.store_create()?;
        self.metastore
            .store()
            .merge(&self.location, &df, predicate, &self.partition_keys)?;
        tracing::info!(rows = df.height(), "Upserted into {} on {}", self.id(), predicate);
        self.touch_state_file()
    }

    pub fn truncate(&self) -> Result<()> {
        self.overwrite(DataFrame::empty_with_schema(&self.processing_schema))
    }

    /// Removes the table and its quarantine locations; a no-op when already gone
    pub fn drop(&self) -> Result<()> {
        let store = self.metastore.store();
        store.delete(&self.location)?;
        if let Some(quarantine_root) = self.quarantine_location(CheckAction::Fail).parent() {
            store.delete(quarantine_root)?;
        }
        tracing::info!("Dropped {}", self.id());
        Ok(())
    }

    /// Partitions `df` by this table's tests
    pub fn apply_tests(&self, df: DataFrame) -> Result<CheckOutcome> {
        run_tests(df, &self.tests)
    }

    fn quarantine_schema(&self) -> StorageSchema {
        self.storage_schema.concat(&StorageSchema::new(vec![StorageField::new(
            CHECK_NAME_COLUMN,
            PrimitiveType::String,
        )]))
    }

    /// Appends rejected rows to their quarantine locations
    pub fn quarantine(&self, outcome: &CheckOutcome) -> Result<()> {
        let storage = self.quarantine_schema();
        let processing = storage.to_processing();
        let store = self.metastore.store();

        for (kind, frame) in [
            (CheckAction::Fail, &outcome.failed),
            (CheckAction::Quarantine, &outcome.quarantined),
        ] {
            if frame.height() == 0 {
                continue;
            }
            let location = self.quarantine_location(kind);
            store.create(&location, &storage)?;
            let frame = align_schema(frame.clone(), &processing)?;
            store.write(&location, &frame, SaveMode::Append, &[])?;
            tracing::warn!(
                rows = frame.height(),
                "Set aside {} row(s) of {}",
                kind.quarantine_name(),
                self.id()
            );
        }
        Ok(())
    }

    /// Rows previously set aside by `kind`; empty when there are none
    pub fn get_quarantine(&self, kind: CheckAction) -> Result<DataFrame> {
        let processing = self.quarantine_schema().to_processing();
        self.metastore
            .store()
            .read(&self.quarantine_location(kind), &processing)
    }

    /// Records a write by rewriting the state marker
    pub fn touch_state_file(&self) -> Result<()> {
        let path = self.state_file();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, Utc::now().to_rfc3339())?;
        Ok(())
    }

    /// Time of the last recorded write
    pub fn last_modified_datetime(&self) -> Result<DateTime<Utc>> {
        let path = self.state_file();
        if !path.is_file() {
            return Err(StrataError::FileNotFound { path });
        }
        Ok(DateTime::<Utc>::from(fs::metadata(&path)?.modified()?))
    }

    pub fn last_modified_record(&self) -> Result<LastModifiedRecord> {
        Ok(LastModifiedRecord {
            domain: self.domain.clone(),
            quality: self.quality,
            table: self.name.clone(),
            path: self.location.clone(),
            last_modified_datetime: self.last_modified_datetime()?,
        })
    }
}
