//! Incremental file ingestion into raw and conformed tables
//!
//! Each run discovers the files in the table's ingestion zone, describes each
//! one with a [`RawMetadata`] record, drops files whose modification time is
//! not newer than what the table already holds for that path, and decodes the
//! rest:
//!
//! - a table whose only column is `payload: string` gets each file's full
//!   content as one row;
//! - otherwise the file is parsed (JSON or CSV) against the table's raw schema
//!   and yields one row per record, with the file metadata repeated per row.

use crate::error::{Result, ResultExt as _, StrataError};
use crate::quality::{FILE_MOD_TS, FILE_NAME, FILE_PATH, INGESTED_TS, RAW_ID, TableQuality};
use crate::schema_map::{PrimitiveType, StorageField, fill_schema, timestamp_dtype};
use crate::table::{Table, TableData, WriteMode, records_to_frame};
use chrono::{DateTime, NaiveDate, Utc};
use polars::prelude::*;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use uuid::Uuid;

pub const PAYLOAD: &str = "payload";
const LAST_MOD_TS: &str = "_last_file_mod_ts";

/// How files are laid out in the ingestion zone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectoryType {
    /// Files sit directly in the zone
    Shallow,
    /// One `YYYY-MM-DD`-prefixed subdirectory per batch
    Dated,
}

impl FromStr for DirectoryType {
    type Err = StrataError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "shallow" => Ok(Self::Shallow),
            "dated" => Ok(Self::Dated),
            _ => Err(StrataError::DirectoryTypeNotRecognized {
                value: s.to_owned(),
            }),
        }
    }
}

/// Format of the inbound files
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawFileType {
    Json,
    Csv,
    Text,
}

impl RawFileType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Csv => "csv",
            Self::Text => "text",
        }
    }
}

impl fmt::Display for RawFileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RawFileType {
    type Err = StrataError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "csv" => Ok(Self::Csv),
            "text" | "txt" => Ok(Self::Text),
            _ => Err(StrataError::invalid_argument(
                "raw_file_type",
                format!("unknown file type '{s}'"),
            )),
        }
    }
}

/// Lineage of one ingested file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMetadata {
    pub raw_id: String,
    pub ingested_ts: DateTime<Utc>,
    pub file_path: String,
    pub file_name: String,
    pub file_mod_ts: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct Ingester {
    table: Table,
    directory_type: DirectoryType,
    raw_file_type: RawFileType,
    write_mode: WriteMode,
    date_range: Option<(NaiveDate, NaiveDate)>,
    raw_schema: Schema,
    simple_payload: bool,
}

impl Ingester {
    pub fn new(
        table: Table,
        directory_type: DirectoryType,
        raw_file_type: RawFileType,
        write_mode: WriteMode,
    ) -> Result<Self> {
        // history is read back from the lineage columns, which only these tiers carry
        if !matches!(table.quality(), TableQuality::Raw | TableQuality::Conformed) {
            return Err(StrataError::invalid_argument(
                "table",
                format!("{} does not carry file lineage columns", table.id()),
            ));
        }
        fs::create_dir_all(table.ingestion_zone())?;
        let simple_payload = table.raw_schema().fields
            == [StorageField::new(PAYLOAD, PrimitiveType::String)];
        Ok(Self {
            raw_schema: table.raw_processing_schema(),
            table,
            directory_type,
            raw_file_type,
            write_mode,
            date_range: None,
            simple_payload,
        })
    }

    /// Only ingest DATED batches whose date falls in `start..=end`
    pub fn with_date_range(mut self, start: NaiveDate, end: NaiveDate) -> Self {
        self.date_range = Some((start, end));
        self
    }

    pub fn table(&self) -> &Table {
        &self.table
    }

    pub fn write_mode(&self) -> WriteMode {
        self.write_mode
    }

    pub fn is_simple_payload(&self) -> bool {
        self.simple_payload
    }

    /// Raw metadata columns followed by `payload`
    pub fn payload_schema(&self) -> Schema {
        let mut schema = metadata_schema();
        schema.with_column(PAYLOAD.into(), DataType::String);
        schema
    }

    /// Raw metadata columns followed by the table's own columns
    pub fn output_schema(&self) -> Schema {
        let mut schema = metadata_schema();
        schema.merge(self.raw_schema.clone());
        schema
    }

    /// Files waiting in the ingestion zone, sorted by path
    pub fn discover_files(&self) -> Result<Vec<PathBuf>> {
        let zone = self.table.ingestion_zone();
        if !zone.is_dir() {
            tracing::debug!("Ingestion zone {} does not exist", zone.display());
            return Ok(Vec::new());
        }

        let mut files = match self.directory_type {
            DirectoryType::Shallow => files_in(&zone)?,
            DirectoryType::Dated => {
                let mut files = Vec::new();
                for batch in sorted_entries(&zone)? {
                    if !batch.is_dir() {
                        tracing::warn!("Skipping {}: not a dated directory", batch.display());
                        continue;
                    }
                    if self.in_date_range(&batch) {
                        files.extend(files_in(&batch)?);
                    }
                }
                files
            }
        };
        files.sort();
        tracing::debug!("Discovered {} file(s) for {}", files.len(), self.table.id());
        Ok(files)
    }

    fn in_date_range(&self, batch: &Path) -> bool {
        let Some((start, end)) = self.date_range else {
            return true;
        };
        let name = batch
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        match name
            .get(..10)
            .and_then(|prefix| NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok())
        {
            Some(date) => start <= date && date <= end,
            None => {
                tracing::warn!("Skipping {}: no YYYY-MM-DD prefix", batch.display());
                false
            }
        }
    }

    pub fn build_metadata(&self, path: &Path) -> Result<RawMetadata> {
        if !path.is_file() {
            return Err(StrataError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        let modified = fs::metadata(path)?.modified()?;
        Ok(RawMetadata {
            raw_id: Uuid::new_v4().to_string(),
            ingested_ts: Utc::now(),
            file_path: path.to_string_lossy().into_owned(),
            file_name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            file_mod_ts: DateTime::<Utc>::from(modified),
        })
    }

    /// One row per file with the raw metadata columns
    pub fn metadata_frame(&self, metadata: &[RawMetadata]) -> Result<DataFrame> {
        let micros = |f: fn(&RawMetadata) -> DateTime<Utc>| -> Vec<i64> {
            metadata.iter().map(|m| f(m).timestamp_micros()).collect()
        };
        let columns = vec![
            Column::new(
                RAW_ID.into(),
                metadata.iter().map(|m| m.raw_id.as_str()).collect::<Vec<_>>(),
            ),
            Column::new(INGESTED_TS.into(), micros(|m| m.ingested_ts)).cast(&timestamp_dtype())?,
            Column::new(
                FILE_PATH.into(),
                metadata.iter().map(|m| m.file_path.as_str()).collect::<Vec<_>>(),
            ),
            Column::new(
                FILE_NAME.into(),
                metadata.iter().map(|m| m.file_name.as_str()).collect::<Vec<_>>(),
            ),
            Column::new(FILE_MOD_TS.into(), micros(|m| m.file_mod_ts)).cast(&timestamp_dtype())?,
        ];
        Ok(DataFrame::new(columns)?)
    }

    /// Keeps candidates never recorded in `history` or modified since
    pub fn filter_by_history(&self, candidates: DataFrame, history: &DataFrame) -> Result<DataFrame> {
        if history.height() == 0 || candidates.height() == 0 {
            return Ok(candidates);
        }

        let columns: Vec<Expr> = candidates
            .get_column_names()
            .iter()
            .map(|c| col(c.as_str()))
            .collect();
        let recorded = history
            .clone()
            .lazy()
            .group_by([col(FILE_PATH)])
            .agg([col(FILE_MOD_TS).max().alias(LAST_MOD_TS)]);

        let fresh = candidates
            .lazy()
            .join(
                recorded,
                [col(FILE_PATH)],
                [col(FILE_PATH)],
                JoinArgs::new(JoinType::Left),
            )
            .filter(
                col(FILE_MOD_TS)
                    .gt(col(LAST_MOD_TS))
                    .or(col(LAST_MOD_TS).is_null()),
            )
            .select(columns)
            .collect()?;

        tracing::debug!(
            remaining = fresh.height(),
            "Filtered ingestion candidates for {} by history",
            self.table.id()
        );
        Ok(fresh)
    }

    /// Replaces each metadata row with the decoded file content
    pub fn decode_payload(&self, files: &DataFrame) -> Result<DataFrame> {
        let paths: Vec<String> = files
            .column(FILE_PATH)?
            .str()?
            .into_iter()
            .map(|p| p.unwrap_or_default().to_owned())
            .collect();

        if self.simple_payload {
            let payloads = paths
                .iter()
                .map(|p| {
                    fs::read_to_string(p).with_context(|| format!("Failed to read {p}"))
                })
                .collect::<Result<Vec<_>>>()?;
            let mut df = files.clone();
            df.with_column(Column::new(PAYLOAD.into(), payloads))?;
            return Ok(df);
        }

        let target = self.output_schema();
        let mut decoded = Vec::with_capacity(paths.len());
        for (row, path) in paths.iter().enumerate() {
            let records = self.read_records(Path::new(path))?;
            let offset = i64::try_from(row).map_err(|e| StrataError::Other(e.to_string()))?;
            let lineage = files.slice(offset, 1);
            decoded.push(lineage.lazy().cross_join(records.lazy(), None));
        }
        if decoded.is_empty() {
            return Ok(DataFrame::empty_with_schema(&target));
        }
        let df = concat(decoded, UnionArgs::default())?.collect()?;
        fill_schema(df, &target)
    }

    fn read_records(&self, path: &Path) -> Result<DataFrame> {
        match self.raw_file_type {
            RawFileType::Json => {
                let content = fs::read_to_string(path)?;
                // A whole document (array or single object, any layout), else JSON lines
                if let Ok(document) = serde_json::from_str::<serde_json::Value>(&content) {
                    return TableData::Json(document).to_frame(&self.raw_schema);
                }
                let records = content
                    .lines()
                    .filter(|line| !line.trim().is_empty())
                    .map(serde_json::from_str)
                    .collect::<std::result::Result<Vec<serde_json::Value>, _>>()?;
                records_to_frame(&records, &self.raw_schema)
            }
            RawFileType::Csv => {
                let df = CsvReadOptions::default()
                    .with_has_header(true)
                    .with_schema(Some(Arc::new(self.raw_schema.clone())))
                    .try_into_reader_with_file_path(Some(path.to_path_buf()))?
                    .finish()?;
                fill_schema(df, &self.raw_schema)
            }
            RawFileType::Text => Err(StrataError::NotImplemented {
                format: RawFileType::Text.to_string(),
            }),
        }
    }

    /// The table's recorded file lineage
    pub fn history(&self) -> Result<DataFrame> {
        let history = self.table.read()?;
        Ok(history.select([FILE_PATH, FILE_MOD_TS])?)
    }

    /// Discover, describe, filter and decode against `history`
    pub fn ingest(&self, history: &DataFrame) -> Result<DataFrame> {
        let metadata = self
            .discover_files()?
            .iter()
            .map(|path| self.build_metadata(path))
            .collect::<Result<Vec<_>>>()?;
        let candidates = self.metadata_frame(&metadata)?;
        let fresh = self.filter_by_history(candidates, history)?;
        let df = self.decode_payload(&fresh)?;
        tracing::info!(
            files = fresh.height(),
            rows = df.height(),
            "Ingested new files for {}",
            self.table.id()
        );
        Ok(df)
    }
}

fn metadata_schema() -> Schema {
    TableQuality::Raw.metadata_schema().to_processing()
}

fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = fs::read_dir(dir)?
        .map(|e| e.map(|e| e.path()))
        .collect::<std::io::Result<Vec<_>>>()?;
    entries.sort();
    Ok(entries)
}

fn files_in(dir: &Path) -> Result<Vec<PathBuf>> {
    Ok(sorted_entries(dir)?
        .into_iter()
        .filter(|p| p.is_file())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metastore::Metastore;
    use crate::schema_map::StorageSchema;
    use crate::table::TableDefinition;
    use std::fs::File;
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    fn raw_table(metastore: &Metastore, name: &str, schema: StorageSchema) -> Result<Table> {
        Table::new(metastore, TableDefinition::new("test", TableQuality::Raw, name, schema))
    }

    fn payload_schema() -> StorageSchema {
        StorageSchema::new(vec![StorageField::new(PAYLOAD, PrimitiveType::String)])
    }

    fn activity_schema() -> StorageSchema {
        StorageSchema::new(vec![
            StorageField::new("id", PrimitiveType::String),
            StorageField::new("active_ind", PrimitiveType::Boolean),
        ])
    }

    #[test]
    fn test_directory_type_parsing() {
        assert_eq!("DATED".parse::<DirectoryType>().ok(), Some(DirectoryType::Dated));
        assert!(matches!(
            "deep".parse::<DirectoryType>(),
            Err(StrataError::DirectoryTypeNotRecognized { .. })
        ));
    }

    #[test]
    fn test_rejects_tables_without_lineage() -> Result<()> {
        let dir = TempDir::new()?;
        let metastore = Metastore::new(dir.path())?;
        let table = Table::new(
            &metastore,
            TableDefinition::new("test", TableQuality::Canonical, "x", payload_schema()),
        )?;
        assert!(matches!(
            Ingester::new(table, DirectoryType::Shallow, RawFileType::Json, WriteMode::Append),
            Err(StrataError::InvalidArgument { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_simple_payload_ingest_is_idempotent() -> Result<()> {
        let dir = TempDir::new()?;
        let metastore = Metastore::new(dir.path())?;
        let table = raw_table(&metastore, "files", payload_schema())?;
        let zone = table.ingestion_zone();
        fs::write(zone.join("a.json"), r#"{"id": "1"}"#)?;
        fs::write(zone.join("b.json"), r#"{"id": "2"}"#)?;

        let ingester = Ingester::new(
            table.clone(),
            DirectoryType::Shallow,
            RawFileType::Json,
            WriteMode::Append,
        )?;
        assert!(ingester.is_simple_payload());

        let first = ingester.ingest(&ingester.history()?)?;
        assert_eq!(first.shape(), (2, 6));
        let payload = first.column(PAYLOAD)?.str()?.get(0);
        assert_eq!(payload, Some(r#"{"id": "1"}"#));
        table.append(first)?;

        assert_eq!(ingester.ingest(&ingester.history()?)?.height(), 0);

        let later = SystemTime::now() + Duration::from_secs(60);
        File::options()
            .write(true)
            .open(zone.join("b.json"))?
            .set_modified(later)?;
        let again = ingester.ingest(&ingester.history()?)?;
        assert_eq!(again.height(), 1);
        assert_eq!(again.column(FILE_NAME)?.str()?.get(0), Some("b.json"));
        Ok(())
    }

    #[test]
    fn test_json_records_explode() -> Result<()> {
        let dir = TempDir::new()?;
        let metastore = Metastore::new(dir.path())?;
        let table = raw_table(&metastore, "activity", activity_schema())?;
        let zone = table.ingestion_zone();
        fs::write(
            zone.join("one.json"),
            r#"[{"id": "1", "active_ind": true}, {"id": "2", "active_ind": false}]"#,
        )?;
        fs::write(zone.join("two.json"), "{\"id\": \"3\", \"active_ind\": true}\n")?;

        let ingester = Ingester::new(table, DirectoryType::Shallow, RawFileType::Json, WriteMode::Append)?;
        let df = ingester.ingest(&DataFrame::empty())?;
        assert_eq!(df.height(), 3);
        assert_eq!(df.width(), 7);

        let names: Vec<&str> = df.column(FILE_NAME)?.str()?.into_no_null_iter().collect();
        assert_eq!(names, vec!["one.json", "one.json", "two.json"]);
        Ok(())
    }

    #[test]
    fn test_pretty_printed_json_documents() -> Result<()> {
        let dir = TempDir::new()?;
        let metastore = Metastore::new(dir.path())?;
        let table = raw_table(&metastore, "activity", activity_schema())?;
        let zone = table.ingestion_zone();
        fs::write(
            zone.join("single.json"),
            "{\n  \"id\": \"1\",\n  \"active_ind\": true\n}\n",
        )?;
        fs::write(
            zone.join("many.json"),
            "\n[\n  {\"id\": \"2\"},\n  {\"id\": \"3\", \"active_ind\": false}\n]\n",
        )?;
        fs::write(zone.join("scalar.json"), "42")?;

        let ingester = Ingester::new(table, DirectoryType::Shallow, RawFileType::Json, WriteMode::Append)?;
        assert_eq!(ingester.read_records(&zone.join("single.json"))?.height(), 1);
        assert_eq!(ingester.read_records(&zone.join("many.json"))?.height(), 2);
        assert!(matches!(
            ingester.read_records(&zone.join("scalar.json")),
            Err(StrataError::UnsupportedDataFormat { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_csv_records() -> Result<()> {
        let dir = TempDir::new()?;
        let metastore = Metastore::new(dir.path())?;
        let table = raw_table(&metastore, "activity", activity_schema())?;
        fs::write(
            table.ingestion_zone().join("batch.csv"),
            "id,active_ind\n1,true\n2,false\n",
        )?;

        let ingester = Ingester::new(table, DirectoryType::Shallow, RawFileType::Csv, WriteMode::Append)?;
        let df = ingester.ingest(&DataFrame::empty())?;
        assert_eq!(df.height(), 2);
        assert_eq!(df.column("active_ind")?.dtype(), &DataType::Boolean);
        Ok(())
    }

    #[test]
    fn test_structured_text_not_implemented() -> Result<()> {
        let dir = TempDir::new()?;
        let metastore = Metastore::new(dir.path())?;
        let table = raw_table(&metastore, "activity", activity_schema())?;
        fs::write(table.ingestion_zone().join("notes.txt"), "hello")?;

        let ingester = Ingester::new(table, DirectoryType::Shallow, RawFileType::Text, WriteMode::Append)?;
        assert!(matches!(
            ingester.ingest(&DataFrame::empty()),
            Err(StrataError::NotImplemented { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_dated_discovery_and_range() -> Result<()> {
        let dir = TempDir::new()?;
        let metastore = Metastore::new(dir.path())?;
        let table = raw_table(&metastore, "files", payload_schema())?;
        let zone = table.ingestion_zone();
        for batch in ["2024-01-01", "2024-02-01", "2024-03-01_late"] {
            fs::create_dir_all(zone.join(batch))?;
            fs::write(zone.join(batch).join("data.json"), "{}")?;
        }

        let ingester = Ingester::new(table, DirectoryType::Dated, RawFileType::Json, WriteMode::Append)?;
        assert_eq!(ingester.discover_files()?.len(), 3);

        let start = NaiveDate::from_ymd_opt(2024, 1, 15).expect("valid date");
        let end = NaiveDate::from_ymd_opt(2024, 3, 1).expect("valid date");
        let ranged = ingester.with_date_range(start, end);
        let files = ranged.discover_files()?;
        assert_eq!(files.len(), 2);
        assert!(files[0].to_string_lossy().contains("2024-02-01"));
        Ok(())
    }

    #[test]
    fn test_missing_file_metadata() -> Result<()> {
        let dir = TempDir::new()?;
        let metastore = Metastore::new(dir.path())?;
        let table = raw_table(&metastore, "files", payload_schema())?;
        let ingester = Ingester::new(table, DirectoryType::Shallow, RawFileType::Json, WriteMode::Append)?;
        assert!(matches!(
            ingester.build_metadata(&dir.path().join("gone.json")),
            Err(StrataError::FileNotFound { .. })
        ));
        assert_eq!(ingester.payload_schema().len(), 6);
        Ok(())
    }
}
