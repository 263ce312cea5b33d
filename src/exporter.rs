//! Writes a table's current state to CSV or JSON files

use crate::config::EngineConfig;
use crate::error::{Result, ResultExt as _, StrataError};
use crate::pipe::FrameMap;
use crate::table::Table;
use chrono::Utc;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Csv,
    Json,
}

impl ExportFormat {
    /// File extension, also the serialized name
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Json => "json",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for ExportFormat {
    type Err = StrataError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "csv" => Ok(Self::Csv),
            "json" => Ok(Self::Json),
            _ => Err(StrataError::NotImplemented {
                format: s.to_owned(),
            }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Exporter {
    table: Table,
    format: ExportFormat,
    export_dir: PathBuf,
    exported_files: Vec<PathBuf>,
}

impl Exporter {
    /// Exports into the table's default export volume
    pub fn new(table: Table, format: ExportFormat) -> Result<Self> {
        let export_dir = table.exports_dir();
        Self::with_export_dir(table, format, export_dir)
    }

    /// Uses the configured default export format
    pub fn from_config(table: Table, config: &EngineConfig) -> Result<Self> {
        Self::new(table, config.default_export_format)
    }

    pub fn with_export_dir(table: Table, format: ExportFormat, export_dir: impl Into<PathBuf>) -> Result<Self> {
        let export_dir = export_dir.into();
        fs::create_dir_all(&export_dir)
            .with_context(|| format!("Failed to create export directory {}", export_dir.display()))?;
        Ok(Self {
            table,
            format,
            export_dir,
            exported_files: Vec::new(),
        })
    }

    pub fn table(&self) -> &Table {
        &self.table
    }

    pub fn format(&self) -> ExportFormat {
        self.format
    }

    pub fn export_dir(&self) -> &Path {
        &self.export_dir
    }

    /// Every file written so far, oldest first
    pub fn exported_files(&self) -> &[PathBuf] {
        &self.exported_files
    }

    /// The table's rows keyed by its id; nothing when the table is empty
    pub fn load(&self) -> Result<FrameMap> {
        let df = self.table.read()?;
        let mut frames = FrameMap::new();
        if df.height() > 0 {
            frames.insert(self.table.id(), df);
        }
        Ok(frames)
    }

    pub fn transform(&self, frames: &FrameMap) -> Result<DataFrame> {
        Ok(match frames.get(&self.table.id()) {
            Some(df) => df.clone(),
            None => DataFrame::empty_with_schema(self.table.processing_schema()),
        })
    }

    /// Writes `df` to `{table}.{YYYYMMDDHHMMSS}.{ext}` and records the path
    pub fn export(&mut self, df: &mut DataFrame) -> Result<PathBuf> {
        let stamp = Utc::now().format("%Y%m%d%H%M%S");
        let path = self.export_dir.join(format!(
            "{}.{stamp}.{}",
            self.table.name(),
            self.format.extension()
        ));
        let file = File::create(&path)
            .with_context(|| format!("Failed to create export file {}", path.display()))?;

        match self.format {
            ExportFormat::Csv => CsvWriter::new(file).include_header(true).finish(df)?,
            ExportFormat::Json => JsonWriter::new(file)
                .with_json_format(JsonFormat::Json)
                .finish(df)?,
        }

        tracing::info!(rows = df.height(), "Exported {} to {}", self.table.id(), path.display());
        self.exported_files.push(path.clone());
        Ok(path)
    }
}
