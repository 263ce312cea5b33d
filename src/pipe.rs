//! The execution unit: one logic, one target table
//!
//! Every pipe runs the same sequence:
//!
//! 1. load the logic's input frames
//! 2. transform them into one frame
//! 3. stamp the tier's metadata columns
//! 4. conform to the table's processing schema
//! 5. run the table's tests
//! 6. persist (or export)
//!
//! In memory, inputs come from the shared [`FrameMap`] and nothing is written.

use crate::check::CheckOutcome;
use crate::config::EngineConfig;
use crate::error::{Result, StrataError};
use crate::exporter::Exporter;
use crate::ingester::Ingester;
use crate::quality::{
    CANONICALIZED_ID, CONFORMED_ID, CONFORMED_TS, CREATED_TS, FILE_MOD_TS, FILE_PATH, INGESTED_TS,
    MODIFIED_TS, RAW_ID, TableQuality,
};
use crate::schema_map::timestamp_dtype;
use crate::table::{Table, WriteMode};
use crate::transformer::Transformer;
use crate::upserter::Upserter;
use chrono::Utc;
use polars::prelude::*;
use std::collections::BTreeMap;
use std::path::PathBuf;
use uuid::Uuid;

pub use crate::schema_map::conform_schema;

/// Frames keyed by table id (or any name a transformer chooses)
pub type FrameMap = BTreeMap<String, DataFrame>;

/// Looks up a named input frame
pub fn require_frame<'a>(frames: &'a FrameMap, name: &str) -> Result<&'a DataFrame> {
    frames.get(name).ok_or_else(|| {
        StrataError::invalid_argument("frames", format!("no input frame named '{name}'"))
    })
}

#[derive(Debug)]
pub enum PipeLogic {
    Ingester(Ingester),
    Transformer(Transformer),
    Upserter(Upserter),
    Exporter(Exporter),
}

impl PipeLogic {
    pub fn table(&self) -> &Table {
        match self {
            Self::Ingester(logic) => logic.table(),
            Self::Transformer(logic) => logic.table(),
            Self::Upserter(logic) => logic.table(),
            Self::Exporter(logic) => logic.table(),
        }
    }

    /// `None` for exporters, which never write to their table
    pub fn write_mode(&self) -> Option<WriteMode> {
        match self {
            Self::Ingester(logic) => Some(logic.write_mode()),
            Self::Transformer(logic) => Some(logic.write_mode()),
            Self::Upserter(logic) => Some(logic.write_mode()),
            Self::Exporter(_) => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Ingester(_) => "ingester",
            Self::Transformer(_) => "transformer",
            Self::Upserter(_) => "upserter",
            Self::Exporter(_) => "exporter",
        }
    }
}

impl From<Ingester> for PipeLogic {
    fn from(logic: Ingester) -> Self {
        Self::Ingester(logic)
    }
}

impl From<Transformer> for PipeLogic {
    fn from(logic: Transformer) -> Self {
        Self::Transformer(logic)
    }
}

impl From<Upserter> for PipeLogic {
    fn from(logic: Upserter) -> Self {
        Self::Upserter(logic)
    }
}

impl From<Exporter> for PipeLogic {
    fn from(logic: Exporter) -> Self {
        Self::Exporter(logic)
    }
}

/// Outcome of one pipe run
#[derive(Debug, Clone)]
pub struct PipeResult {
    pub table_id: String,
    pub passed: DataFrame,
    pub failed: DataFrame,
    pub quarantined: DataFrame,
    /// Set when an exporter wrote a file
    pub export_path: Option<PathBuf>,
    /// Whether anything was written to storage
    pub persisted: bool,
}

#[derive(Debug)]
pub struct Pipe {
    logic: PipeLogic,
    strict: bool,
}

/// Stamps the id and timestamp columns of `quality`.
///
/// Raw frames keep `_raw_id` / `_ingested_ts` when the ingester already set
/// them per file.
pub fn add_metadata_columns(df: DataFrame, quality: TableQuality) -> Result<DataFrame> {
    let id = Uuid::new_v4().to_string();
    let now = lit(Utc::now().timestamp_micros()).cast(timestamp_dtype());
    let has = |name: &str| df.column(name).is_ok();

    let columns = match quality {
        TableQuality::Raw => {
            let mut columns = Vec::new();
            if !has(RAW_ID) {
                columns.push(lit(id.as_str()).alias(RAW_ID));
            }
            if !has(INGESTED_TS) {
                columns.push(now.alias(INGESTED_TS));
            }
            columns
        }
        TableQuality::Conformed => vec![
            lit(id.as_str()).alias(CONFORMED_ID),
            now.alias(CONFORMED_TS),
        ],
        TableQuality::Canonical | TableQuality::Standard => vec![
            lit(id.as_str()).alias(CANONICALIZED_ID),
            now.clone().alias(CREATED_TS),
            now.alias(MODIFIED_TS),
        ],
    };

    if columns.is_empty() {
        return Ok(df);
    }
    Ok(df.lazy().with_columns(columns).collect()?)
}

impl Pipe {
    pub fn new(logic: impl Into<PipeLogic>) -> Self {
        Self {
            logic: logic.into(),
            strict: false,
        }
    }

    /// Strictness taken from the engine configuration
    pub fn from_config(logic: impl Into<PipeLogic>, config: &EngineConfig) -> Self {
        Self::new(logic).with_strict(config.strict)
    }

    /// Fail with `EmptyPipelineResult` when nothing passes
    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn logic(&self) -> &PipeLogic {
        &self.logic
    }

    pub fn table(&self) -> &Table {
        self.logic.table()
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    /// Input frames, from the shared map in memory and from storage otherwise
    pub fn load(&self, frames: &FrameMap, in_memory: bool) -> Result<FrameMap> {
        match &self.logic {
            PipeLogic::Ingester(ingester) => {
                let id = ingester.table().id();
                let history = if in_memory {
                    match frames.get(&id) {
                        Some(df) => df.select([FILE_PATH, FILE_MOD_TS])?,
                        None => DataFrame::empty(),
                    }
                } else {
                    ingester.history()?
                };
                let mut loaded = FrameMap::new();
                loaded.insert(id, ingester.ingest(&history)?);
                Ok(loaded)
            }
            PipeLogic::Transformer(transformer) => {
                let mut loaded = transformer.load()?;
                if in_memory {
                    for (name, df) in frames {
                        loaded.insert(name.clone(), df.clone());
                    }
                }
                Ok(loaded)
            }
            PipeLogic::Upserter(upserter) if in_memory => {
                Ok(subset(frames, &upserter.source().id()))
            }
            PipeLogic::Upserter(upserter) => upserter.load(),
            PipeLogic::Exporter(exporter) if in_memory => {
                Ok(subset(frames, &exporter.table().id()))
            }
            PipeLogic::Exporter(exporter) => exporter.load(),
        }
    }

    pub fn transform(&self, loaded: &FrameMap) -> Result<DataFrame> {
        match &self.logic {
            PipeLogic::Ingester(ingester) => Ok(require_frame(loaded, &ingester.table().id())?.clone()),
            PipeLogic::Transformer(transformer) => transformer.transform(loaded),
            PipeLogic::Upserter(upserter) => upserter.transform(loaded),
            PipeLogic::Exporter(exporter) => exporter.transform(loaded),
        }
    }

    pub fn execute(&mut self, frames: &FrameMap, in_memory: bool) -> Result<PipeResult> {
        let table = self.table().clone();
        let loaded = self.load(frames, in_memory)?;
        let df = self.transform(&loaded)?;

        // exports ship stored rows as they are
        let df = match self.logic {
            PipeLogic::Exporter(_) => df,
            _ => add_metadata_columns(df, table.quality())?,
        };
        let df = conform_schema(df, table.processing_schema())?;

        let outcome = if table.has_tests() {
            table.apply_tests(df)?
        } else {
            CheckOutcome::all_passed(df)?
        };

        if outcome.passed.height() == 0 && self.strict {
            return Err(StrataError::EmptyPipelineResult { table: table.id() });
        }

        let mut result = PipeResult {
            table_id: table.id(),
            passed: outcome.passed.clone(),
            failed: outcome.failed.clone(),
            quarantined: outcome.quarantined.clone(),
            export_path: None,
            persisted: false,
        };

        if in_memory {
            tracing::debug!("Ran {} in memory: {} row(s)", table.id(), result.passed.height());
            return Ok(result);
        }

        if outcome.failed.height() > 0 || outcome.quarantined.height() > 0 {
            table.quarantine(&outcome)?;
        }

        if result.passed.height() == 0 {
            tracing::info!("Nothing to persist for {}", table.id());
            return Ok(result);
        }

        match &mut self.logic {
            PipeLogic::Exporter(exporter) => {
                result.export_path = Some(exporter.export(&mut result.passed)?);
            }
            logic => {
                let mode = logic.write_mode().unwrap_or(WriteMode::Append);
                let passed = result.passed.clone();
                match mode {
                    WriteMode::Append => table.append(passed)?,
                    WriteMode::Overwrite => table.overwrite(passed)?,
                    WriteMode::Upsert => table.upsert(passed)?,
                }
                result.persisted = true;
            }
        }

        tracing::info!(
            passed = result.passed.height(),
            failed = result.failed.height(),
            quarantined = result.quarantined.height(),
            "Pipe {} for {} finished",
            self.logic.kind(),
            table.id()
        );
        Ok(result)
    }
}

fn subset(frames: &FrameMap, name: &str) -> FrameMap {
    frames
        .get(name)
        .map(|df| FrameMap::from([(name.to_owned(), df.clone())]))
        .unwrap_or_default()
}
