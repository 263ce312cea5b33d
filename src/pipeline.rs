//! Layer-by-layer execution of pipes.
//!
//! A [`Pipeline`] holds four ordered pipe collections and runs them raw first,
//! then conformed, canonical and finally exports:
//!
//! ```no_run
//! use strata::pipeline::{ExecutionMode, Pipeline};
//!
//! let mut pipeline = Pipeline::new();
//! // pipeline.raw_pipes.push(...);
//! let report = pipeline.execute(ExecutionMode::default())?;
//! println!("{}", report.summary());
//! # Ok::<(), strata::error::StrataError>(())
//! ```
//!
//! In memory, one [`FrameMap`] threads through every pipe: each pipe's passed
//! frame is stored under its table id, later pipes read from it, and nothing
//! touches storage. Exports are skipped in that mode since there is no file
//! to produce.

use crate::error::Result;
use crate::pipe::{FrameMap, Pipe};
use std::fmt;
use std::path::PathBuf;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layer {
    Raw,
    Conformed,
    Canonical,
    Export,
}

impl Layer {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::Conformed => "conformed",
            Self::Canonical => "canonical",
            Self::Export => "export",
        }
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutionMode {
    /// Thread frames through memory instead of persisting
    pub in_memory: bool,
    /// Leave the export layer out
    pub skip_exports: bool,
}

impl ExecutionMode {
    pub fn in_memory() -> Self {
        Self {
            in_memory: true,
            skip_exports: false,
        }
    }
}

/// What one pipe produced
#[derive(Debug, Clone)]
pub struct PipeSummary {
    pub table_id: String,
    pub layer: Layer,
    pub passed_rows: usize,
    pub failed_rows: usize,
    pub quarantined_rows: usize,
    pub export_path: Option<PathBuf>,
    pub persisted: bool,
}

#[derive(Debug, Clone)]
pub struct PipelineReport {
    /// Passed frames by table id; only filled in memory
    pub frames: FrameMap,
    pub pipes: Vec<PipeSummary>,
    pub duration: Duration,
    pub in_memory: bool,
}

impl PipelineReport {
    pub fn passed_rows(&self) -> usize {
        self.pipes.iter().map(|p| p.passed_rows).sum()
    }

    pub fn rejected_rows(&self) -> usize {
        self.pipes
            .iter()
            .map(|p| p.failed_rows + p.quarantined_rows)
            .sum()
    }

    pub fn export_paths(&self) -> Vec<&PathBuf> {
        self.pipes
            .iter()
            .filter_map(|p| p.export_path.as_ref())
            .collect()
    }

    /// Summary for a pipe's target table
    pub fn pipe(&self, table_id: &str) -> Option<&PipeSummary> {
        self.pipes.iter().find(|p| p.table_id == table_id)
    }

    pub fn summary(&self) -> String {
        format!(
            "Pipeline completed ({}): {} pipes, {} rows passed, {} rows rejected, {} exports, {:.2}s",
            if self.in_memory { "in memory" } else { "persisted" },
            self.pipes.len(),
            self.passed_rows(),
            self.rejected_rows(),
            self.export_paths().len(),
            self.duration.as_secs_f64()
        )
    }
}

#[derive(Debug, Default)]
pub struct Pipeline {
    pub raw_pipes: Vec<Pipe>,
    pub conformed_pipes: Vec<Pipe>,
    pub canonical_pipes: Vec<Pipe>,
    pub export_pipes: Vec<Pipe>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.raw_pipes.len()
            + self.conformed_pipes.len()
            + self.canonical_pipes.len()
            + self.export_pipes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Runs every layer in order; the first failing pipe aborts the run
    pub fn execute(&mut self, mode: ExecutionMode) -> Result<PipelineReport> {
        let start = Instant::now();
        let skip_exports = mode.skip_exports || mode.in_memory;
        let mut frames = FrameMap::new();
        let mut pipes = Vec::with_capacity(self.len());

        let layers = [
            (Layer::Raw, &mut self.raw_pipes),
            (Layer::Conformed, &mut self.conformed_pipes),
            (Layer::Canonical, &mut self.canonical_pipes),
            (Layer::Export, &mut self.export_pipes),
        ];

        for (layer, layer_pipes) in layers {
            if layer == Layer::Export && skip_exports {
                if !layer_pipes.is_empty() {
                    tracing::info!("Skipping {} export pipe(s)", layer_pipes.len());
                }
                continue;
            }
            tracing::debug!("Running {} {layer} pipe(s)", layer_pipes.len());

            for pipe in layer_pipes.iter_mut() {
                let result = pipe.execute(&frames, mode.in_memory)?;
                pipes.push(PipeSummary {
                    table_id: result.table_id.clone(),
                    layer,
                    passed_rows: result.passed.height(),
                    failed_rows: result.failed.height(),
                    quarantined_rows: result.quarantined.height(),
                    export_path: result.export_path,
                    persisted: result.persisted,
                });
                if mode.in_memory {
                    frames.insert(result.table_id, result.passed);
                }
            }
        }

        let report = PipelineReport {
            frames,
            pipes,
            duration: start.elapsed(),
            in_memory: mode.in_memory,
        };
        tracing::info!("{}", report.summary());
        Ok(report)
    }
}
