//! # Strata - Layered Lakehouse Pipelines
//!
//! Strata moves files through quality tiers of tables on local storage:
//! files land in an ingestion zone, are ingested into **raw** tables, typed
//! into **conformed** tables, and promoted into keyed **canonical** (or
//! **standard**) tables, from which they can be exported as CSV or JSON.
//!
//! ## Quick Start
//!
//! ```no_run
//! use strata::ingester::{DirectoryType, Ingester, RawFileType};
//! use strata::metastore::Metastore;
//! use strata::pipe::Pipe;
//! use strata::pipeline::{ExecutionMode, Pipeline};
//! use strata::quality::TableQuality;
//! use strata::schema_map::{PrimitiveType, StorageField, StorageSchema};
//! use strata::table::{Table, TableDefinition, WriteMode};
//!
//! let metastore = Metastore::new("./lakehouse")?;
//! let activity = Table::new(
//!     &metastore,
//!     TableDefinition::new(
//!         "crm",
//!         TableQuality::Raw,
//!         "activity",
//!         StorageSchema::new(vec![StorageField::new("payload", PrimitiveType::String)]),
//!     ),
//! )?;
//!
//! let mut pipeline = Pipeline::new();
//! pipeline.raw_pipes.push(Pipe::new(Ingester::new(
//!     activity,
//!     DirectoryType::Shallow,
//!     RawFileType::Json,
//!     WriteMode::Append,
//! )?));
//!
//! let report = pipeline.execute(ExecutionMode::default())?;
//! println!("{}", report.summary());
//! # Ok::<(), strata::error::StrataError>(())
//! ```
//!
//! ## Core Modules
//!
//! - [`table`]: Table definitions, reads, writes and quarantine
//! - [`ingester`]: Incremental file ingestion with lineage columns
//! - [`transformer`], [`upserter`], [`exporter`]: The other pipe logics
//! - [`pipe`] and [`pipeline`]: Execution, persisted or in memory
//! - [`check`]: Column checks that fail or quarantine rows
//! - [`store`]: The storage backend trait and its parquet implementation
//! - [`config`] and [`logging`]: Engine settings and tracing setup
//! - [`error`]: Error types and handling utilities

#![warn(clippy::all, rust_2018_idioms)]

pub mod check;
pub mod config;
pub mod error;
pub mod exporter;
pub mod ingester;
pub mod logging;
pub mod metastore;
pub mod pipe;
pub mod pipeline;
pub mod quality;
pub mod schema_map;
pub mod store;
pub mod table;
pub mod transformer;
pub mod upserter;
