//! Pluggable business logic for a pipe

use crate::error::Result;
use crate::pipe::FrameMap;
use crate::table::{Table, WriteMode};
use polars::prelude::DataFrame;
use std::fmt;

type LoadFn = dyn Fn() -> Result<FrameMap> + Send + Sync;
type TransformFn = dyn Fn(&FrameMap) -> Result<DataFrame> + Send + Sync;

/// Loads named input frames and turns them into one frame for `table`
pub struct Transformer {
    table: Table,
    load: Box<LoadFn>,
    transform: Box<TransformFn>,
    write_mode: WriteMode,
}

impl fmt::Debug for Transformer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transformer")
            .field("table", &self.table.id())
            .field("write_mode", &self.write_mode)
            .finish_non_exhaustive()
    }
}

impl Transformer {
    pub fn new<L, T>(table: Table, load: L, transform: T, write_mode: WriteMode) -> Self
    where
        L: Fn() -> Result<FrameMap> + Send + Sync + 'static,
        T: Fn(&FrameMap) -> Result<DataFrame> + Send + Sync + 'static,
    {
        Self {
            table,
            load: Box::new(load),
            transform: Box::new(transform),
            write_mode,
        }
    }

    pub fn table(&self) -> &Table {
        &self.table
    }

    pub fn write_mode(&self) -> WriteMode {
        self.write_mode
    }

    pub fn load(&self) -> Result<FrameMap> {
        (self.load)()
    }

    pub fn transform(&self, frames: &FrameMap) -> Result<DataFrame> {
        (self.transform)(frames)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metastore::Metastore;
    use crate::pipe::require_frame;
    use crate::quality::TableQuality;
    use crate::schema_map::{PrimitiveType, StorageField, StorageSchema};
    use crate::table::TableDefinition;
    use polars::prelude::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_and_transform() -> Result<()> {
        let dir = TempDir::new()?;
        let metastore = Metastore::new(dir.path())?;
        let table = Table::new(
            &metastore,
            TableDefinition::new(
                "test",
                TableQuality::Conformed,
                "scores",
                StorageSchema::new(vec![StorageField::new("score", PrimitiveType::Long)]),
            ),
        )?;

        let transformer = Transformer::new(
            table,
            || {
                let mut frames = FrameMap::new();
                frames.insert("scores".to_owned(), df! { "score" => [1i64, -2, 3] }?);
                Ok(frames)
            },
            |frames| {
                let df = require_frame(frames, "scores")?;
                Ok(df.clone().lazy().filter(col("score").gt(lit(0))).collect()?)
            },
            WriteMode::Overwrite,
        );

        let frames = transformer.load()?;
        assert_eq!(transformer.transform(&frames)?.height(), 2);
        assert_eq!(transformer.write_mode(), WriteMode::Overwrite);
        assert!(format!("{transformer:?}").contains("test.conformed.scores"));
        Ok(())
    }

    #[test]
    fn test_user_logic_errors_propagate() -> Result<()> {
        use anyhow::Context as _;

        let dir = TempDir::new()?;
        let metastore = Metastore::new(dir.path())?;
        let table = Table::new(
            &metastore,
            TableDefinition::new(
                "test",
                TableQuality::Conformed,
                "thresholds",
                StorageSchema::new(vec![StorageField::new("limit", PrimitiveType::Long)]),
            ),
        )?;

        let transformer = Transformer::new(
            table,
            || Ok(FrameMap::new()),
            |_| {
                let limit: i64 = "ten".parse().context("reading threshold")?;
                Ok(df! { "limit" => [limit] }?)
            },
            WriteMode::Append,
        );

        match transformer.transform(&FrameMap::new()) {
            Err(crate::error::StrataError::Other(message)) => {
                assert!(message.starts_with("reading threshold: "));
                assert!(message.contains("invalid digit"));
            }
            other => panic!("expected a propagated user error, got {other:?}"),
        }
        Ok(())
    }
}
