//! Quality tiers and the metadata columns each tier carries

use crate::error::{Result, StrataError};
use crate::schema_map::{PrimitiveType, StorageField, StorageSchema};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const RAW_ID: &str = "_raw_id";
pub const INGESTED_TS: &str = "_ingested_ts";
pub const FILE_PATH: &str = "_file_path";
pub const FILE_NAME: &str = "_file_name";
pub const FILE_MOD_TS: &str = "_file_mod_ts";
pub const CONFORMED_ID: &str = "_conformed_id";
pub const CONFORMED_TS: &str = "_conformed_ts";
pub const CANONICALIZED_ID: &str = "_canonicalized_id";
pub const CREATED_TS: &str = "_created_ts";
pub const MODIFIED_TS: &str = "_modified_ts";

/// Quality tier of a table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableQuality {
    /// Files as they landed, one row per file (or per record when decoded)
    Raw,
    /// Typed, exploded records still carrying their file lineage
    Conformed,
    /// Business entities keyed for upserts
    Canonical,
    /// Reference and crosswalk data; shares the canonical layer
    Standard,
}

impl TableQuality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::Conformed => "conformed",
            Self::Canonical => "canonical",
            Self::Standard => "standard",
        }
    }

    /// Metadata fields prepended to every table of this tier
    pub fn metadata_schema(&self) -> StorageSchema {
        let raw = [
            StorageField::new(RAW_ID, PrimitiveType::String),
            StorageField::new(INGESTED_TS, PrimitiveType::Timestamp),
            StorageField::new(FILE_PATH, PrimitiveType::String),
            StorageField::new(FILE_NAME, PrimitiveType::String),
            StorageField::new(FILE_MOD_TS, PrimitiveType::Timestamp),
        ];
        match self {
            Self::Raw => raw.into_iter().collect(),
            Self::Conformed => raw
                .into_iter()
                .chain([
                    StorageField::new(CONFORMED_ID, PrimitiveType::String),
                    StorageField::new(CONFORMED_TS, PrimitiveType::Timestamp),
                ])
                .collect(),
            Self::Canonical | Self::Standard => StorageSchema::new(vec![
                StorageField::new(CANONICALIZED_ID, PrimitiveType::String),
                StorageField::new(CREATED_TS, PrimitiveType::Timestamp),
                StorageField::new(MODIFIED_TS, PrimitiveType::Timestamp),
            ]),
        }
    }
}

impl fmt::Display for TableQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TableQuality {
    type Err = StrataError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "raw" => Ok(Self::Raw),
            "conformed" => Ok(Self::Conformed),
            "canonical" => Ok(Self::Canonical),
            "standard" => Ok(Self::Standard),
            _ => Err(StrataError::UnrecognizedTableQuality {
                value: s.to_owned(),
            }),
        }
    }
}
