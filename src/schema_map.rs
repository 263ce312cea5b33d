//! Conversion between the storage type system and the processing type system.
//!
//! Tables are declared with storage-side field descriptors (`"long"`,
//! `"timestamp"`, `array<string>`) and processed as polars frames. The two
//! mapping directions below are exact inverses over the supported primitive
//! set, so a schema survives storage → processing → storage unchanged.
//!
//! Timestamps are always `Datetime(Microseconds, "UTC")`. A datetime with any
//! other unit or zone has no storage counterpart and is rejected rather than
//! silently reinterpreted.

use crate::error::{Result, StrataError};
use polars::prelude::{
    DataFrame, DataType, Expr, IntoLazy as _, NULL, PlSmallStr, Schema, TimeUnit, col, lit,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Time zone carried by every timestamp column.
pub const TIME_ZONE: &str = "UTC";

/// Processing type used for storage `timestamp` fields.
pub fn timestamp_dtype() -> DataType {
    DataType::Datetime(TimeUnit::Microseconds, Some(TIME_ZONE.into()))
}

/// Primitive storage types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrimitiveType {
    Boolean,
    Date,
    Double,
    Float,
    Integer,
    Long,
    String,
    Timestamp,
}

impl PrimitiveType {
    pub const ALL: [Self; 8] = [
        Self::Boolean,
        Self::Date,
        Self::Double,
        Self::Float,
        Self::Integer,
        Self::Long,
        Self::String,
        Self::Timestamp,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Boolean => "boolean",
            Self::Date => "date",
            Self::Double => "double",
            Self::Float => "float",
            Self::Integer => "integer",
            Self::Long => "long",
            Self::String => "string",
            Self::Timestamp => "timestamp",
        }
    }

    /// Processing type for this primitive
    pub fn to_processing(self) -> DataType {
        match self {
            Self::Boolean => DataType::Boolean,
            Self::Date => DataType::Date,
            Self::Double => DataType::Float64,
            Self::Float => DataType::Float32,
            Self::Integer => DataType::Int32,
            Self::Long => DataType::Int64,
            Self::String => DataType::String,
            Self::Timestamp => timestamp_dtype(),
        }
    }

    /// Storage primitive for a processing type
    pub fn from_processing(dtype: &DataType) -> Result<Self> {
        match dtype {
            DataType::Boolean => Ok(Self::Boolean),
            DataType::Date => Ok(Self::Date),
            DataType::Float64 => Ok(Self::Double),
            DataType::Float32 => Ok(Self::Float),
            DataType::Int32 => Ok(Self::Integer),
            DataType::Int64 => Ok(Self::Long),
            DataType::String => Ok(Self::String),
            DataType::Datetime(TimeUnit::Microseconds, Some(tz)) if tz.as_str() == TIME_ZONE => {
                Ok(Self::Timestamp)
            }
            other => Err(StrataError::UnrecognizedType {
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for PrimitiveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PrimitiveType {
    type Err = StrataError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| StrataError::UnrecognizedType {
                value: s.to_owned(),
            })
    }
}

/// Storage-side type of a field: a primitive or a single-level array of one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "StorageTypeRepr", into = "StorageTypeRepr")]
pub enum StorageType {
    Primitive(PrimitiveType),
    Array(PrimitiveType),
}

impl StorageType {
    pub fn to_processing(self) -> DataType {
        storage_to_processing(&self)
    }
}

impl From<PrimitiveType> for StorageType {
    fn from(p: PrimitiveType) -> Self {
        Self::Primitive(p)
    }
}

impl fmt::Display for StorageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primitive(p) => write!(f, "{p}"),
            Self::Array(p) => write!(f, "array<{p}>"),
        }
    }
}

impl FromStr for StorageType {
    type Err = StrataError;

    fn from_str(s: &str) -> Result<Self> {
        match s.strip_prefix("array<").and_then(|r| r.strip_suffix('>')) {
            Some(inner) => Ok(Self::Array(inner.parse()?)),
            None => Ok(Self::Primitive(s.parse()?)),
        }
    }
}

/// On-disk JSON shape: `"long"` or `{"type": "array", "elementType": "long"}`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum StorageTypeRepr {
    Name(String),
    Array {
        #[serde(rename = "type")]
        kind: String,
        #[serde(rename = "elementType")]
        element_type: String,
    },
}

impl TryFrom<StorageTypeRepr> for StorageType {
    type Error = StrataError;

    fn try_from(repr: StorageTypeRepr) -> Result<Self> {
        match repr {
            StorageTypeRepr::Name(name) => Ok(Self::Primitive(name.parse()?)),
            StorageTypeRepr::Array { kind, element_type } if kind == "array" => {
                Ok(Self::Array(element_type.parse()?))
            }
            StorageTypeRepr::Array { kind, .. } => Err(StrataError::UnrecognizedType { value: kind }),
        }
    }
}

impl From<StorageType> for StorageTypeRepr {
    fn from(t: StorageType) -> Self {
        match t {
            StorageType::Primitive(p) => Self::Name(p.as_str().to_owned()),
            StorageType::Array(p) => Self::Array {
                kind: "array".to_owned(),
                element_type: p.as_str().to_owned(),
            },
        }
    }
}

/// A named storage field
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StorageField {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: StorageType,
}

impl StorageField {
    pub fn new(name: impl Into<String>, data_type: impl Into<StorageType>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
        }
    }

    pub fn array(name: impl Into<String>, element: PrimitiveType) -> Self {
        Self::new(name, StorageType::Array(element))
    }
}

/// Ordered sequence of storage fields
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageSchema {
    pub fields: Vec<StorageField>,
}

impl StorageSchema {
    pub fn new(fields: Vec<StorageField>) -> Self {
        Self { fields }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn columns(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    pub fn contains(&self, column: &str) -> bool {
        self.fields.iter().any(|f| f.name == column)
    }

    /// This schema's fields followed by `other`'s
    pub fn concat(&self, other: &Self) -> Self {
        let mut fields = self.fields.clone();
        fields.extend(other.fields.iter().cloned());
        Self { fields }
    }

    pub fn to_processing(&self) -> Schema {
        storage_schema_to_processing(self)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

impl FromIterator<StorageField> for StorageSchema {
    fn from_iter<I: IntoIterator<Item = StorageField>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

/// Maps a storage type to its processing type; arrays wrap the element type in a list
pub fn storage_to_processing(storage: &StorageType) -> DataType {
    match storage {
        StorageType::Primitive(p) => p.to_processing(),
        StorageType::Array(p) => DataType::List(Box::new(p.to_processing())),
    }
}

/// Maps a processing column back to a storage field
pub fn processing_to_storage(column: &str, dtype: &DataType) -> Result<StorageField> {
    let data_type = match dtype {
        DataType::List(inner) => StorageType::Array(PrimitiveType::from_processing(inner)?),
        other => StorageType::Primitive(PrimitiveType::from_processing(other)?),
    };
    Ok(StorageField::new(column, data_type))
}

pub fn storage_schema_to_processing(schema: &StorageSchema) -> Schema {
    schema
        .fields
        .iter()
        .map(|f| {
            (
                PlSmallStr::from(f.name.as_str()),
                storage_to_processing(&f.data_type),
            )
        })
        .collect()
}

pub fn processing_schema_to_storage(schema: &Schema) -> Result<StorageSchema> {
    schema
        .iter()
        .map(|(name, dtype)| processing_to_storage(name.as_str(), dtype))
        .collect::<Result<Vec<_>>>()
        .map(StorageSchema::new)
}

/// Projects `df` onto `schema` (same names, same order) and casts each column.
///
/// Every schema column must exist in `df`; extra columns are dropped. A value
/// that cannot be cast is an error.
pub fn conform_schema(df: DataFrame, schema: &Schema) -> Result<DataFrame> {
    let missing: Vec<&str> = schema
        .iter_names()
        .map(PlSmallStr::as_str)
        .filter(|name| df.column(name).is_err())
        .collect();
    if !missing.is_empty() {
        return Err(StrataError::invalid_argument(
            "schema",
            format!("frame is missing column(s): {}", missing.join(", ")),
        ));
    }
    project(df, schema, Projection::Strict)
}

/// Like [`conform_schema`] but columns absent from `df` become null.
pub(crate) fn fill_schema(df: DataFrame, schema: &Schema) -> Result<DataFrame> {
    project(df, schema, Projection::Fill)
}

/// Read-side projection of stored data: absent columns become null and
/// values the stored type cannot hold become null.
pub fn align_schema(df: DataFrame, schema: &Schema) -> Result<DataFrame> {
    project(df, schema, Projection::Lenient)
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Projection {
    Strict,
    Fill,
    Lenient,
}

fn project(df: DataFrame, schema: &Schema, mode: Projection) -> Result<DataFrame> {
    let exprs: Vec<Expr> = schema
        .iter()
        .map(|(name, dtype)| {
            if mode != Projection::Strict && df.column(name.as_str()).is_err() {
                lit(NULL).cast(dtype.clone()).alias(name.clone())
            } else if mode == Projection::Lenient {
                col(name.clone()).cast(dtype.clone())
            } else {
                col(name.clone()).strict_cast(dtype.clone())
            }
        })
        .collect();
    Ok(df.lazy().select(exprs).collect()?)
}

/// Metadata fields every table of `quality` carries ahead of its own columns
pub fn metadata_fields(quality: crate::quality::TableQuality) -> StorageSchema {
    quality.metadata_schema()
}
