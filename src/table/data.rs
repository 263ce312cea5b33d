//! Input shapes accepted by table writes

use crate::error::{Result, StrataError};
use crate::schema_map::{conform_schema, fill_schema};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use polars::prelude::*;
use serde_json::{Map, Value};
use std::io::Cursor;

/// A frame, or JSON records (one object or an array of objects)
#[derive(Debug, Clone)]
pub enum TableData {
    Frame(DataFrame),
    Json(Value),
}

impl From<DataFrame> for TableData {
    fn from(df: DataFrame) -> Self {
        Self::Frame(df)
    }
}

impl From<Value> for TableData {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Physical type temporal columns are decoded as before the final cast
fn decode_dtype(dtype: &DataType) -> DataType {
    match dtype {
        DataType::Date => DataType::Int32,
        DataType::Datetime(_, _) => DataType::Int64,
        DataType::List(inner) => DataType::List(Box::new(decode_dtype(inner))),
        other => other.clone(),
    }
}

fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Some(ts.with_timezone(&Utc));
    }
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
        .map(|naive| naive.and_utc())
}

fn epoch() -> NaiveDate {
    DateTime::<Utc>::UNIX_EPOCH.date_naive()
}

/// Rewrites ISO date and timestamp strings as days / microseconds since epoch
fn temporal_value(column: &str, value: &Value, dtype: &DataType) -> Result<Value> {
    let invalid = |kind: &str| {
        StrataError::invalid_argument(
            "records",
            format!("column '{column}': cannot read {value} as {kind}"),
        )
    };
    match (dtype, value) {
        (_, Value::Null) => Ok(Value::Null),
        (DataType::Date | DataType::Datetime(_, _), Value::Number(_)) => Ok(value.clone()),
        (DataType::Date, Value::String(text)) => NaiveDate::parse_from_str(text, "%Y-%m-%d")
            .map(|date| Value::from((date - epoch()).num_days()))
            .map_err(|_| invalid("date")),
        (DataType::Datetime(_, _), Value::String(text)) => parse_timestamp(text)
            .map(|ts| Value::from(ts.timestamp_micros()))
            .ok_or_else(|| invalid("timestamp")),
        (DataType::List(inner), Value::Array(items)) => items
            .iter()
            .map(|item| temporal_value(column, item, inner))
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        (DataType::Date, _) => Err(invalid("date")),
        (DataType::Datetime(_, _), _) => Err(invalid("timestamp")),
        _ => Ok(value.clone()),
    }
}

fn is_temporal(dtype: &DataType) -> bool {
    match dtype {
        DataType::Date | DataType::Datetime(_, _) => true,
        DataType::List(inner) => is_temporal(inner),
        _ => false,
    }
}

/// Decodes JSON records against `schema`; absent fields become null.
///
/// Dates are `YYYY-MM-DD` strings (or days since epoch), timestamps RFC 3339
/// or `YYYY-MM-DD HH:MM:SS` in UTC (or microseconds since epoch). A value
/// that does not fit its column's type is an error.
pub fn records_to_frame(records: &[Value], schema: &Schema) -> Result<DataFrame> {
    if let Some(bad) = records.iter().find(|r| !r.is_object()) {
        return Err(StrataError::UnsupportedDataFormat {
            found: format!("array containing {}", json_kind(bad)),
        });
    }
    if records.is_empty() {
        return Ok(DataFrame::empty_with_schema(schema));
    }

    let temporal: Vec<(&PlSmallStr, &DataType)> =
        schema.iter().filter(|(_, dtype)| is_temporal(dtype)).collect();
    let records = records
        .iter()
        .filter_map(Value::as_object)
        .map(|record| {
            let mut record: Map<String, Value> = record.clone();
            for (name, dtype) in &temporal {
                if let Some(value) = record.get_mut(name.as_str()) {
                    *value = temporal_value(name.as_str(), value, dtype)?;
                }
            }
            Ok(Value::Object(record))
        })
        .collect::<Result<Vec<_>>>()?;

    let decode: Schema = schema
        .iter()
        .map(|(name, dtype)| (name.clone(), decode_dtype(dtype)))
        .collect();
    let bytes = serde_json::to_vec(&records)?;
    let df = JsonReader::new(Cursor::new(bytes))
        .with_json_format(JsonFormat::Json)
        .with_schema(Arc::new(decode))
        .finish()?;
    fill_schema(df, schema)
}

impl TableData {
    /// Coerces the input into a frame conforming to `schema`
    pub fn to_frame(self, schema: &Schema) -> Result<DataFrame> {
        match self {
            Self::Frame(df) => conform_schema(df, schema),
            Self::Json(Value::Object(record)) => {
                records_to_frame(&[Value::Object(record)], schema)
            }
            Self::Json(Value::Array(records)) => records_to_frame(&records, schema),
            Self::Json(other) => Err(StrataError::UnsupportedDataFormat {
                found: json_kind(&other).to_owned(),
            }),
        }
    }
}
