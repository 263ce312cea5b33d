//! Built-in checks

use super::{Check, CheckParams};
use crate::error::{Result, StrataError};
use polars::prelude::*;

/// Value is present and, rendered as text, not the empty string
pub fn not_null_or_empty() -> Check {
    Check::simple(
        "not_null_or_empty",
        "Value is not null and not an empty string",
        |c| c.clone().is_not_null().and(c.cast(DataType::String).neq(lit(""))),
    )
}

/// Value is strictly greater than zero
pub fn positive_int() -> Check {
    Check::simple("positive_int", "Value is greater than zero", |c| {
        c.gt(lit(0))
    })
}

/// Value is one of the `values` parameter (a JSON array of scalars of one kind)
pub fn value_in() -> Check {
    Check::parameterized(
        "value_in",
        "Value is one of an allowed set",
        |c, params| Ok(c.is_in(lit(allowed_values(params)?))),
    )
}

fn allowed_values(params: &CheckParams) -> Result<Series> {
    let values = params
        .get("values")
        .and_then(serde_json::Value::as_array)
        .ok_or_else(|| {
            StrataError::invalid_argument("values", "value_in requires a 'values' array")
        })?;

    let name: PlSmallStr = "values".into();
    if let Some(strings) = values.iter().map(|v| v.as_str()).collect::<Option<Vec<_>>>() {
        return Ok(Series::new(name, strings));
    }
    if let Some(ints) = values.iter().map(|v| v.as_i64()).collect::<Option<Vec<_>>>() {
        return Ok(Series::new(name, ints));
    }
    if let Some(floats) = values.iter().map(|v| v.as_f64()).collect::<Option<Vec<_>>>() {
        return Ok(Series::new(name, floats));
    }
    if let Some(flags) = values.iter().map(|v| v.as_bool()).collect::<Option<Vec<_>>>() {
        return Ok(Series::new(name, flags));
    }
    Err(StrataError::invalid_argument(
        "values",
        "allowed values must all be strings, integers, floats or booleans",
    ))
}
