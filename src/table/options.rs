//! Read options for [`Table::get`](super::Table::get)

use crate::error::{Result, StrataError};
use crate::schema_map::timestamp_dtype;
use chrono::{DateTime, NaiveDate, Utc};
use polars::prelude::*;

/// A scalar an equality filter compares against
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Date(NaiveDate),
    Datetime(DateTime<Utc>),
}

impl FilterValue {
    pub(crate) fn to_lit(&self) -> Expr {
        match self {
            Self::Bool(v) => lit(*v),
            Self::Int(v) => lit(*v),
            Self::Float(v) => lit(*v),
            Self::Str(v) => lit(v.as_str()),
            Self::Date(v) => {
                let days = (*v - DateTime::<Utc>::UNIX_EPOCH.date_naive()).num_days();
                lit(days).cast(DataType::Date)
            }
            Self::Datetime(v) => lit(v.timestamp_micros()).cast(timestamp_dtype()),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Bool(_) => "boolean",
            Self::Int(_) => "integer",
            Self::Float(_) => "float",
            Self::Str(_) => "string",
            Self::Date(_) => "date",
            Self::Datetime(_) => "timestamp",
        }
    }

    /// Whether an equality test against a `dtype` column is meaningful
    fn compares_with(&self, dtype: &DataType) -> bool {
        match self {
            Self::Bool(_) => matches!(dtype, DataType::Boolean),
            Self::Int(_) => matches!(
                dtype,
                DataType::Int8
                    | DataType::Int16
                    | DataType::Int32
                    | DataType::Int64
                    | DataType::UInt8
                    | DataType::UInt16
                    | DataType::UInt32
                    | DataType::UInt64
                    | DataType::Float32
                    | DataType::Float64
            ),
            Self::Float(_) => matches!(dtype, DataType::Float32 | DataType::Float64),
            Self::Str(_) => matches!(dtype, DataType::String),
            Self::Date(_) => matches!(dtype, DataType::Date),
            Self::Datetime(_) => matches!(dtype, DataType::Datetime(_, _)),
        }
    }
}

impl From<bool> for FilterValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for FilterValue {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<i64> for FilterValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for FilterValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for FilterValue {
    fn from(v: &str) -> Self {
        Self::Str(v.to_owned())
    }
}

impl From<String> for FilterValue {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<NaiveDate> for FilterValue {
    fn from(v: NaiveDate) -> Self {
        Self::Date(v)
    }
}

impl From<DateTime<Utc>> for FilterValue {
    fn from(v: DateTime<Utc>) -> Self {
        Self::Datetime(v)
    }
}

/// Options applied in order: filters, select, latest-per-partition, limit,
/// unique, sort.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GetOptions {
    pub filters: Vec<(String, FilterValue)>,
    pub select: Option<Vec<String>>,
    pub partition_by: Vec<String>,
    pub order_by: Vec<String>,
    pub descending: bool,
    pub limit: Option<usize>,
    pub unique: bool,
    pub sort_by: Vec<String>,
}

fn ensure_known<'a>(
    parameter: &str,
    names: impl IntoIterator<Item = &'a String>,
    pool: &[&str],
) -> Result<()> {
    for name in names {
        if !pool.contains(&name.as_str()) {
            return Err(StrataError::invalid_argument(
                parameter,
                format!("unknown column '{name}'"),
            ));
        }
    }
    Ok(())
}

fn owned(columns: &[&str]) -> Vec<String> {
    columns.iter().map(|c| (*c).to_owned()).collect()
}

impl GetOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep rows where `column == value`
    pub fn filter(mut self, column: &str, value: impl Into<FilterValue>) -> Self {
        self.filters.push((column.to_owned(), value.into()));
        self
    }

    pub fn select(mut self, columns: &[&str]) -> Self {
        self.select = Some(owned(columns));
        self
    }

    /// Keep one row per `partition_by` group: the first by `order_by`
    pub fn latest_by(mut self, partition_by: &[&str], order_by: &[&str], descending: bool) -> Self {
        self.partition_by = owned(partition_by);
        self.order_by = owned(order_by);
        self.descending = descending;
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn sort_by(mut self, columns: &[&str]) -> Self {
        self.sort_by = owned(columns);
        self
    }

    /// Checks every referenced column, and each filter value's type, against
    /// the table's processing schema
    pub(crate) fn validate(&self, schema: &Schema) -> Result<()> {
        let columns: Vec<&str> = schema.iter_names().map(PlSmallStr::as_str).collect();
        let columns = columns.as_slice();
        ensure_known("filters", self.filters.iter().map(|(c, _)| c), columns)?;
        for (column, value) in &self.filters {
            if let Some(dtype) = schema.get(column)
                && !value.compares_with(dtype)
            {
                return Err(StrataError::invalid_argument(
                    "filters",
                    format!("column '{column}' of type {dtype} cannot equal a {} value", value.kind()),
                ));
            }
        }
        ensure_known("select", self.select.iter().flatten(), columns)?;
        if let Some(select) = &self.select
            && select.is_empty()
        {
            return Err(StrataError::invalid_argument("select", "no columns selected"));
        }

        // later steps only see the projected columns
        let visible: Vec<&str> = match &self.select {
            Some(select) => select.iter().map(String::as_str).collect(),
            None => columns.to_vec(),
        };
        ensure_known("partition_by", &self.partition_by, &visible)?;
        ensure_known("order_by", &self.order_by, &visible)?;
        ensure_known("sort_by", &self.sort_by, &visible)?;

        match (self.partition_by.is_empty(), self.order_by.is_empty()) {
            (false, true) => {
                return Err(StrataError::invalid_argument(
                    "order_by",
                    "required when partition_by is given",
                ));
            }
            (true, false) => {
                return Err(StrataError::invalid_argument(
                    "partition_by",
                    "required when order_by is given",
                ));
            }
            _ => {}
        }

        if self.limit == Some(0) {
            return Err(StrataError::invalid_argument("limit", "must be positive"));
        }
        Ok(())
    }

    /// Applies the options to a frame already read from storage
    pub(crate) fn apply(&self, df: DataFrame) -> Result<DataFrame> {
        let mut lf = df.lazy();

        for (column, value) in &self.filters {
            lf = lf.filter(col(column.as_str()).eq(value.to_lit()));
        }
        if let Some(select) = &self.select {
            lf = lf.select(select.iter().map(|c| col(c.as_str())).collect::<Vec<_>>());
        }
        if !self.partition_by.is_empty() {
            lf = latest_per_key(lf, &self.partition_by, &self.order_by, self.descending);
        }
        if let Some(n) = self.limit {
            lf = lf.limit(IdxSize::try_from(n).unwrap_or(IdxSize::MAX));
        }
        if self.unique {
            lf = lf.unique_stable(None, UniqueKeepStrategy::First);
        }
        if !self.sort_by.is_empty() {
            lf = lf.sort_by_exprs(
                self.sort_by.iter().map(|c| col(c.as_str())).collect::<Vec<_>>(),
                SortMultipleOptions::default().with_maintain_order(true),
            );
        }
        Ok(lf.collect()?)
    }
}

/// One row per `keys` group, the first by `order_by`. Sorting is stable, so
/// ties keep their incoming order.
pub fn latest_per_key(lf: LazyFrame, keys: &[String], order_by: &[String], descending: bool) -> LazyFrame {
    lf.sort_by_exprs(
        order_by.iter().map(|c| col(c.as_str())).collect::<Vec<_>>(),
        SortMultipleOptions::default()
            .with_order_descending(descending)
            .with_maintain_order(true),
    )
    .unique_stable(
        Some(keys.iter().map(|k| PlSmallStr::from(k.as_str())).collect()),
        UniqueKeepStrategy::First,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> Schema {
        Schema::from_iter([
            (PlSmallStr::from("id"), DataType::Int64),
            (PlSmallStr::from("name"), DataType::String),
            (PlSmallStr::from("ts"), timestamp_dtype()),
        ])
    }

    fn invalid_parameter(options: &GetOptions) -> Option<String> {
        match options.validate(&schema()) {
            Err(StrataError::InvalidArgument { parameter, .. }) => Some(parameter),
            _ => None,
        }
    }

    #[test]
    fn test_validation_names_parameter() {
        assert_eq!(invalid_parameter(&GetOptions::new()), None);
        assert_eq!(
            invalid_parameter(&GetOptions::new().filter("nope", 1)).as_deref(),
            Some("filters")
        );
        assert_eq!(
            invalid_parameter(&GetOptions::new().select(&["id", "nope"])).as_deref(),
            Some("select")
        );
        assert_eq!(
            invalid_parameter(&GetOptions::new().select(&["id"]).sort_by(&["name"])).as_deref(),
            Some("sort_by")
        );
        assert_eq!(
            invalid_parameter(&GetOptions::new().latest_by(&["id"], &[], true)).as_deref(),
            Some("order_by")
        );
        assert_eq!(
            invalid_parameter(&GetOptions::new().latest_by(&[], &["ts"], true)).as_deref(),
            Some("partition_by")
        );
        assert_eq!(
            invalid_parameter(&GetOptions::new().limit(0)).as_deref(),
            Some("limit")
        );
    }

    #[test]
    fn test_filter_types_checked() {
        let at = DateTime::<Utc>::UNIX_EPOCH;
        assert_eq!(invalid_parameter(&GetOptions::new().filter("ts", at)), None);
        assert_eq!(invalid_parameter(&GetOptions::new().filter("id", 3)), None);
        for options in [
            GetOptions::new().filter("ts", "2024-01-02T03:04:05Z"),
            GetOptions::new().filter("id", "3"),
            GetOptions::new().filter("name", true),
            GetOptions::new().filter("ts", NaiveDate::default()),
        ] {
            assert_eq!(invalid_parameter(&options).as_deref(), Some("filters"));
        }
    }

    #[test]
    fn test_temporal_filters() -> Result<()> {
        let day = |d: u32| NaiveDate::from_ymd_opt(2024, 1, d).unwrap_or_default();
        let df = df! {
            "day" => [day(1), day(2), day(2)],
            "n" => [1i64, 2, 3],
        }?;
        let out = GetOptions::new().filter("day", day(2)).apply(df)?;
        assert_eq!(out.height(), 2);

        let at = DateTime::<Utc>::UNIX_EPOCH + chrono::Duration::seconds(5);
        let df = df! { "ts" => [0i64, 5_000_000] }?
            .lazy()
            .with_column(col("ts").cast(timestamp_dtype()))
            .collect()?;
        let out = GetOptions::new().filter("ts", at).apply(df)?;
        assert_eq!(out.height(), 1);
        Ok(())
    }

    #[test]
    fn test_apply_order_of_operations() -> Result<()> {
        let df = df! {
            "id" => [1i64, 1, 2, 2, 3],
            "name" => ["a", "b", "c", "d", "e"],
            "ts" => [1i64, 2, 2, 2, 9],
        }?;

        let out = GetOptions::new()
            .latest_by(&["id"], &["ts"], true)
            .sort_by(&["id"])
            .apply(df.clone())?;
        let names: Vec<&str> = out.column("name")?.str()?.into_no_null_iter().collect();
        // id 2 ties on ts: first in storage order wins
        assert_eq!(names, vec!["b", "c", "e"]);

        let out = GetOptions::new()
            .filter("id", 2)
            .select(&["id"])
            .unique()
            .apply(df)?;
        assert_eq!(out.shape(), (1, 1));
        Ok(())
    }
}
