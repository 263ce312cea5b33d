//! Row-level data quality checks
//!
//! A [`Check`] is a named predicate over one column. A [`Test`] binds a check to
//! a concrete column and an action: rows failing a `Fail` test are rejected,
//! rows failing only `Quarantine` tests are set aside for review.
//!
//! Running a set of tests against a frame partitions it into three disjoint
//! frames whose row counts add up to the input:
//!
//! - `passed`: every test holds
//! - `failed`: at least one `Fail` test does not hold
//! - `quarantined`: no `Fail` test fails but at least one `Quarantine` test does
//!
//! Failed and quarantined rows carry a `_check_name` column naming the first
//! failing test (in declaration order). A predicate evaluating to null counts
//! as a failure.

pub mod builtin;

use crate::error::{Result, StrataError};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Column naming the check a failed or quarantined row tripped
pub const CHECK_NAME_COLUMN: &str = "_check_name";

const FAIL_TAG: &str = "__failed_check__";
const QUARANTINE_TAG: &str = "__quarantined_check__";

/// Extra keyword parameters for parameterized checks (e.g. `values` for `value_in`)
pub type CheckParams = BTreeMap<String, serde_json::Value>;

/// What happens to a row that fails a test
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckAction {
    Fail,
    Quarantine,
}

impl CheckAction {
    /// Name of the quarantine location holding rows set aside by this action
    pub fn quarantine_name(&self) -> &'static str {
        match self {
            Self::Fail => "failed",
            Self::Quarantine => "quarantined",
        }
    }
}

/// Predicate builder; the variant is the arity flag
#[derive(Debug, Clone, Copy)]
pub enum CheckFn {
    /// Needs only the column
    Simple(fn(Expr) -> Expr),
    /// Needs the column and keyword parameters
    Parameterized(fn(Expr, &CheckParams) -> Result<Expr>),
}

#[derive(Debug, Clone)]
pub struct Check {
    pub name: String,
    pub description: String,
    pub function: CheckFn,
}

impl Check {
    pub fn simple(
        name: impl Into<String>,
        description: impl Into<String>,
        function: fn(Expr) -> Expr,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            function: CheckFn::Simple(function),
        }
    }

    pub fn parameterized(
        name: impl Into<String>,
        description: impl Into<String>,
        function: fn(Expr, &CheckParams) -> Result<Expr>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            function: CheckFn::Parameterized(function),
        }
    }

    pub fn is_simple(&self) -> bool {
        matches!(self.function, CheckFn::Simple(_))
    }

    /// Name of the boolean column this check writes for `column`
    pub fn result_column(&self, column: &str) -> String {
        format!("__{column}__{}__", self.name)
    }

    /// Boolean expression that is `true` where the check holds
    pub fn predicate(&self, column: &str, params: &CheckParams) -> Result<Expr> {
        match self.function {
            CheckFn::Simple(f) => Ok(f(col(column))),
            CheckFn::Parameterized(f) => f(col(column), params),
        }
    }
}

/// A check bound to a column and an action
#[derive(Debug, Clone)]
pub struct Test {
    pub check: Check,
    pub column: String,
    pub action: CheckAction,
    pub params: CheckParams,
}

impl Test {
    pub fn new(check: Check, column: impl Into<String>, action: CheckAction) -> Self {
        Self {
            check,
            column: column.into(),
            action,
            params: CheckParams::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    pub fn result_column(&self) -> String {
        self.check.result_column(&self.column)
    }

    /// The result column expression; nulls are treated as failures
    pub fn result_expr(&self) -> Result<Expr> {
        Ok(self
            .check
            .predicate(&self.column, &self.params)?
            .fill_null(lit(false))
            .alias(self.result_column().as_str()))
    }

    /// Evaluate this test alone, appending its result column to `df`
    pub fn run(&self, df: &DataFrame) -> Result<DataFrame> {
        Ok(df.clone().lazy().with_column(self.result_expr()?).collect()?)
    }
}

/// The three partitions produced by running tests over a frame
#[derive(Debug, Clone)]
pub struct CheckOutcome {
    pub passed: DataFrame,
    pub failed: DataFrame,
    pub quarantined: DataFrame,
}

impl CheckOutcome {
    /// Everything passes; failed/quarantined are empty with the tag column
    pub fn all_passed(df: DataFrame) -> Result<Self> {
        let empty = tagged_empty(&df)?;
        Ok(Self {
            passed: df,
            failed: empty.clone(),
            quarantined: empty,
        })
    }

    pub fn total_rows(&self) -> usize {
        self.passed.height() + self.failed.height() + self.quarantined.height()
    }
}

fn tagged_empty(df: &DataFrame) -> Result<DataFrame> {
    let mut empty = df.clear();
    empty.with_column(Column::new_empty(
        CHECK_NAME_COLUMN.into(),
        &DataType::String,
    ))?;
    Ok(empty)
}

/// First failing test name for `action`, or null
fn first_failure(tests: &[Test], action: CheckAction) -> Expr {
    let candidates: Vec<Expr> = tests
        .iter()
        .filter(|t| t.action == action)
        .map(|t| {
            when(col(t.result_column().as_str()).not())
                .then(lit(t.check.name.as_str()))
                .otherwise(lit(NULL).cast(DataType::String))
        })
        .collect();

    if candidates.is_empty() {
        lit(NULL).cast(DataType::String)
    } else {
        coalesce(&candidates)
    }
}

/// Run `tests` against `df` and partition its rows
pub fn run_tests(df: DataFrame, tests: &[Test]) -> Result<CheckOutcome> {
    if tests.is_empty() {
        return CheckOutcome::all_passed(df);
    }

    let data_columns: Vec<Expr> = df
        .get_column_names()
        .iter()
        .map(|c| col(c.as_str()))
        .collect();

    for test in tests {
        if df.column(&test.result_column()).is_ok() {
            return Err(StrataError::invalid_argument(
                "tests",
                format!(
                    "result column '{}' collides with a data column",
                    test.result_column()
                ),
            ));
        }
    }

    let results = tests
        .iter()
        .map(Test::result_expr)
        .collect::<Result<Vec<_>>>()?;

    let tagged = df
        .lazy()
        .with_columns(results)
        .with_columns([
            first_failure(tests, CheckAction::Fail).alias(FAIL_TAG),
            first_failure(tests, CheckAction::Quarantine).alias(QUARANTINE_TAG),
        ])
        .collect()?;

    let passed = tagged
        .clone()
        .lazy()
        .filter(col(FAIL_TAG).is_null().and(col(QUARANTINE_TAG).is_null()))
        .select(data_columns.clone())
        .collect()?;

    let mut failed_columns = data_columns.clone();
    failed_columns.push(col(FAIL_TAG).alias(CHECK_NAME_COLUMN));
    let failed = tagged
        .clone()
        .lazy()
        .filter(col(FAIL_TAG).is_not_null())
        .select(failed_columns)
        .collect()?;

    let mut quarantined_columns = data_columns;
    quarantined_columns.push(col(QUARANTINE_TAG).alias(CHECK_NAME_COLUMN));
    let quarantined = tagged
        .lazy()
        .filter(col(FAIL_TAG).is_null().and(col(QUARANTINE_TAG).is_not_null()))
        .select(quarantined_columns)
        .collect()?;

    tracing::debug!(
        passed = passed.height(),
        failed = failed.height(),
        quarantined = quarantined.height(),
        "Applied {} test(s)",
        tests.len()
    );

    Ok(CheckOutcome {
        passed,
        failed,
        quarantined,
    })
}

#[cfg(test)]
mod tests {
    use super::builtin::{not_null_or_empty, positive_int, value_in};
    use super::*;

    fn staff() -> DataFrame {
        df! {
            "id" => [1i64, 2, 3, 4, 5],
            "name" => ["Spongebob", "Gary", "Patrick", "Plankton", "Eugene"],
            "category" => ["FT", "", "FT", "TP", "FT"],
            "salary" => [55_000i64, 44_345, -100_000, 70_000, 120_000],
        }
        .expect("valid frame")
    }

    fn failing_ids(df: &DataFrame, result_column: &str) -> Result<Vec<i64>> {
        let out = df
            .clone()
            .lazy()
            .filter(col(result_column).not())
            .select([col("id")])
            .collect()?;
        Ok(out
            .column("id")?
            .as_materialized_series()
            .i64()?
            .into_no_null_iter()
            .collect())
    }

    #[test]
    fn test_result_column_name() {
        let test = Test::new(positive_int(), "salary", CheckAction::Fail);
        assert_eq!(test.result_column(), "__salary__positive_int__");
        assert!(test.check.is_simple());
        assert!(!value_in().is_simple());
    }

    #[test]
    fn test_single_checks() -> Result<()> {
        let df = staff();

        let positive = Test::new(positive_int(), "salary", CheckAction::Fail);
        assert_eq!(failing_ids(&positive.run(&df)?, &positive.result_column())?, vec![3]);

        let not_empty = Test::new(not_null_or_empty(), "category", CheckAction::Fail);
        assert_eq!(failing_ids(&not_empty.run(&df)?, &not_empty.result_column())?, vec![2]);

        let allowed = Test::new(value_in(), "category", CheckAction::Fail)
            .with_param("values", serde_json::json!(["FT", ""]));
        assert_eq!(failing_ids(&allowed.run(&df)?, &allowed.result_column())?, vec![4]);
        Ok(())
    }

    #[test]
    fn test_partitioning_is_total_and_disjoint() -> Result<()> {
        let tests = vec![
            Test::new(positive_int(), "salary", CheckAction::Fail),
            Test::new(not_null_or_empty(), "category", CheckAction::Quarantine),
            Test::new(value_in(), "category", CheckAction::Quarantine)
                .with_param("values", serde_json::json!(["FT", "PT"])),
        ];
        let outcome = run_tests(staff(), &tests)?;

        assert_eq!(outcome.total_rows(), 5);
        assert_eq!(outcome.passed.height(), 3);
        assert_eq!(outcome.failed.height(), 1);
        assert_eq!(outcome.quarantined.height(), 1);

        let failed_name = outcome.failed.column(CHECK_NAME_COLUMN)?.str()?.get(0);
        assert_eq!(failed_name, Some("positive_int"));
        // Gary fails both quarantine tests; the first declared one is recorded
        let quarantined_name = outcome.quarantined.column(CHECK_NAME_COLUMN)?.str()?.get(0);
        assert_eq!(quarantined_name, Some("not_null_or_empty"));

        assert_eq!(outcome.passed.width(), 4);
        Ok(())
    }

    #[test]
    fn test_fail_takes_precedence_over_quarantine() -> Result<()> {
        let df = df! {
            "id" => [1i64],
            "salary" => [-5i64],
        }?;
        let tests = vec![
            Test::new(positive_int(), "id", CheckAction::Quarantine),
            Test::new(positive_int(), "salary", CheckAction::Fail),
        ];
        let outcome = run_tests(df, &tests)?;
        assert_eq!(outcome.failed.height(), 1);
        assert_eq!(outcome.quarantined.height(), 0);
        assert_eq!(outcome.passed.height(), 0);
        Ok(())
    }

    #[test]
    fn test_result_column_collision_rejected() -> Result<()> {
        let df = df! {
            "salary" => [1i64],
            "__salary__positive_int__" => [true],
        }?;
        let tests = vec![Test::new(positive_int(), "salary", CheckAction::Fail)];
        assert!(matches!(
            run_tests(df, &tests),
            Err(StrataError::InvalidArgument { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_null_counts_as_failure() -> Result<()> {
        let df = df! {
            "id" => [1i64, 2],
            "salary" => [Some(10i64), None],
        }?;
        let tests = vec![Test::new(positive_int(), "salary", CheckAction::Fail)];
        let outcome = run_tests(df, &tests)?;
        assert_eq!(outcome.passed.height(), 1);
        assert_eq!(outcome.failed.height(), 1);
        Ok(())
    }

    #[test]
    fn test_no_tests_passes_everything() -> Result<()> {
        let outcome = run_tests(staff(), &[])?;
        assert_eq!(outcome.passed.height(), 5);
        assert!(outcome.failed.is_empty());
        assert!(outcome.failed.column(CHECK_NAME_COLUMN).is_ok());
        Ok(())
    }
}
