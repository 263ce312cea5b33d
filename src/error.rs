//! Centralized error handling for strata.
//!
//! Every precondition the engine enforces has its own variant, carrying the
//! offending value instead of a pre-formatted message, so callers can match on
//! the failure:
//!
//! ```
//! use strata::error::StrataError;
//!
//! fn describe(err: &StrataError) -> String {
//!     match err {
//!         StrataError::UnrecognizedType { value } => format!("bad type {value}"),
//!         StrataError::EmptyPipelineResult { table } => format!("{table} loaded nothing"),
//!         other => other.to_string(),
//!     }
//! }
//! ```
//!
//! Errors from polars, the filesystem and `serde_json` convert through `From`,
//! so `?` works across those boundaries. Nothing in the crate retries: every
//! error is raised to the caller as soon as it happens.

use std::path::PathBuf;

/// Main error type for strata operations.
#[derive(Debug, thiserror::Error)]
pub enum StrataError {
    /// A storage or processing type has no entry in the type mapping
    #[error("Unrecognized data type: {value}")]
    UnrecognizedType { value: String },

    /// Ingestion discovery strategy is not SHALLOW or DATED
    #[error("Unrecognized directory type: {value}")]
    DirectoryTypeNotRecognized { value: String },

    /// Write mode outside APPEND / OVERWRITE / UPSERT
    #[error("Unrecognized write logic: {value}")]
    UnrecognizedWriteLogic { value: String },

    /// Quality tier outside RAW / CONFORMED / CANONICAL / STANDARD
    #[error("Unrecognized table quality: {value}")]
    UnrecognizedTableQuality { value: String },

    /// A strict pipe produced nothing to persist
    #[error("Pipe for {table} executed in strict mode but did not load data")]
    EmptyPipelineResult { table: String },

    /// Input to a table write could not be coerced into a frame
    #[error("Unrecognized data format: {found}")]
    UnsupportedDataFormat { found: String },

    /// Upsert attempted on a table without primary keys
    #[error("Table {table} does not have primary keys")]
    MissingPrimaryKeys { table: String },

    /// Upsert attempted before a merge predicate was built
    #[error("Merge predicate for {table} did not initialize")]
    MergePredicateUnavailable { table: String },

    /// A file disappeared between discovery and metadata collection
    #[error("File not found: {}", path.display())]
    FileNotFound { path: PathBuf },

    /// Structured decoding requested for a raw file type that has none
    #[error("Structured decoding is not implemented for {format} files")]
    NotImplemented { format: String },

    /// An argument failed validation
    #[error("Invalid argument `{parameter}`: {reason}")]
    InvalidArgument { parameter: String, reason: String },

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Errors reported by the table storage backend
    #[error("Storage error: {0}")]
    Storage(String),

    /// I/O errors (file operations)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Errors raised by the polars engine
    #[error("Data processing error: {0}")]
    Polars(#[from] polars::error::PolarsError),

    /// JSON (de)serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl StrataError {
    pub(crate) fn invalid_argument(parameter: &str, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            parameter: parameter.to_owned(),
            reason: reason.into(),
        }
    }
}

/// Lets user load and transform logic written against `anyhow` use `?`;
/// the whole context chain is kept in the message.
impl From<anyhow::Error> for StrataError {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(format!("{err:#}"))
    }
}

/// Result type alias for strata operations.
pub type Result<T> = std::result::Result<T, StrataError>;

/// Extension trait to add context to results.
pub trait ResultExt<T> {
    /// Add context to an error.
    fn context(self, msg: impl Into<String>) -> Result<T>;

    /// Add context using a closure (lazy evaluation).
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: Into<StrataError>,
{
    fn context(self, msg: impl Into<String>) -> Result<T> {
        self.map_err(|e| {
            let err: StrataError = e.into();
            StrataError::Other(format!("{}: {}", msg.into(), err))
        })
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| {
            let err: StrataError = e.into();
            StrataError::Other(format!("{}: {}", f(), err))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StrataError::UnrecognizedType {
            value: "uint8".to_owned(),
        };
        assert_eq!(err.to_string(), "Unrecognized data type: uint8");

        let err = StrataError::invalid_argument("select", "unknown column 'x'");
        assert_eq!(
            err.to_string(),
            "Invalid argument `select`: unknown column 'x'"
        );
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: StrataError = io.into();
        assert!(matches!(err, StrataError::Io(_)));
    }

    #[test]
    fn test_result_context() {
        let result: std::result::Result<(), std::io::Error> = Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "file.txt",
        ));

        let result: Result<()> = result.context("Failed to read file");
        let err = result.expect_err("context should keep the error");
        assert!(err.to_string().contains("Failed to read file"));
    }
}
