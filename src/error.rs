use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// A write was rejected because a value broke a data rule.
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("score for `{key}` must be within [0, 100], got {value}")]
    ScoreOutOfRange { key: String, value: f64 },
    #[error("unknown dimension `{0}`")]
    UnknownDimension(String),
    #[error("retention window must be a positive number of days within the calendar, got {0}")]
    RetentionOutOfRange(i64),
}

/// Configuration problems detected before any data is touched.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("dimension registry is empty")]
    EmptyRegistry,
    #[error("invalid storage key `{0}`: use lowercase letters, digits and underscores")]
    InvalidStorageKey(String),
    #[error("duplicate storage key `{0}`")]
    DuplicateStorageKey(String),
    #[error("weight for `{key}` must be a non-negative number, got {weight}")]
    InvalidWeight { key: String, weight: f64 },
    #[error("dimension weights sum to {0}, expected 1.0")]
    WeightsNotNormalized(f64),
    #[error("grade thresholds must be strictly descending in both grade and bound")]
    UnorderedThresholds,
    #[error("unknown dimension preset `{0}`")]
    UnknownPreset(String),
    #[error("`{field}` must be mapped to a source column")]
    UnmappedIdentity { field: &'static str },
    #[error("mapped column `{column}` for `{field}` is not present in the source")]
    MissingSourceColumn { field: String, column: String },
    #[error("mapping refers to unknown dimension `{0}`")]
    UnknownMappingKey(String),
    #[error("{name} must be {expected}, got `{value}`")]
    InvalidEnv {
        name: &'static str,
        expected: &'static str,
        value: String,
    },
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse JSON configuration: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("leader {0} not found")]
    LeaderNotFound(i64),
    #[error("score record {0} not found")]
    RecordNotFound(i64),
    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

/// One rejected source row, located by its 1-based line in the source file.
#[derive(Debug, Clone, PartialEq)]
pub struct RowIssue {
    pub line: usize,
    pub column: String,
    pub value: String,
    pub reason: String,
}

impl fmt::Display for RowIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "row {} column `{}`: {} (value `{}`)",
            self.line, self.column, self.reason, self.value
        )
    }
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to open {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read source: {0}")]
    Read(#[from] std::io::Error),
    #[error("source is neither UTF-8 nor GBK/GB2312 text")]
    Encoding,
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("workbook error: {0}")]
    Workbook(#[from] calamine::Error),
    #[error("unsupported file type `{0}`, expected csv, xlsx, xls or ods")]
    UnsupportedFormat(String),
    #[error("source contains no data rows")]
    Empty,
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("{} invalid row(s): {}", .0.len(), join_issues(.0))]
    InvalidRows(Vec<RowIssue>),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Source(#[from] SourceError),
}

impl From<sqlx::Error> for IngestError {
    fn from(value: sqlx::Error) -> Self {
        Self::Store(StoreError::Storage(value))
    }
}

fn join_issues(issues: &[RowIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
