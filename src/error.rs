use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

use crate::domain::{Granularity, SourceProfile};

#[derive(Debug, Error, Diagnostic)]
pub enum TrendsError {
    #[error("{profile} metadata is missing required columns: {}", .missing.join(", "))]
    #[diagnostic(
        code(kira_vt::missing_columns),
        help("check --source; gisaid and nextstrain exports use different column names")
    )]
    MissingColumns {
        profile: SourceProfile,
        missing: Vec<String>,
    },

    #[error("metadata input is empty (no header row)")]
    EmptyInput,

    #[error("failed to read metadata input: {0}")]
    Input(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("store is being rebuilt by an ingestion run; try again later")]
    Unavailable,

    #[error("no rollup store at {0}; run `kira-vt ingest` first")]
    StoreNotReady(PathBuf),

    #[error("unknown {granularity} location: {name}")]
    UnknownLocation {
        granularity: Granularity,
        name: String,
    },

    #[error("location name {name} is ambiguous, candidates: {}", .candidates.join(", "))]
    AmbiguousLocation {
        name: String,
        candidates: Vec<String>,
    },

    #[error("invalid date (expected YYYY-MM-DD): {0}")]
    InvalidDate(String),

    #[error("invalid mutation key (expected PROTEIN_MUTATION): {0}")]
    InvalidMutation(String),

    #[error("support fraction must be within [0, 1], got {0}")]
    InvalidSupport(f64),

    #[error("invalid source profile: {0}")]
    InvalidSource(String),

    #[error("invalid lineage list: {0}")]
    InvalidLineages(String),

    #[error("missing config file kira-vt.json in current directory")]
    MissingConfig,

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("no input file given (use --input or the `input` config field)")]
    MissingInput,
}

impl From<rusqlite::Error> for TrendsError {
    fn from(err: rusqlite::Error) -> Self {
        match err.sqlite_error_code() {
            Some(rusqlite::ErrorCode::DatabaseBusy) | Some(rusqlite::ErrorCode::DatabaseLocked) => {
                TrendsError::Unavailable
            }
            _ => TrendsError::Database(err.to_string()),
        }
    }
}
