//! Settings export/import archive
//!
//! An archive is a gzip-compressed tar stream with one directory entry named
//! [`ARCHIVE_PREFIX`] followed by one JSON document per registered model,
//! stored as `<ARCHIVE_PREFIX>/<file name>`. Each document is an array of flat
//! row records with sorted keys.

mod export;
mod import;
pub mod registry;

pub use export::{ExportedArchive, export};
pub use import::{ImportSummary, import};

use chrono::NaiveDateTime;
use thiserror::Error;

/// Name of the root directory entry of every archive
pub const ARCHIVE_PREFIX: &str = "alarmdecoder-export";

/// Timestamp layout used in exported documents
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S.%6f";

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("not a valid AlarmDecoder archive: {0}")]
    MalformedArchive(String),

    #[error("invalid value for {table}.{field}: {reason}")]
    InvalidFieldValue {
        table: &'static str,
        field: String,
        reason: String,
    },

    #[error("unknown field {table}.{field}")]
    UnknownField { table: &'static str, field: String },

    #[error("failed to decode {file_name}: {source}")]
    InvalidDocument {
        file_name: &'static str,
        source: serde_json::Error,
    },

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error(transparent)]
    Datastore(#[from] anyhow::Error),

    #[error("failed to write archive: {0}")]
    Io(#[from] std::io::Error),
}

pub(crate) fn format_timestamp(timestamp: &NaiveDateTime) -> String {
    timestamp.format(TIMESTAMP_FORMAT).to_string()
}

pub(crate) fn parse_timestamp(value: &str) -> Result<NaiveDateTime, chrono::ParseError> {
    NaiveDateTime::parse_from_str(value, TIMESTAMP_FORMAT)
}
