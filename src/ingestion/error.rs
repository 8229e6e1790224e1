//! Error taxonomy for the ingestion pipeline
//!
//! Per-record errors (`NormalizeError`, `SourceError::Malformed`) are swallowed by the driver
//! after logging. Everything else aborts the current file.

use crate::ingestion::types::RunState;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use thiserror::Error;

/// A measurement that cannot be turned into rows; the record is skipped
#[derive(Debug, Error, PartialEq)]
pub enum NormalizeError {
    #[error("loss count {loss} exceeds probe count {probes}")]
    LossExceedsProbes { loss: u32, probes: u32 },

    #[error("start time {0} is before the Unix epoch")]
    StartBeforeEpoch(DateTime<Utc>),

    #[error("{field} out of range: {value}")]
    OutOfRange { field: &'static str, value: u64 },
}

/// Errors produced while reading a record file
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("line {line}: {reason}")]
    Malformed { line: usize, reason: String },

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl SourceError {
    /// Only I/O failures end the file; malformed records are skipped
    pub fn is_fatal(&self) -> bool {
        matches!(self, SourceError::Io { .. })
    }
}

/// Store failures - never retried
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store connection failed: {0}")]
    Connection(#[source] sqlx::Error),

    #[error("bulk insert into {table} failed: {source}")]
    Insert {
        table: &'static str,
        #[source]
        source: sqlx::Error,
    },
}

/// Fatal errors for an ingestion run
#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("driver cannot ingest in state {0}")]
    InvalidState(RunState),
}
