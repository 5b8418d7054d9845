// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::io;

/// Errors surfaced by the head block store.
///
/// Integrity violations (a rewriter asked to translate a per-profile ID it
/// has never seen) are not represented here: they indicate a bug in the
/// ingest pipeline, not a caller mistake, and abort via panic instead.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed input: a bad pprof payload, a bad label selector, or an
    /// unknown profile type.
    #[error("invalid input: {0}")]
    Invalid(String),

    /// The operation was attempted on a head that has already been flushed
    /// or closed.
    #[error("head is closed")]
    Closed,

    /// A filesystem operation failed.
    #[error("io: {0}")]
    Io(String),

    /// A table persister failed while finalizing a columnar file.
    #[error("persister: {0}")]
    Persister(String),

    /// The caller cancelled the operation.
    #[error("operation cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Error::Invalid(msg.into())
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<arrow::error::ArrowError> for Error {
    fn from(err: arrow::error::ArrowError) -> Self {
        Error::Persister(err.to_string())
    }
}

impl From<parquet::errors::ParquetError> for Error {
    fn from(err: parquet::errors::ParquetError) -> Self {
        Error::Persister(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Persister(err.to_string())
    }
}

impl From<Box<bincode::ErrorKind>> for Error {
    fn from(err: Box<bincode::ErrorKind>) -> Self {
        Error::Persister(err.to_string())
    }
}
