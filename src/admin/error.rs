use std::path::{Path, PathBuf};

use crate::types::DbError;
use thiserror::Error;

/// Error type for administrative operations.
#[derive(Debug, Error)]
pub enum AdminError {
    /// Database file not found at the specified path.
    #[error("database not found: {0}")]
    MissingDatabase(PathBuf),
    /// A dump line could not be parsed.
    #[error("dump line {line}: {message}")]
    BadDumpLine {
        /// One-based line number.
        line: usize,
        /// What was wrong with it.
        message: String,
    },
    /// Core database error.
    #[error(transparent)]
    Core(#[from] DbError),
    /// I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result type alias for administrative operations.
pub type Result<T> = std::result::Result<T, AdminError>;

impl AdminError {
    pub(crate) fn missing_database(path: impl AsRef<Path>) -> Self {
        AdminError::MissingDatabase(path.as_ref().to_path_buf())
    }
}
