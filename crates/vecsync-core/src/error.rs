//! Error types for vecsync
//!
//! This module defines the error type shared by configuration, option parsing,
//! the tracked-table registry and the vector index plumbing.
//! Uses `thiserror` for ergonomic error definitions.

use std::io;
use thiserror::Error;

/// Main error type for vecsync core operations
#[derive(Error, Debug)]
pub enum VecsyncError {
    /// Configuration parsing or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Options string is not a well-formed `key=value` list
    #[error("Invalid options string: {0}")]
    InvalidOptions(String),

    /// Option present but its value has the wrong shape
    #[error("Invalid value for option '{key}': {value}")]
    InvalidOptionValue {
        /// Option name
        key: String,
        /// Offending value
        value: String,
    },

    /// No index is registered under the given `db.table.column` name
    #[error("Vector index not found: {0}")]
    IndexNotFound(String),

    /// The index rejected an operation
    #[error("Index error: {0}")]
    Index(String),

    /// A tracked-table entry failed validation
    #[error("Invalid tracked table '{key}': {reason}")]
    InvalidTrackedTable {
        /// `db.table` key
        key: String,
        /// Why it was rejected
        reason: String,
    },

    /// JSON (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Underlying I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Result type alias for vecsync core operations
pub type Result<T> = std::result::Result<T, VecsyncError>;

impl VecsyncError {
    /// Shorthand for [`VecsyncError::Index`].
    pub fn index(msg: impl Into<String>) -> Self {
        VecsyncError::Index(msg.into())
    }
}
