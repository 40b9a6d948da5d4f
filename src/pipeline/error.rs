//! Stream controller errors

use thiserror::Error;
use vecsync_binlog::WireError;
use vecsync_core::VecsyncError;

/// Why the stream controller could not start or keep running.
#[derive(Debug, Error)]
pub enum StreamError {
    /// Every connection attempt failed.
    #[error("gave up connecting after {attempts} attempts: {last_error}")]
    ConnectRetriesExhausted {
        /// Attempts made
        attempts: u32,
        /// Error of the final attempt
        last_error: String,
    },

    /// The saved checkpoint belongs to a different server.
    #[error("checkpoint belongs to server {persisted}, connected server is {live}")]
    IdentityMismatch {
        /// Server uuid stored in the checkpoint
        persisted: String,
        /// Server uuid reported by the connection
        live: String,
    },

    /// Protocol or network failure on an established connection.
    #[error(transparent)]
    Wire(#[from] WireError),

    /// `stop` was called while `start` was still connecting.
    #[error("stream start cancelled by shutdown")]
    Cancelled,

    /// A bulk build or refresh could not load its rows.
    #[error("bulk load of {index} failed: {reason}")]
    BulkLoad {
        /// `db.table.column` of the index
        index: String,
        /// What went wrong
        reason: String,
    },

    /// A vector index or the table registry rejected an operation.
    #[error(transparent)]
    Index(#[from] VecsyncError),

    /// Anything else that prevents the pipeline from running.
    #[error("{0}")]
    Fatal(String),
}

impl StreamError {
    /// Whether retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            StreamError::Wire(e) => e.is_connectivity(),
            StreamError::ConnectRetriesExhausted { .. }
            | StreamError::IdentityMismatch { .. }
            | StreamError::Cancelled
            | StreamError::BulkLoad { .. }
            | StreamError::Index(_)
            | StreamError::Fatal(_) => false,
        }
    }
}
