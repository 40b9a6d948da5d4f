//! Binlog checkpoint persistence
//!
//! Persists the resume position of the binlog stream so a restart continues
//! exactly where the previous run left off. The position is only ever
//! advanced at log-rotation boundaries, after every update from the file being
//! rotated away has been applied.
//!
//! File format (JSON):
//! ```text
//! {"server_uuid":"<uuid>","binlog_file":"binlog.000042","binlog_pos":4}
//! ```

use std::fmt;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// A `(file, position)` pair in the primary's binary log.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BinlogCoordinates {
    /// Binlog file name
    pub file: String,
    /// Byte offset within the file
    pub pos: u64,
}

impl BinlogCoordinates {
    /// Create coordinates.
    pub fn new(file: impl Into<String>, pos: u64) -> Self {
        Self {
            file: file.into(),
            pos,
        }
    }

    /// Whether a log file is known yet.
    pub fn is_known(&self) -> bool {
        !self.file.is_empty()
    }

    /// Numeric extension of the file name (`binlog.000042` is 42).
    pub fn file_sequence(&self) -> Option<u64> {
        self.file
            .rsplit_once('.')
            .and_then(|(_, ext)| ext.parse().ok())
    }

    /// Whether `self` lies strictly after `other` in the log.
    ///
    /// Files are ordered by their numeric extension, which keeps counting
    /// past six digits; names without one fall back to string order.
    pub fn is_after(&self, other: &BinlogCoordinates) -> bool {
        if self.file == other.file {
            return self.pos > other.pos;
        }
        match (self.file_sequence(), other.file_sequence()) {
            (Some(ours), Some(theirs)) if ours != theirs => ours > theirs,
            _ => self.file > other.file,
        }
    }
}

impl fmt::Display for BinlogCoordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.pos)
    }
}

/// Durable resume position for one binlog source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// `@@server_uuid` of the source the offsets belong to
    pub server_uuid: String,
    /// Binlog file to resume from
    pub binlog_file: String,
    /// Position within `binlog_file`
    pub binlog_pos: u64,
}

impl Checkpoint {
    /// Create a checkpoint for `server_uuid` at `coords`.
    pub fn new(server_uuid: impl Into<String>, coords: &BinlogCoordinates) -> Self {
        Self {
            server_uuid: server_uuid.into(),
            binlog_file: coords.file.clone(),
            binlog_pos: coords.pos,
        }
    }

    /// All three fields are populated.
    pub fn is_complete(&self) -> bool {
        !self.server_uuid.is_empty() && !self.binlog_file.is_empty() && self.binlog_pos != 0
    }

    /// The resume coordinates.
    pub fn coordinates(&self) -> BinlogCoordinates {
        BinlogCoordinates::new(self.binlog_file.clone(), self.binlog_pos)
    }
}

/// Errors during checkpoint persistence.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    /// I/O error writing the checkpoint file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The checkpoint could not be serialized.
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Reads and atomically rewrites the checkpoint file.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    /// Store at `dir/file_name`.
    pub fn new(dir: impl AsRef<Path>, file_name: &str) -> Self {
        Self {
            path: dir.as_ref().join(file_name),
        }
    }

    /// Store at an explicit path.
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the canonical checkpoint file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".tmp");
        PathBuf::from(name)
    }

    /// Load the persisted checkpoint.
    ///
    /// A missing, truncated or unparsable file means "no checkpoint"; this
    /// never fails.
    pub fn load(&self) -> Option<Checkpoint> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no binlog checkpoint found");
                return None;
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failed to read binlog checkpoint");
                return None;
            }
        };

        match serde_json::from_str::<Checkpoint>(&content) {
            Ok(checkpoint) => {
                debug!(
                    server_uuid = %checkpoint.server_uuid,
                    binlog_file = %checkpoint.binlog_file,
                    binlog_pos = checkpoint.binlog_pos,
                    "loaded binlog checkpoint"
                );
                Some(checkpoint)
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "ignoring corrupt binlog checkpoint");
                None
            }
        }
    }

    /// Persist `checkpoint`.
    ///
    /// Writes a sibling temp file, syncs it, then renames it over the
    /// canonical path. An incomplete checkpoint is silently skipped so partial
    /// state never replaces a good one.
    pub fn save(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        if !checkpoint.is_complete() {
            debug!(?checkpoint, "skipping incomplete binlog checkpoint");
            return Ok(());
        }

        let content = serde_json::to_vec(checkpoint)?;
        let tmp = self.tmp_path();
        {
            let mut file = File::create(&tmp)?;
            file.write_all(&content)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;

        debug!(
            binlog_file = %checkpoint.binlog_file,
            binlog_pos = checkpoint.binlog_pos,
            "persisted binlog checkpoint"
        );
        Ok(())
    }
}
