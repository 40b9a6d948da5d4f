//! Vector index interface
//!
//! The binlog pipeline never looks inside an index. It only needs to insert
//! vectors, ask the index to persist itself, and stamp it with the binlog
//! coordinates it has caught up to. Concrete ANN structures implement
//! [`VectorIndex`]; [`FlatVectorIndex`] is the exact in-memory implementation
//! shipped with the binary.

mod collection;
mod flat;

pub use collection::IndexCollection;
pub use flat::{FlatIndexOpener, FlatVectorIndex};

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use crate::checkpoint::BinlogCoordinates;
use crate::error::Result;
use crate::options::Options;

/// Why an index is being saved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveMode {
    /// After the initial bulk build
    Build,
    /// At a binlog rotation boundary
    Checkpoint,
    /// On controlled shutdown
    Shutdown,
}

impl SaveMode {
    /// Lowercase name used in logs and file metadata.
    pub fn as_str(&self) -> &'static str {
        match self {
            SaveMode::Build => "build",
            SaveMode::Checkpoint => "checkpoint",
            SaveMode::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for SaveMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A vector index over one table column.
///
/// Implementations must tolerate concurrent `insert_vector` calls for
/// different row ids.
pub trait VectorIndex: Send + Sync {
    /// `db.table.column` name of the index
    fn name(&self) -> &str;

    /// Insert or replace the vector stored for `row_id`.
    ///
    /// `flags` are implementation specific; the pipeline always passes 0.
    fn insert_vector(&self, vector: &[u8], flags: u32, row_id: u64) -> Result<()>;

    /// Persist the index under `dir`.
    fn save_index(&self, dir: &Path, mode: SaveMode) -> Result<()>;

    /// Unix timestamp of the last bulk (re)build
    fn update_ts(&self) -> u64;

    /// Record the bulk (re)build timestamp.
    fn set_update_ts(&self, ts: u64);

    /// Record the binlog position the index has caught up to.
    fn set_last_update_coordinates(&self, file: &str, pos: u64);

    /// The binlog position recorded by [`VectorIndex::set_last_update_coordinates`]
    fn last_update_coordinates(&self) -> Option<BinlogCoordinates>;

    /// Whether binlog-driven incremental updates are supported
    fn supports_incr_updates(&self) -> bool;
}

/// Opens (or creates) the index for a catalogued vector column.
pub trait IndexOpener: Send + Sync {
    /// Open the index for `database.table.column` configured by `options`.
    fn open(
        &self,
        database: &str,
        table: &str,
        column: &str,
        options: &Options,
    ) -> Result<Arc<dyn VectorIndex>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_mode_names() {
        assert_eq!(SaveMode::Build.to_string(), "build");
        assert_eq!(SaveMode::Checkpoint.as_str(), "checkpoint");
        assert_eq!(SaveMode::Shutdown.as_str(), "shutdown");
    }
}
