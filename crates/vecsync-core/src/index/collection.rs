//! Registry of open vector indexes
//!
//! Maps `db.table.column` to the open index and acts as the default
//! [`TableUpdateSink`] for the binlog pipeline.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use super::{SaveMode, VectorIndex};
use crate::checkpoint::BinlogCoordinates;
use crate::error::{Result, VecsyncError};
use crate::update::{index_key, TableUpdateSink, UpdateItem};

/// Open indexes keyed by `db.table.column`.
pub struct IndexCollection {
    index_dir: PathBuf,
    indexes: RwLock<HashMap<String, Arc<dyn VectorIndex>>>,
    /// Serialises reading and advancing an index's recorded coordinates
    stamp: Mutex<()>,
}

impl IndexCollection {
    /// Empty collection persisting into `index_dir`
    pub fn new(index_dir: impl Into<PathBuf>) -> Self {
        Self {
            index_dir: index_dir.into(),
            indexes: RwLock::new(HashMap::new()),
            stamp: Mutex::new(()),
        }
    }

    /// Directory indexes are saved into
    pub fn index_dir(&self) -> &Path {
        &self.index_dir
    }

    /// Register `index` for `database.table.column`, replacing any previous one.
    pub fn register(
        &self,
        database: &str,
        table: &str,
        column: &str,
        index: Arc<dyn VectorIndex>,
    ) -> Option<Arc<dyn VectorIndex>> {
        let key = index_key(database, table, column);
        debug!(index = %key, "registered vector index");
        self.indexes.write().insert(key, index)
    }

    /// Remove an index.
    pub fn remove(&self, database: &str, table: &str, column: &str) -> Option<Arc<dyn VectorIndex>> {
        self.indexes
            .write()
            .remove(&index_key(database, table, column))
    }

    /// Look up an index.
    pub fn get(&self, database: &str, table: &str, column: &str) -> Option<Arc<dyn VectorIndex>> {
        self.get_by_key(&index_key(database, table, column))
    }

    /// Look up an index by its `db.table.column` key.
    pub fn get_by_key(&self, key: &str) -> Option<Arc<dyn VectorIndex>> {
        self.indexes.read().get(key).cloned()
    }

    /// Number of open indexes
    pub fn len(&self) -> usize {
        self.indexes.read().len()
    }

    /// Check if no index is open
    pub fn is_empty(&self) -> bool {
        self.indexes.read().is_empty()
    }

    /// Registered keys, sorted
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.indexes.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Stamp one index with `coords` and save it in checkpoint mode.
    pub fn checkpoint_index(
        &self,
        database: &str,
        table: &str,
        column: &str,
        coords: &BinlogCoordinates,
    ) -> Result<()> {
        self.stamp_and_save(database, table, column, coords, SaveMode::Checkpoint)
    }

    /// Stamp one index with `coords` and save it.
    pub fn stamp_and_save(
        &self,
        database: &str,
        table: &str,
        column: &str,
        coords: &BinlogCoordinates,
        mode: SaveMode,
    ) -> Result<()> {
        let key = index_key(database, table, column);
        let index = self
            .get_by_key(&key)
            .ok_or_else(|| VecsyncError::IndexNotFound(key.clone()))?;

        {
            let _stamp = self.stamp.lock();
            index.set_last_update_coordinates(&coords.file, coords.pos);
        }
        index.save_index(&self.index_dir, mode)?;
        debug!(index = %key, %coords, %mode, "saved vector index");
        Ok(())
    }

    /// Save every open index, returning how many failed.
    pub fn save_all(&self, mode: SaveMode) -> usize {
        let indexes: Vec<Arc<dyn VectorIndex>> = self.indexes.read().values().cloned().collect();
        let mut failures = 0;
        for index in indexes {
            if let Err(e) = index.save_index(&self.index_dir, mode) {
                warn!(index = %index.name(), %mode, error = %e, "failed to save vector index");
                failures += 1;
            }
        }
        failures
    }
}

impl TableUpdateSink for IndexCollection {
    fn apply(&self, item: &UpdateItem) -> Result<()> {
        let key = item.index_key();
        let index = self
            .get_by_key(&key)
            .ok_or(VecsyncError::IndexNotFound(key))?;

        index.insert_vector(&item.vector, 0, item.row_id)?;

        // Workers finish out of log order; the recorded position only moves forward.
        let _stamp = self.stamp.lock();
        let advances = index
            .last_update_coordinates()
            .map_or(true, |last| item.origin.is_after(&last));
        if advances {
            index.set_last_update_coordinates(&item.origin.file, item.origin.pos);
        }
        Ok(())
    }
}
