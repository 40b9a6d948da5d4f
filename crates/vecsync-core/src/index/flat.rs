//! Flat (exact) vector index
//!
//! Keeps every vector in memory keyed by row id and persists the whole map as
//! one JSON document. Suitable for small tables and for exercising the
//! pipeline end to end.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{IndexOpener, SaveMode, VectorIndex};
use crate::checkpoint::BinlogCoordinates;
use crate::error::{Result, VecsyncError};
use crate::options::Options;
use crate::update::index_key;

/// Size in bytes of one stored vector component (float32).
const COMPONENT_SIZE: usize = 4;

#[derive(Serialize, Deserialize)]
struct FlatIndexFile {
    name: String,
    dimension: usize,
    update_ts: u64,
    saved_by: String,
    last_update: Option<BinlogCoordinates>,
    vectors: Vec<StoredVector>,
}

#[derive(Serialize, Deserialize)]
struct StoredVector {
    id: u64,
    vector: Vec<u8>,
}

/// Flat index storing raw vector bytes by row id
///
/// # Example
///
/// ```
/// use vecsync_core::index::{FlatVectorIndex, VectorIndex};
///
/// let index = FlatVectorIndex::new("shop.products.embedding", 2);
/// index.insert_vector(&[0u8; 8], 0, 42)?;
/// assert_eq!(index.len(), 1);
/// # Ok::<(), vecsync_core::VecsyncError>(())
/// ```
pub struct FlatVectorIndex {
    name: String,
    /// Components per vector; 0 accepts any length
    dim: usize,
    vectors: RwLock<HashMap<u64, Vec<u8>>>,
    update_ts: AtomicU64,
    last_update: Mutex<Option<BinlogCoordinates>>,
}

impl FlatVectorIndex {
    /// Create an empty index
    pub fn new(name: impl Into<String>, dimension: usize) -> Self {
        Self {
            name: name.into(),
            dim: dimension,
            vectors: RwLock::new(HashMap::new()),
            update_ts: AtomicU64::new(0),
            last_update: Mutex::new(None),
        }
    }

    /// Load `name` from `dir`, or create it empty if it was never saved.
    pub fn load(dir: &Path, name: &str, dimension: usize) -> Result<Self> {
        let path = Self::file_path(dir, name);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(index = %name, "no saved flat index, starting empty");
                return Ok(Self::new(name, dimension));
            }
            Err(e) => return Err(e.into()),
        };

        let file: FlatIndexFile = serde_json::from_str(&content)?;
        if file.name != name {
            return Err(VecsyncError::index(format!(
                "index file {} belongs to '{}', expected '{}'",
                path.display(),
                file.name,
                name
            )));
        }
        if dimension != 0 && file.dimension != 0 && file.dimension != dimension {
            return Err(VecsyncError::index(format!(
                "index '{}' was saved with dimension {}, configured {}",
                name, file.dimension, dimension
            )));
        }

        let index = Self::new(name, dimension.max(file.dimension));
        index.update_ts.store(file.update_ts, Ordering::Relaxed);
        *index.last_update.lock() = file.last_update;
        index
            .vectors
            .write()
            .extend(file.vectors.into_iter().map(|v| (v.id, v.vector)));

        info!(index = %name, vectors = index.len(), "loaded flat index");
        Ok(index)
    }

    /// Location of the persisted index for `name` under `dir`
    pub fn file_path(dir: &Path, name: &str) -> PathBuf {
        dir.join(format!("{name}.flat.json"))
    }

    /// Get the vector stored for `row_id`
    pub fn get(&self, row_id: u64) -> Option<Vec<u8>> {
        self.vectors.read().get(&row_id).cloned()
    }

    /// Check if a row id is indexed
    pub fn contains(&self, row_id: u64) -> bool {
        self.vectors.read().contains_key(&row_id)
    }

    /// Number of indexed rows
    pub fn len(&self) -> usize {
        self.vectors.read().len()
    }

    /// Check if the index is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Configured dimension (0 = unchecked)
    pub fn dimension(&self) -> usize {
        self.dim
    }
}

impl VectorIndex for FlatVectorIndex {
    fn name(&self) -> &str {
        &self.name
    }

    fn insert_vector(&self, vector: &[u8], _flags: u32, row_id: u64) -> Result<()> {
        if self.dim != 0 && vector.len() != self.dim * COMPONENT_SIZE {
            return Err(VecsyncError::index(format!(
                "dimension mismatch in '{}': expected {} bytes, got {}",
                self.name,
                self.dim * COMPONENT_SIZE,
                vector.len()
            )));
        }

        self.vectors.write().insert(row_id, vector.to_vec());
        Ok(())
    }

    fn save_index(&self, dir: &Path, mode: SaveMode) -> Result<()> {
        let mut vectors: Vec<StoredVector> = self
            .vectors
            .read()
            .iter()
            .map(|(id, vector)| StoredVector {
                id: *id,
                vector: vector.clone(),
            })
            .collect();
        vectors.sort_by_key(|v| v.id);

        let file = FlatIndexFile {
            name: self.name.clone(),
            dimension: self.dim,
            update_ts: self.update_ts(),
            saved_by: mode.to_string(),
            last_update: self.last_update_coordinates(),
            vectors,
        };

        let path = Self::file_path(dir, &self.name);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec(&file)?)?;
        fs::rename(&tmp, &path)?;

        debug!(index = %self.name, %mode, rows = file.vectors.len(), "saved flat index");
        Ok(())
    }

    fn update_ts(&self) -> u64 {
        self.update_ts.load(Ordering::Relaxed)
    }

    fn set_update_ts(&self, ts: u64) {
        self.update_ts.store(ts, Ordering::Relaxed);
    }

    fn set_last_update_coordinates(&self, file: &str, pos: u64) {
        *self.last_update.lock() = Some(BinlogCoordinates::new(file, pos));
    }

    fn last_update_coordinates(&self) -> Option<BinlogCoordinates> {
        self.last_update.lock().clone()
    }

    fn supports_incr_updates(&self) -> bool {
        true
    }
}

/// Opens [`FlatVectorIndex`]es stored in one directory.
///
/// Honours the `dim` option; other options are ignored.
#[derive(Debug, Clone)]
pub struct FlatIndexOpener {
    dir: PathBuf,
}

impl FlatIndexOpener {
    /// Opener reading and writing index files under `dir`
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl IndexOpener for FlatIndexOpener {
    fn open(
        &self,
        database: &str,
        table: &str,
        column: &str,
        options: &Options,
    ) -> Result<Arc<dyn VectorIndex>> {
        let dim = options.get_int("dim", 0)?;
        let dim = usize::try_from(dim).map_err(|_| VecsyncError::InvalidOptionValue {
            key: "dim".to_string(),
            value: dim.to_string(),
        })?;
        let name = index_key(database, table, column);
        Ok(Arc::new(FlatVectorIndex::load(&self.dir, &name, dim)?))
    }
}
