//! Decoded row updates and the sink that applies them.

use crate::checkpoint::BinlogCoordinates;
use crate::error::Result;

/// One `(row id, vector)` change decoded from a row event.
///
/// Moved into the update queue by the decode thread and owned by exactly one
/// worker after dequeue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateItem {
    /// Database name
    pub database: String,
    /// Table name
    pub table: String,
    /// Vector column name
    pub column: String,
    /// Value of the id column
    pub row_id: u64,
    /// Raw vector column bytes
    pub vector: Vec<u8>,
    /// Binlog position the row was read at
    pub origin: BinlogCoordinates,
    /// Log-order sequence number, assigned at enqueue
    pub seq: u64,
}

impl UpdateItem {
    /// Create an item with sequence 0.
    pub fn new(
        database: impl Into<String>,
        table: impl Into<String>,
        column: impl Into<String>,
        row_id: u64,
        vector: Vec<u8>,
        origin: BinlogCoordinates,
    ) -> Self {
        Self {
            database: database.into(),
            table: table.into(),
            column: column.into(),
            row_id,
            vector,
            origin,
            seq: 0,
        }
    }

    /// `db.table.column` key of the target index.
    pub fn index_key(&self) -> String {
        index_key(&self.database, &self.table, &self.column)
    }
}

/// Key under which a column's index is registered.
pub fn index_key(database: &str, table: &str, column: &str) -> String {
    format!("{database}.{table}.{column}")
}

/// Applies decoded updates to their target index.
///
/// Called concurrently from every worker thread. Updates for different rows
/// may arrive in any order.
pub trait TableUpdateSink: Send + Sync {
    /// Apply one update.
    fn apply(&self, item: &UpdateItem) -> Result<()>;
}
