//! Tracked table registry
//!
//! Maps `database` and `table` to the vector column maintained from the binlog and the
//! ordinal positions the row decoder needs. Looked up on every table-map and
//! row event; a miss means the table is skipped.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{Result, VecsyncError};

/// A table whose vector column is maintained incrementally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedTable {
    /// Name of the vector column
    pub vector_column: String,
    /// 1-based ordinal of the id column
    pub id_column_ordinal: u32,
    /// 1-based ordinal of the vector column
    pub vector_column_ordinal: u32,
}

impl TrackedTable {
    /// Create an entry.
    pub fn new(vector_column: impl Into<String>, id_ordinal: u32, vector_ordinal: u32) -> Self {
        Self {
            vector_column: vector_column.into(),
            id_column_ordinal: id_ordinal,
            vector_column_ordinal: vector_ordinal,
        }
    }
}

/// `db.table` key.
pub fn table_key(database: &str, table: &str) -> String {
    format!("{database}.{table}")
}

/// Tracked tables keyed by database, then table.
#[derive(Debug, Clone, Default)]
pub struct TrackedTables {
    tables: HashMap<String, HashMap<String, TrackedTable>>,
    len: usize,
}

impl TrackedTables {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `database.table`, replacing any previous entry.
    ///
    /// Ordinals are 1-based; 0 means the column could not be resolved and is
    /// rejected.
    pub fn insert(&mut self, database: &str, table: &str, entry: TrackedTable) -> Result<()> {
        if entry.id_column_ordinal == 0 || entry.vector_column_ordinal == 0 {
            return Err(VecsyncError::InvalidTrackedTable {
                key: table_key(database, table),
                reason: "column ordinals are 1-based".to_string(),
            });
        }
        if entry.vector_column.is_empty() {
            return Err(VecsyncError::InvalidTrackedTable {
                key: table_key(database, table),
                reason: "vector column name is empty".to_string(),
            });
        }
        let previous = self
            .tables
            .entry(database.to_string())
            .or_default()
            .insert(table.to_string(), entry);
        if previous.is_none() {
            self.len += 1;
        }
        Ok(())
    }

    /// Stop tracking `database.table`.
    pub fn remove(&mut self, database: &str, table: &str) -> Option<TrackedTable> {
        let tables = self.tables.get_mut(database)?;
        let removed = tables.remove(table)?;
        if tables.is_empty() {
            self.tables.remove(database);
        }
        self.len -= 1;
        Some(removed)
    }

    /// Entry for `database.table`
    pub fn get(&self, database: &str, table: &str) -> Option<&TrackedTable> {
        self.tables.get(database)?.get(table)
    }

    /// Whether `database.table` is tracked
    pub fn contains(&self, database: &str, table: &str) -> bool {
        self.get(database, table).is_some()
    }

    /// Number of tracked tables
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether nothing is tracked
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Copy of all entries as `(database, table, entry)`, sorted.
    pub fn snapshot(&self) -> Vec<(String, String, TrackedTable)> {
        let mut entries: Vec<(String, String, TrackedTable)> = self
            .tables
            .iter()
            .flat_map(|(db, tables)| {
                tables
                    .iter()
                    .map(move |(t, entry)| (db.clone(), t.clone(), entry.clone()))
            })
            .collect();
        entries.sort_by(|a, b| (&a.0, &a.1).cmp(&(&b.0, &b.1)));
        entries
    }
}
