//! # vecsync-core
//!
//! Shared building blocks for the vecsync binlog pipeline: configuration,
//! the options-string parser, checkpoint persistence, the vector index
//! interface and the tracked-table registry.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod checkpoint;
pub mod config;
pub mod error;
pub mod index;
pub mod options;
pub mod registry;
pub mod update;

pub use checkpoint::{BinlogCoordinates, Checkpoint, CheckpointError, CheckpointStore};
pub use config::{Config, StreamConfig};
pub use error::{Result, VecsyncError};
pub use index::{
    FlatIndexOpener, FlatVectorIndex, IndexCollection, IndexOpener, SaveMode, VectorIndex,
};
pub use options::Options;
pub use registry::{table_key, TrackedTable, TrackedTables};
pub use update::{index_key, TableUpdateSink, UpdateItem};
