//! # vecsync
//!
//! Keeps vector indexes built over MySQL columns in sync with ongoing row
//! changes by tailing the server's binary log.
//!
//! ## Crate Organization
//!
//! | Crate | Description |
//! |-------|-------------|
//! | [`vecsync_core`] | Configuration, options parsing, checkpoints, vector index plumbing |
//! | [`vecsync_binlog`] | Binlog event decoding and the MySQL replication client |
//! | `vecsync` | Update queue, worker pool and the stream controller |
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use vecsync::pipeline::{MySqlConnector, StreamController};
//! use vecsync::{CheckpointStore, Config, FlatIndexOpener, IndexCollection};
//!
//! let config = Config::from_file("vecsync.toml".as_ref())?;
//! let indexes = Arc::new(IndexCollection::new(&config.checkpoint.dir));
//! let controller = StreamController::new(
//!     config.stream.clone(),
//!     Arc::new(MySqlConnector::from_config(&config.mysql)),
//!     CheckpointStore::new(&config.checkpoint.dir, &config.checkpoint.file_name),
//!     indexes,
//!     Some(Arc::new(FlatIndexOpener::new(&config.checkpoint.dir))),
//! );
//! controller.start()?;
//! // ... serve queries ...
//! controller.stop();
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod pipeline;

pub use vecsync_binlog;
pub use vecsync_core;

pub use pipeline::{StreamController, StreamError, StreamPhase};
pub use vecsync_core::{
    BinlogCoordinates, Checkpoint, CheckpointStore, Config, FlatIndexOpener, IndexCollection,
    IndexOpener, Result, TableUpdateSink, TrackedTable, UpdateItem, VecsyncError, VectorIndex,
};
