//! Binlog streaming pipeline
//!
//! One decode thread tails the binlog and turns row events for tracked
//! tables into [`vecsync_core::UpdateItem`]s; a pool of workers applies them
//! to the vector indexes. The [`StreamController`] ties the pieces together
//! and owns checkpointing.

mod build;
mod catalog;
mod controller;
mod error;
mod queue;
mod source;
mod stats;
mod worker;

pub use build::{BuildReport, BuildSpec};
pub use catalog::{
    escape_literal, quote_identifier, read_catalog, resolve_ordinals, CatalogColumn,
    ColumnOrdinals,
};
pub use controller::{StreamController, StreamPhase, FIRST_BINLOG_POS};
pub use error::StreamError;
pub use queue::UpdateQueue;
pub use source::{BinlogConnection, BinlogConnector, MySqlConnector};
pub use stats::{PipelineStats, PipelineStatsSnapshot};
pub use worker::{ApplyOutcome, OrderedSink, WorkerPool};
