//! Shared test utilities for vecsync integration tests.
//!
//! Import via `mod common;` in integration test files:
//! ```rust,ignore
//! mod common;
//! use common::*;
//! ```

use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tempfile::TempDir;
use vecsync::pipeline::{BinlogConnection, BinlogConnector, StreamController};
use vecsync::vecsync_binlog::event::column_type::{BLOB, LONG, VARCHAR};
use vecsync::vecsync_binlog::{RawRow, WireError, STMT_END_F};
use vecsync::vecsync_core::{SaveMode, StreamConfig};
use vecsync::{
    BinlogCoordinates, Checkpoint, CheckpointStore, IndexCollection, IndexOpener, TrackedTable,
    VectorIndex,
};

#[allow(dead_code)]
pub const UUID_A: &str = "3e11fa47-71ca-11e1-9e33-c80aa9429562";
#[allow(dead_code)]
pub const UUID_B: &str = "8a94f357-aab4-11df-86ab-c80aa9429562";
#[allow(dead_code)]
pub const CHECKPOINT_FILE: &str = "binlog_state.json";
#[allow(dead_code)]
pub const PRODUCTS_TABLE_ID: u64 = 77;
#[allow(dead_code)]
pub const ORDERS_TABLE_ID: u64 = 78;

// ============================================================================
// Binlog event builders
// ============================================================================

const TABLE_MAP: u8 = 19;
const ROTATE: u8 = 4;
const FORMAT_DESCRIPTION: u8 = 15;
const WRITE_ROWS_V2: u8 = 30;
const UPDATE_ROWS_V2: u8 = 31;

/// Event with a valid 19-byte header and CRC32 trailer.
#[allow(dead_code)]
pub fn event(type_code: u8, log_pos: u32, body: &[u8]) -> Vec<u8> {
    let mut buf = header(type_code, log_pos, body.len() + 4);
    buf.extend_from_slice(body);
    let crc = crc32fast::hash(&buf);
    buf.extend_from_slice(&crc.to_le_bytes());
    buf
}

fn header(type_code: u8, log_pos: u32, body_len: usize) -> Vec<u8> {
    let mut buf = Vec::with_capacity(19 + body_len);
    buf.extend_from_slice(&1_700_000_000u32.to_le_bytes());
    buf.push(type_code);
    buf.extend_from_slice(&1u32.to_le_bytes());
    buf.extend_from_slice(&((19 + body_len) as u32).to_le_bytes());
    buf.extend_from_slice(&log_pos.to_le_bytes());
    buf.extend_from_slice(&0u16.to_le_bytes());
    buf
}

/// Rotate event; `checksum == false` builds the artificial form without trailer.
#[allow(dead_code)]
pub fn rotate(file: &str, position: u64, log_pos: u32, checksum: bool) -> Vec<u8> {
    let mut body = position.to_le_bytes().to_vec();
    body.extend_from_slice(file.as_bytes());
    if checksum {
        event(ROTATE, log_pos, &body)
    } else {
        let mut buf = header(ROTATE, log_pos, body.len());
        buf.extend_from_slice(&body);
        buf
    }
}

/// Format description from an 8.0 server announcing CRC32 checksums.
#[allow(dead_code)]
pub fn format_description(log_pos: u32) -> Vec<u8> {
    format_description_with_alg(log_pos, 1)
}

/// Format description announcing checksum algorithm `alg` (0 = NONE).
///
/// The event carries its own CRC32 either way.
#[allow(dead_code)]
pub fn format_description_with_alg(log_pos: u32, alg: u8) -> Vec<u8> {
    let mut body = 4u16.to_le_bytes().to_vec();
    let mut version = b"8.0.36".to_vec();
    version.resize(50, 0);
    body.extend_from_slice(&version);
    body.extend_from_slice(&1_700_000_000u32.to_le_bytes());
    body.push(19);
    body.extend_from_slice(&[56, 13, 0, 8, 0, 18, 0, 4, 4, 4, 4]);
    body.push(alg);
    event(FORMAT_DESCRIPTION, log_pos, &body)
}

/// The same event as written by a server with `binlog_checksum=NONE`.
#[allow(dead_code)]
pub fn without_checksum(mut event: Vec<u8>) -> Vec<u8> {
    event.truncate(event.len() - 4);
    let size = event.len() as u32;
    event[9..13].copy_from_slice(&size.to_le_bytes());
    event
}

/// Table map for `(id INT, title VARCHAR(64), embedding BLOB)`.
#[allow(dead_code)]
pub fn table_map(table_id: u64, db: &str, table: &str, log_pos: u32) -> Vec<u8> {
    let mut body = table_id.to_le_bytes()[..6].to_vec();
    body.extend_from_slice(&1u16.to_le_bytes());
    body.push(db.len() as u8);
    body.extend_from_slice(db.as_bytes());
    body.push(0);
    body.push(table.len() as u8);
    body.extend_from_slice(table.as_bytes());
    body.push(0);
    body.push(3);
    body.extend_from_slice(&[LONG, VARCHAR, BLOB]);
    body.push(3);
    body.extend_from_slice(&[64, 0, 2]);
    body.push(0b110);
    event(TABLE_MAP, log_pos, &body)
}

/// Table map cut off right after the table name.
#[allow(dead_code)]
pub fn truncated_table_map(table_id: u64, db: &str, table: &str, log_pos: u32) -> Vec<u8> {
    let mut body = table_id.to_le_bytes()[..6].to_vec();
    body.extend_from_slice(&1u16.to_le_bytes());
    body.push(db.len() as u8);
    body.extend_from_slice(db.as_bytes());
    body.push(0);
    body.push(table.len() as u8);
    body.extend_from_slice(table.as_bytes());
    event(TABLE_MAP, log_pos, &body)
}

fn row_image(id: u32, vector: &[u8]) -> Vec<u8> {
    let mut image = vec![0x00];
    image.extend_from_slice(&id.to_le_bytes());
    image.push(1);
    image.push(b't');
    image.extend_from_slice(&(vector.len() as u16).to_le_bytes());
    image.extend_from_slice(vector);
    image
}

fn rows_body(table_id: u64, flags: u16, bitmaps: usize, images: &[u8]) -> Vec<u8> {
    let mut body = table_id.to_le_bytes()[..6].to_vec();
    body.extend_from_slice(&flags.to_le_bytes());
    body.extend_from_slice(&2u16.to_le_bytes());
    body.push(3);
    for _ in 0..bitmaps {
        body.push(0b111);
    }
    body.extend_from_slice(images);
    body
}

/// WRITE_ROWS v2 event inserting `(id, vector)` rows; ends its statement.
#[allow(dead_code)]
pub fn write_rows(table_id: u64, log_pos: u32, rows: &[(u32, &[u8])]) -> Vec<u8> {
    write_rows_with_flags(table_id, log_pos, STMT_END_F, rows)
}

/// WRITE_ROWS v2 event followed by more rows events of the same statement.
#[allow(dead_code)]
pub fn write_rows_continued(table_id: u64, log_pos: u32, rows: &[(u32, &[u8])]) -> Vec<u8> {
    write_rows_with_flags(table_id, log_pos, 0, rows)
}

fn write_rows_with_flags(table_id: u64, log_pos: u32, flags: u16, rows: &[(u32, &[u8])]) -> Vec<u8> {
    let images: Vec<u8> = rows.iter().flat_map(|(id, v)| row_image(*id, v)).collect();
    event(WRITE_ROWS_V2, log_pos, &rows_body(table_id, flags, 1, &images))
}

/// UPDATE_ROWS v2 event; each row is `(id, before, after)`.
#[allow(dead_code)]
pub fn update_rows(table_id: u64, log_pos: u32, rows: &[(u32, &[u8], &[u8])]) -> Vec<u8> {
    let images: Vec<u8> = rows
        .iter()
        .flat_map(|(id, before, after)| {
            let mut both = row_image(*id, before);
            both.extend(row_image(*id, after));
            both
        })
        .collect();
    event(UPDATE_ROWS_V2, log_pos, &rows_body(table_id, STMT_END_F, 2, &images))
}

/// Result row of text values.
#[allow(dead_code)]
pub fn row(fields: &[&str]) -> RawRow {
    fields.iter().map(|f| Some(f.as_bytes().to_vec())).collect()
}

/// Four-component float vector.
#[allow(dead_code)]
pub fn vector(seed: f32) -> Vec<u8> {
    [seed, seed + 1.0, seed + 2.0, seed + 3.0]
        .iter()
        .flat_map(|f| f.to_le_bytes())
        .collect()
}

// ============================================================================
// Scripted binlog source
// ============================================================================

/// One scripted step of the stream.
#[allow(dead_code)]
pub enum Step {
    /// Deliver an event
    Event(Vec<u8>),
    /// Fail the current fetch as if the connection dropped
    Disconnect,
    /// Drop the connection and come back as a different server
    Failover(String),
}

/// Server behaviour shared by every connection the connector hands out.
pub struct Script {
    pub server_uuid: String,
    pub earliest_log: Option<String>,
    pub steps: VecDeque<Step>,
    /// Connection attempts that fail before one succeeds
    pub failing_connects: u32,
    pub connect_attempts: u32,
    pub dumps: Vec<(String, u64)>,
    pub queries: Vec<String>,
    /// Canned query results keyed by SQL prefix
    pub answers: Vec<(String, Vec<RawRow>)>,
    /// Send an artificial rotate without trailer at the start of each dump
    pub fake_rotate: bool,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            server_uuid: UUID_A.to_string(),
            earliest_log: Some("binlog.000001".to_string()),
            steps: VecDeque::new(),
            failing_connects: 0,
            connect_attempts: 0,
            dumps: Vec::new(),
            queries: Vec::new(),
            answers: Vec::new(),
            fake_rotate: true,
        }
    }
}

/// Connector over a shared [`Script`].
#[derive(Clone, Default)]
pub struct ScriptedConnector {
    pub script: Arc<Mutex<Script>>,
}

#[allow(dead_code)]
impl ScriptedConnector {
    pub fn push(&self, event: Vec<u8>) {
        self.script.lock().steps.push_back(Step::Event(event));
    }

    pub fn push_disconnect(&self) {
        self.script.lock().steps.push_back(Step::Disconnect);
    }

    pub fn push_failover(&self, server_uuid: &str) {
        self.script
            .lock()
            .steps
            .push_back(Step::Failover(server_uuid.to_string()));
    }

    pub fn remaining_steps(&self) -> usize {
        self.script.lock().steps.len()
    }

    pub fn dumps(&self) -> Vec<(String, u64)> {
        self.script.lock().dumps.clone()
    }

    pub fn connect_attempts(&self) -> u32 {
        self.script.lock().connect_attempts
    }
}

impl BinlogConnector for ScriptedConnector {
    fn connect(&self) -> Result<Box<dyn BinlogConnection>, WireError> {
        let mut script = self.script.lock();
        script.connect_attempts += 1;
        if script.failing_connects > 0 {
            script.failing_connects -= 1;
            return Err(WireError::Io(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "connection refused",
            )));
        }
        Ok(Box::new(ScriptedConnection {
            script: self.script.clone(),
            pending: VecDeque::new(),
            dumping: false,
        }))
    }
}

struct ScriptedConnection {
    script: Arc<Mutex<Script>>,
    /// Events generated by this connection (the artificial rotate)
    pending: VecDeque<Vec<u8>>,
    dumping: bool,
}

impl BinlogConnection for ScriptedConnection {
    fn server_uuid(&mut self) -> Result<String, WireError> {
        Ok(self.script.lock().server_uuid.clone())
    }

    fn earliest_log_file(&mut self) -> Result<Option<String>, WireError> {
        Ok(self.script.lock().earliest_log.clone())
    }

    fn query_raw(&mut self, sql: &str) -> Result<Vec<RawRow>, WireError> {
        let mut script = self.script.lock();
        script.queries.push(sql.to_string());
        Ok(script
            .answers
            .iter()
            .find(|(prefix, _)| sql.starts_with(prefix.as_str()))
            .map(|(_, rows)| rows.clone())
            .unwrap_or_default())
    }

    fn start_dump(&mut self, file: &str, pos: u64) -> Result<(), WireError> {
        let mut script = self.script.lock();
        script.dumps.push((file.to_string(), pos));
        if script.fake_rotate {
            self.pending.push_back(rotate(file, pos, 0, false));
        }
        self.dumping = true;
        Ok(())
    }

    fn fetch_event(&mut self) -> Result<Vec<u8>, WireError> {
        if !self.dumping {
            return Err(WireError::Protocol("fetch before dump".to_string()));
        }
        if let Some(event) = self.pending.pop_front() {
            return Ok(event);
        }
        let step = self.script.lock().steps.pop_front();
        match step {
            Some(Step::Event(event)) => Ok(event),
            Some(Step::Disconnect) => Err(connection_reset()),
            Some(Step::Failover(uuid)) => {
                self.script.lock().server_uuid = uuid;
                Err(connection_reset())
            }
            None => {
                thread::sleep(Duration::from_millis(5));
                Err(WireError::Timeout)
            }
        }
    }
}

fn connection_reset() -> WireError {
    WireError::Io(io::Error::new(
        io::ErrorKind::ConnectionReset,
        "connection reset by peer",
    ))
}

// ============================================================================
// Counting vector index
// ============================================================================

/// What an index looked like when it was saved.
#[derive(Debug, Clone)]
pub struct SaveRecord {
    pub mode: SaveMode,
    pub applied: u64,
    pub coords: Option<BinlogCoordinates>,
}

/// Index double counting inserts, optionally slow.
pub struct CountingIndex {
    name: String,
    vectors: Mutex<HashMap<u64, Vec<u8>>>,
    applied: AtomicU64,
    update_ts: AtomicU64,
    delay: Duration,
    incremental: bool,
    coords: Mutex<Option<BinlogCoordinates>>,
    saves: Mutex<Vec<SaveRecord>>,
}

#[allow(dead_code)]
impl CountingIndex {
    pub fn new(name: &str) -> Self {
        Self::with_delay(name, Duration::ZERO)
    }

    pub fn with_delay(name: &str, delay: Duration) -> Self {
        Self {
            name: name.to_string(),
            vectors: Mutex::new(HashMap::new()),
            applied: AtomicU64::new(0),
            update_ts: AtomicU64::new(0),
            delay,
            incremental: true,
            coords: Mutex::new(None),
            saves: Mutex::new(Vec::new()),
        }
    }

    pub fn without_incremental_updates(mut self) -> Self {
        self.incremental = false;
        self
    }

    pub fn applied(&self) -> u64 {
        self.applied.load(Ordering::SeqCst)
    }

    pub fn get(&self, row_id: u64) -> Option<Vec<u8>> {
        self.vectors.lock().get(&row_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.vectors.lock().len()
    }

    pub fn saves(&self) -> Vec<SaveRecord> {
        self.saves.lock().clone()
    }
}

impl VectorIndex for CountingIndex {
    fn name(&self) -> &str {
        &self.name
    }

    fn insert_vector(&self, vector: &[u8], _flags: u32, row_id: u64) -> vecsync::Result<()> {
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        self.vectors.lock().insert(row_id, vector.to_vec());
        self.applied.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn save_index(&self, _dir: &std::path::Path, mode: SaveMode) -> vecsync::Result<()> {
        self.saves.lock().push(SaveRecord {
            mode,
            applied: self.applied(),
            coords: self.coords.lock().clone(),
        });
        Ok(())
    }

    fn update_ts(&self) -> u64 {
        self.update_ts.load(Ordering::SeqCst)
    }

    fn set_update_ts(&self, ts: u64) {
        self.update_ts.store(ts, Ordering::SeqCst);
    }

    fn set_last_update_coordinates(&self, file: &str, pos: u64) {
        *self.coords.lock() = Some(BinlogCoordinates::new(file, pos));
    }

    fn last_update_coordinates(&self) -> Option<BinlogCoordinates> {
        self.coords.lock().clone()
    }

    fn supports_incr_updates(&self) -> bool {
        self.incremental
    }
}

// ============================================================================
// Pipeline harness
// ============================================================================

/// Stream settings with fast retries for tests.
#[allow(dead_code)]
pub fn test_stream_config() -> StreamConfig {
    StreamConfig {
        worker_threads: 3,
        connect_retry_interval_ms: 10,
        max_connect_attempts: 5,
        verify_checksum: true,
        ..StreamConfig::default()
    }
}

/// A controller wired to a scripted source, tracking `shop.products.embedding`.
pub struct Harness {
    pub controller: StreamController,
    pub connector: ScriptedConnector,
    pub indexes: Arc<IndexCollection>,
    pub index: Arc<CountingIndex>,
    /// Declared last so the controller stops before the directory goes away
    pub dir: TempDir,
}

#[allow(dead_code)]
impl Harness {
    pub fn new() -> Self {
        Self::build(test_stream_config(), CountingIndex::new("shop.products.embedding"))
    }

    pub fn build(config: StreamConfig, index: CountingIndex) -> Self {
        Self::build_with_opener(config, index, None)
    }

    pub fn build_with_opener(
        config: StreamConfig,
        index: CountingIndex,
        opener: Option<Arc<dyn IndexOpener>>,
    ) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let connector = ScriptedConnector::default();
        let indexes = Arc::new(IndexCollection::new(dir.path()));
        let index = Arc::new(index);
        indexes.register("shop", "products", "embedding", index.clone());

        let controller = StreamController::new(
            config,
            Arc::new(connector.clone()),
            CheckpointStore::new(dir.path(), CHECKPOINT_FILE),
            indexes.clone(),
            opener,
        );
        controller
            .register_tracked_table("shop", "products", TrackedTable::new("embedding", 1, 3))
            .expect("track products");

        Self {
            controller,
            connector,
            indexes,
            index,
            dir,
        }
    }

    pub fn checkpoints(&self) -> CheckpointStore {
        CheckpointStore::new(self.dir.path(), CHECKPOINT_FILE)
    }

    pub fn seed_checkpoint(&self, uuid: &str, file: &str, pos: u64) {
        self.checkpoints()
            .save(&Checkpoint::new(uuid, &BinlogCoordinates::new(file, pos)))
            .expect("seed checkpoint");
    }

    pub fn saved_checkpoint(&self) -> Option<Checkpoint> {
        self.checkpoints().load()
    }

    /// Wait until every scripted step has been fetched.
    pub fn wait_for_script(&self) -> bool {
        wait_for(Duration::from_secs(5), || self.connector.remaining_steps() == 0)
    }
}

/// Poll `condition` until it holds or `timeout` passes.
#[allow(dead_code)]
pub fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}
