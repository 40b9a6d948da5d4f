//! Binlog stream controller
//!
//! Owns the whole pipeline: connection lifecycle, the decode thread, the
//! worker pool, rotation handling and checkpoint persistence.
//!
//! ```text
//! Disconnected -> Connecting -> IdentityVerifying -> Streaming -> Draining -> Stopped
//!                     ^                                  |
//!                     +------------ fetch error ---------+
//! ```
//!
//! The current binlog coordinates, the last rotation-boundary checkpoint and
//! the tracked tables live behind one mutex. It is held only for short
//! critical sections, never across a fetch or a queue wait.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, trace, warn};
use vecsync_binlog::{
    decode_format_description, decode_rotate, decode_rows, decode_rows_header, decode_table_map,
    has_valid_checksum, strip_trailer, verify_checksum, ChecksumAlg, DecodeError, EventHeader,
    EventType, RowsKind, TableMap,
};
use vecsync_core::{
    index_key, BinlogCoordinates, Checkpoint, CheckpointStore, IndexCollection, IndexOpener,
    SaveMode, StreamConfig, TrackedTable, TrackedTables, UpdateItem, VecsyncError, VectorIndex,
};

use super::build::{self, BuildAction, BuildReport, BuildSpec};
use super::catalog::{read_catalog, resolve_ordinals};
use super::error::StreamError;
use super::queue::UpdateQueue;
use super::source::{BinlogConnection, BinlogConnector};
use super::stats::{PipelineStats, PipelineStatsSnapshot};
use super::worker::{OrderedSink, WorkerPool};

/// First event offset in every binlog file
pub const FIRST_BINLOG_POS: u64 = 4;

/// Granularity of interruptible sleeps
const SLEEP_SLICE: Duration = Duration::from_millis(50);

/// Lifecycle phase of a [`StreamController`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamPhase {
    /// Not started, or the connection was lost
    Disconnected,
    /// Opening a connection, with bounded retry
    Connecting,
    /// Checking the server uuid against the saved checkpoint
    IdentityVerifying,
    /// Fetching and decoding events
    Streaming,
    /// Stopping: workers finishing, final checkpoint being written
    Draining,
    /// Terminal until the next `start`
    Stopped,
}

impl StreamPhase {
    /// Lowercase name for logs
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamPhase::Disconnected => "disconnected",
            StreamPhase::Connecting => "connecting",
            StreamPhase::IdentityVerifying => "identity_verifying",
            StreamPhase::Streaming => "streaming",
            StreamPhase::Draining => "draining",
            StreamPhase::Stopped => "stopped",
        }
    }
}

impl fmt::Display for StreamPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State guarded by the controller mutex.
#[derive(Debug, Default)]
struct StreamState {
    /// Position of the next event to be read
    current: BinlogCoordinates,
    /// Last rotation boundary; what the checkpoint file records
    stable: Option<BinlogCoordinates>,
    tracked: TrackedTables,
}

/// Decode state tied to one connection.
#[derive(Default)]
struct Session {
    /// Trailer format announced by the last format description
    checksum: ChecksumAlg,
    /// Table maps of the current statement, by table id
    table_maps: HashMap<u64, TableMap>,
}

/// Everything the decode thread owns while streaming.
struct Running {
    conn: Box<dyn BinlogConnection>,
    queue: Arc<UpdateQueue>,
    sink: Arc<OrderedSink>,
    workers: WorkerPool,
}

struct Shared {
    config: StreamConfig,
    connector: Arc<dyn BinlogConnector>,
    checkpoints: CheckpointStore,
    indexes: Arc<IndexCollection>,
    opener: Option<Arc<dyn IndexOpener>>,
    state: Mutex<StreamState>,
    phase: RwLock<StreamPhase>,
    shutdown: AtomicBool,
    queue: Mutex<Arc<UpdateQueue>>,
    stats: Arc<PipelineStats>,
    server_uuid: Mutex<String>,
}

/// Drives the binlog pipeline for one source server.
///
/// `start` and `stop` are idempotent and may be called from any thread.
pub struct StreamController {
    shared: Arc<Shared>,
    decode_thread: Mutex<Option<JoinHandle<()>>>,
}

impl StreamController {
    /// Create a stopped controller.
    ///
    /// When `opener` is set, `start` reads the vector column catalog and
    /// opens and tracks every online column before streaming.
    pub fn new(
        config: StreamConfig,
        connector: Arc<dyn BinlogConnector>,
        checkpoints: CheckpointStore,
        indexes: Arc<IndexCollection>,
        opener: Option<Arc<dyn IndexOpener>>,
    ) -> Self {
        let queue = Arc::new(UpdateQueue::new(config.queue_capacity));
        Self {
            shared: Arc::new(Shared {
                config,
                connector,
                checkpoints,
                indexes,
                opener,
                state: Mutex::new(StreamState::default()),
                phase: RwLock::new(StreamPhase::Disconnected),
                shutdown: AtomicBool::new(false),
                queue: Mutex::new(queue),
                stats: Arc::new(PipelineStats::new()),
                server_uuid: Mutex::new(String::new()),
            }),
            decode_thread: Mutex::new(None),
        }
    }

    /// Connect, verify the server identity and start streaming.
    ///
    /// Blocks until streaming has begun or startup failed. A no-op when the
    /// pipeline is already running.
    pub fn start(&self) -> Result<(), StreamError> {
        let mut slot = self.decode_thread.lock();
        if let Some(handle) = slot.as_ref() {
            if !handle.is_finished() {
                debug!("binlog stream already running");
                return Ok(());
            }
        }
        if let Some(handle) = slot.take() {
            if handle.join().is_err() {
                warn!("previous binlog decode thread had panicked");
            }
        }

        self.shared.shutdown.store(false, Ordering::SeqCst);
        match self.shared.clone().launch() {
            Ok(handle) => {
                *slot = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.shared.set_phase(StreamPhase::Stopped);
                error!(error = %e, "binlog stream failed to start");
                Err(e)
            }
        }
    }

    /// Stop streaming, drain the workers and write the final checkpoint.
    ///
    /// Returns once every pipeline thread has exited. A no-op when nothing
    /// is running.
    pub fn stop(&self) {
        self.shared.request_shutdown();
        let mut slot = self.decode_thread.lock();
        // A concurrent start may have cleared the flag before we got the lock.
        self.shared.request_shutdown();
        if let Some(handle) = slot.take() {
            if handle.join().is_err() {
                error!("binlog decode thread panicked");
                self.shared.set_phase(StreamPhase::Stopped);
            }
        }
    }

    /// Whether the decode thread is alive
    pub fn is_running(&self) -> bool {
        self.decode_thread
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Current lifecycle phase
    pub fn phase(&self) -> StreamPhase {
        *self.shared.phase.read()
    }

    /// Counters snapshot
    pub fn stats(&self) -> PipelineStatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Position of the next event to be read
    pub fn current_coordinates(&self) -> BinlogCoordinates {
        self.shared.state.lock().current.clone()
    }

    /// Last rotation boundary, as written to the checkpoint file
    pub fn stable_coordinates(&self) -> Option<BinlogCoordinates> {
        self.shared.state.lock().stable.clone()
    }

    /// Server uuid verified at the last connect, empty before the first
    pub fn server_uuid(&self) -> String {
        self.shared.server_uuid.lock().clone()
    }

    /// Tracked tables as `(database, table, entry)`
    pub fn tracked_tables(&self) -> Vec<(String, String, TrackedTable)> {
        self.shared.state.lock().tracked.snapshot()
    }

    /// Updates waiting in the queue
    pub fn queue_len(&self) -> usize {
        self.shared.queue.lock().len()
    }

    /// Start maintaining `database.table` from the binlog.
    ///
    /// The index for the entry's vector column must already be registered.
    /// Returns `Ok(false)` when that index does not support incremental
    /// updates.
    pub fn register_tracked_table(
        &self,
        database: &str,
        table: &str,
        entry: TrackedTable,
    ) -> vecsync_core::Result<bool> {
        let index = self
            .shared
            .indexes
            .get(database, table, &entry.vector_column)
            .ok_or_else(|| {
                VecsyncError::IndexNotFound(index_key(database, table, &entry.vector_column))
            })?;
        if !index.supports_incr_updates() {
            return Ok(false);
        }
        self.shared.state.lock().tracked.insert(database, table, entry)?;
        info!(db = %database, table = %table, "tracking table");
        Ok(true)
    }

    /// Hand over an index that just finished its bulk build.
    ///
    /// Under the controller mutex the index is stamped with the live binlog
    /// coordinates, saved in build mode and registered; when it supports
    /// incremental updates its table is tracked. Rows decoded afterwards are
    /// therefore either in the build or in the stream, never in neither.
    pub fn complete_bulk_build(
        &self,
        database: &str,
        table: &str,
        entry: TrackedTable,
        index: Arc<dyn VectorIndex>,
    ) -> vecsync_core::Result<bool> {
        let mut state = self.shared.state.lock();
        if state.current.is_known() {
            index.set_last_update_coordinates(&state.current.file, state.current.pos);
        }
        index.save_index(self.shared.indexes.index_dir(), SaveMode::Build)?;
        self.shared
            .indexes
            .register(database, table, &entry.vector_column, index.clone());

        if !index.supports_incr_updates() {
            return Ok(false);
        }
        state.tracked.insert(database, table, entry)?;
        info!(db = %database, table = %table, coords = %state.current, "bulk build handed over to binlog");
        Ok(true)
    }

    /// Fill `index` with the rows of `spec.column`'s table over SQL, then hand
    /// it over with [`StreamController::complete_bulk_build`].
    ///
    /// Runs on its own connection with the table read-locked until the
    /// handover is done. With a tracking column only rows changed since the
    /// index's update timestamp are read.
    pub fn build_index(
        &self,
        spec: &BuildSpec,
        index: Arc<dyn VectorIndex>,
    ) -> Result<BuildReport, StreamError> {
        self.bulk_load(spec, index, BuildAction::Build)
    }

    /// Load rows of an already registered index whose tracking column moved
    /// past the index's update timestamp.
    pub fn refresh_index(&self, spec: &BuildSpec) -> Result<BuildReport, StreamError> {
        let column = &spec.column;
        let index = self
            .shared
            .indexes
            .get(&column.database, &column.table, &column.column)
            .ok_or_else(|| VecsyncError::IndexNotFound(spec.index_key()))?;
        if spec.tracking_column.is_none() {
            return Err(StreamError::BulkLoad {
                index: spec.index_key(),
                reason: "refresh needs a tracking column".to_string(),
            });
        }
        self.bulk_load(spec, index, BuildAction::Refresh)
    }

    fn bulk_load(
        &self,
        spec: &BuildSpec,
        index: Arc<dyn VectorIndex>,
        action: BuildAction,
    ) -> Result<BuildReport, StreamError> {
        let started = Instant::now();
        let mut conn = self.shared.connector.connect()?;
        build::lock_table(conn.as_mut(), spec)?;

        let column = &spec.column;
        let loaded = build::load_rows(conn.as_mut(), spec, index.as_ref(), action)
            .and_then(|loaded| {
                let entry = TrackedTable::new(
                    column.column.clone(),
                    loaded.ordinals.id,
                    loaded.ordinals.vector,
                );
                let tracked =
                    self.complete_bulk_build(&column.database, &column.table, entry, index.clone())?;
                Ok(BuildReport {
                    rows: loaded.rows,
                    skipped: loaded.skipped,
                    coords: index.last_update_coordinates(),
                    tracked,
                })
            });

        let unlocked = build::unlock_tables(conn.as_mut());
        let report = match (loaded, unlocked) {
            (Ok(report), Ok(())) => report,
            (Ok(_), Err(e)) => return Err(e),
            (Err(e), unlocked) => {
                if let Err(unlock_err) = unlocked {
                    warn!(index = %spec.index_key(), error = %unlock_err, "failed to unlock table after bulk load");
                }
                return Err(e);
            }
        };
        info!(
            index = %spec.index_key(),
            ?action,
            rows = report.rows,
            skipped = report.skipped,
            tracked = report.tracked,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "bulk load complete"
        );
        Ok(report)
    }
}

impl Drop for StreamController {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Shared {
    fn set_phase(&self, phase: StreamPhase) {
        let mut current = self.phase.write();
        if *current != phase {
            debug!(from = %*current, to = %phase, "stream phase change");
            *current = phase;
        }
    }

    fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.queue.lock().shutdown();
    }

    /// Startup sequence up to spawning the decode thread.
    fn launch(self: Arc<Self>) -> Result<JoinHandle<()>, StreamError> {
        self.set_phase(StreamPhase::Connecting);
        let mut conn = self.connect_with_retry()?;

        self.set_phase(StreamPhase::IdentityVerifying);
        let live = conn.server_uuid()?;
        let start = match self.checkpoints.load() {
            Some(saved) if saved.server_uuid != live => {
                return Err(StreamError::IdentityMismatch {
                    persisted: saved.server_uuid,
                    live,
                });
            }
            Some(saved) => {
                info!(server_uuid = %live, binlog_file = %saved.binlog_file, pos = saved.binlog_pos, "resuming from checkpoint");
                saved.coordinates()
            }
            None => {
                let file = conn.earliest_log_file()?.unwrap_or_default();
                info!(server_uuid = %live, binlog_file = %file, "no checkpoint; starting from the earliest binlog");
                BinlogCoordinates::new(file, FIRST_BINLOG_POS)
            }
        };
        *self.server_uuid.lock() = live;

        if let Some(opener) = &self.opener {
            self.load_catalog(conn.as_mut(), opener.as_ref());
        }
        if self.is_shutting_down() {
            return Err(StreamError::Cancelled);
        }

        {
            let mut state = self.state.lock();
            state.current = start.clone();
            state.stable = start.is_known().then(|| start.clone());
        }
        conn.start_dump(&start.file, start.pos)?;

        let queue = Arc::new(UpdateQueue::new(self.config.queue_capacity));
        *self.queue.lock() = queue.clone();
        let sink = Arc::new(OrderedSink::new(self.indexes.clone()));
        let workers = WorkerPool::spawn(
            self.config.worker_threads.max(1),
            queue.clone(),
            sink.clone(),
            self.stats.clone(),
        )
        .map_err(|e| StreamError::Fatal(format!("failed to spawn workers: {e}")))?;

        self.set_phase(StreamPhase::Streaming);
        info!(coords = %start, workers = workers.len(), "binlog streaming started");

        let running = Running {
            conn,
            queue: queue.clone(),
            sink,
            workers,
        };
        let shared = self.clone();
        thread::Builder::new()
            .name("vecsync-binlog".to_string())
            .spawn(move || shared.run(running))
            .map_err(|e| {
                queue.shutdown();
                StreamError::Fatal(format!("failed to spawn decode thread: {e}"))
            })
    }

    fn connect_with_retry(&self) -> Result<Box<dyn BinlogConnection>, StreamError> {
        let max_attempts = self.config.max_connect_attempts.max(1);
        let mut attempt = 0;
        loop {
            if self.is_shutting_down() {
                return Err(StreamError::Cancelled);
            }
            attempt += 1;
            match self.connector.connect() {
                Ok(conn) => {
                    if attempt > 1 {
                        info!(attempt, "connected to binlog source");
                    }
                    return Ok(conn);
                }
                Err(e) if attempt >= max_attempts => {
                    return Err(StreamError::ConnectRetriesExhausted {
                        attempts: attempt,
                        last_error: e.to_string(),
                    });
                }
                Err(e) => {
                    warn!(attempt, max_attempts, error = %e, "binlog source connection failed; retrying");
                    self.sleep_unless_shutdown(self.config.connect_retry_interval());
                }
            }
        }
    }

    fn sleep_unless_shutdown(&self, total: Duration) {
        let deadline = Instant::now() + total;
        while !self.is_shutting_down() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep((deadline - now).min(SLEEP_SLICE));
        }
    }

    /// Open and track every online catalogued column. Failures are logged
    /// per column and never abort startup.
    fn load_catalog(&self, conn: &mut dyn BinlogConnection, opener: &dyn IndexOpener) {
        let columns = match read_catalog(
            conn,
            &self.config.catalog_schema,
            &self.config.catalog_table,
        ) {
            Ok(columns) => columns,
            Err(e) => {
                warn!(error = %e, "failed to read vector column catalog");
                return;
            }
        };

        for column in columns {
            let key = index_key(&column.database, &column.table, &column.column);
            let ordinals = match resolve_ordinals(conn, &column) {
                Ok(Some(ordinals)) => ordinals,
                Ok(None) => {
                    warn!(index = %key, idcol = %column.id_column, "id or vector column not found");
                    continue;
                }
                Err(e) => {
                    warn!(index = %key, error = %e, "failed to resolve column ordinals");
                    continue;
                }
            };
            let index = match opener.open(&column.database, &column.table, &column.column, &column.options) {
                Ok(index) => index,
                Err(e) => {
                    warn!(index = %key, error = %e, "failed to open vector index");
                    continue;
                }
            };

            let incremental = index.supports_incr_updates();
            self.indexes
                .register(&column.database, &column.table, &column.column, index);
            if !incremental {
                info!(index = %key, "index does not support incremental updates");
                continue;
            }
            let entry = TrackedTable::new(column.column.clone(), ordinals.id, ordinals.vector);
            match self
                .state
                .lock()
                .tracked
                .insert(&column.database, &column.table, entry)
            {
                Ok(()) => info!(index = %key, id_ordinal = ordinals.id, vector_ordinal = ordinals.vector, "tracking vector column"),
                Err(e) => warn!(index = %key, error = %e, "cannot track vector column"),
            }
        }
    }

    /// Decode thread body.
    fn run(self: Arc<Self>, running: Running) {
        let Running {
            mut conn,
            queue,
            sink,
            workers,
        } = running;
        let mut session = Session::default();

        while !self.is_shutting_down() {
            match conn.fetch_event() {
                Ok(event) => self.handle_event(&event, &mut session, &queue, &sink),
                Err(e) if e.is_timeout() => continue,
                Err(e) => {
                    if self.is_shutting_down() {
                        break;
                    }
                    warn!(error = %e, coords = %self.state.lock().current, "binlog stream interrupted");
                    match self.reconnect() {
                        Ok(new_conn) => {
                            conn = new_conn;
                            session = Session::default();
                        }
                        Err(StreamError::Cancelled) => break,
                        Err(e) => {
                            error!(error = %e, "could not re-establish binlog stream; stopping");
                            break;
                        }
                    }
                }
            }
        }

        drop(conn);
        self.drain(&queue, &sink, workers);
    }

    fn reconnect(&self) -> Result<Box<dyn BinlogConnection>, StreamError> {
        PipelineStats::incr(&self.stats.reconnects);
        self.set_phase(StreamPhase::Disconnected);
        self.set_phase(StreamPhase::Connecting);
        let mut conn = self.connect_with_retry()?;

        self.set_phase(StreamPhase::IdentityVerifying);
        let live = conn.server_uuid()?;
        let expected = self.server_uuid.lock().clone();
        if live != expected {
            return Err(StreamError::IdentityMismatch {
                persisted: expected,
                live,
            });
        }

        let resume = self.state.lock().current.clone();
        let (file, pos) = if resume.is_known() {
            (resume.file, resume.pos.max(FIRST_BINLOG_POS))
        } else {
            (conn.earliest_log_file()?.unwrap_or_default(), FIRST_BINLOG_POS)
        };
        conn.start_dump(&file, pos)?;
        self.set_phase(StreamPhase::Streaming);
        info!(binlog_file = %file, pos, "binlog stream resumed");
        Ok(conn)
    }

    fn handle_event(
        &self,
        event: &[u8],
        session: &mut Session,
        queue: &UpdateQueue,
        sink: &OrderedSink,
    ) {
        PipelineStats::incr(&self.stats.events_fetched);
        let header = match EventHeader::parse(event) {
            Ok(header) => header,
            Err(e) => {
                self.decode_failed(None, &e);
                return;
            }
        };
        let event_type = header.event_type();
        if event_type == EventType::Rotate {
            self.handle_rotation(event, session, queue, sink);
            return;
        }

        // Artificial events carry log_pos 0 and do not move the position.
        if header.log_pos != 0 {
            self.state.lock().current.pos = u64::from(header.log_pos);
        }

        let result = match event_type {
            EventType::FormatDescription => {
                self.handle_format_description(event, session);
                Ok(())
            }
            EventType::TableMap => self
                .event_body(event, session.checksum)
                .and_then(|body| self.handle_table_map(body, session)),
            EventType::WriteRowsV2 => self
                .event_body(event, session.checksum)
                .and_then(|body| self.handle_rows(body, RowsKind::Write, session, queue)),
            EventType::UpdateRowsV2 => self
                .event_body(event, session.checksum)
                .and_then(|body| self.handle_rows(body, RowsKind::Update, session, queue)),
            _ => {
                trace!(type_code = header.type_code, "ignoring binlog event");
                PipelineStats::incr(&self.stats.events_ignored);
                Ok(())
            }
        };
        if let Err(e) = result {
            self.decode_failed(Some(event_type), &e);
        }
    }

    /// Verify the trailer if configured, then strip it.
    fn event_body<'a>(
        &self,
        event: &'a [u8],
        checksum: ChecksumAlg,
    ) -> Result<&'a [u8], DecodeError> {
        if checksum == ChecksumAlg::Crc32 && self.config.verify_checksum {
            verify_checksum(event)?;
        }
        strip_trailer(event, checksum)
    }

    fn handle_format_description(&self, event: &[u8], session: &mut Session) {
        PipelineStats::incr(&self.stats.events_ignored);
        match decode_format_description(event) {
            Ok(checksum) => {
                if checksum != session.checksum {
                    debug!(?checksum, "binlog checksum algorithm changed");
                }
                session.checksum = checksum;
            }
            Err(e) => self.decode_failed(Some(EventType::FormatDescription), &e),
        }
    }

    fn decode_failed(&self, event_type: Option<EventType>, e: &DecodeError) {
        PipelineStats::incr(&self.stats.decode_errors);
        let coords = self.state.lock().current.clone();
        warn!(?event_type, %coords, error = %e, "dropping malformed binlog event");
    }

    fn handle_table_map(&self, event: &[u8], session: &mut Session) -> Result<(), DecodeError> {
        let map = {
            let state = self.state.lock();
            if state.tracked.is_empty() {
                return Ok(());
            }
            decode_table_map(event, |db, table| state.tracked.contains(db, table))?
        };
        if let Some(map) = map {
            trace!(db = %map.database, table = %map.table, table_id = map.table_id, "cached table map");
            PipelineStats::incr(&self.stats.table_maps);
            session.table_maps.insert(map.table_id, map);
        }
        Ok(())
    }

    fn handle_rows(
        &self,
        event: &[u8],
        kind: RowsKind,
        session: &mut Session,
        queue: &UpdateQueue,
    ) -> Result<(), DecodeError> {
        let header = decode_rows_header(event)?;
        let result = self.enqueue_rows(event, kind, header.table_id, session, queue);
        if header.is_statement_end() {
            session.table_maps.clear();
        }
        result
    }

    fn enqueue_rows(
        &self,
        event: &[u8],
        kind: RowsKind,
        table_id: u64,
        session: &Session,
        queue: &UpdateQueue,
    ) -> Result<(), DecodeError> {
        let Some(map) = session.table_maps.get(&table_id) else {
            return Ok(());
        };
        let (entry, origin) = {
            let state = self.state.lock();
            match state.tracked.get(&map.database, &map.table) {
                Some(entry) => (entry.clone(), state.current.clone()),
                None => return Ok(()),
            }
        };

        let rows = decode_rows(
            event,
            kind,
            map,
            entry.id_column_ordinal,
            entry.vector_column_ordinal,
        )?;
        for row in rows {
            let item = UpdateItem::new(
                &map.database,
                &map.table,
                &entry.vector_column,
                row.row_id,
                row.vector,
                origin.clone(),
            );
            if queue.enqueue(item).is_err() {
                debug!("update queue shut down; dropping remaining rows");
                break;
            }
            PipelineStats::incr(&self.stats.rows_enqueued);
        }
        Ok(())
    }

    fn handle_rotation(
        &self,
        event: &[u8],
        session: &mut Session,
        queue: &UpdateQueue,
        sink: &OrderedSink,
    ) {
        // Artificial rotates arrive before any format description and may
        // lack a trailer, so each one is checked on its own.
        let trailer = if has_valid_checksum(event) {
            ChecksumAlg::Crc32
        } else {
            ChecksumAlg::Off
        };
        let rotation = match strip_trailer(event, trailer).and_then(decode_rotate) {
            Ok(rotation) => rotation,
            Err(e) => {
                self.decode_failed(Some(EventType::Rotate), &e);
                return;
            }
        };
        session.table_maps.clear();

        let current = self.state.lock().current.clone();
        if rotation.file == current.file {
            debug!(binlog_file = %rotation.file, pos = rotation.position, "rotate event for the current file");
            return;
        }

        if current.is_known() {
            self.flush_indexes(queue, sink);
        }

        let next = BinlogCoordinates::new(rotation.file, rotation.position);
        {
            let mut state = self.state.lock();
            state.current = next.clone();
            state.stable = Some(next.clone());
        }
        PipelineStats::incr(&self.stats.rotations);
        info!(from = %current, to = %next, "binlog rotated");
        self.persist_checkpoint(&next);
    }

    /// Wait for every queued update to be applied, then checkpoint each
    /// tracked index at the current position.
    fn flush_indexes(&self, queue: &UpdateQueue, sink: &OrderedSink) {
        let started = Instant::now();
        queue.wait_until_empty();
        sink.reset();

        let (coords, tables) = {
            let state = self.state.lock();
            (state.current.clone(), state.tracked.snapshot())
        };
        for (db, table, entry) in &tables {
            if let Err(e) = self
                .indexes
                .checkpoint_index(db, table, &entry.vector_column, &coords)
            {
                warn!(index = %index_key(db, table, &entry.vector_column), error = %e, "failed to checkpoint vector index");
                PipelineStats::incr(&self.stats.checkpoint_failures);
            }
        }
        debug!(
            indexes = tables.len(),
            %coords,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "flushed vector indexes"
        );
    }

    fn persist_checkpoint(&self, coords: &BinlogCoordinates) {
        let checkpoint = Checkpoint::new(self.server_uuid.lock().clone(), coords);
        match self.checkpoints.save(&checkpoint) {
            Ok(()) => debug!(%coords, path = %self.checkpoints.path().display(), "checkpoint saved"),
            Err(e) => {
                warn!(%coords, error = %e, "failed to save binlog checkpoint");
                PipelineStats::incr(&self.stats.checkpoint_failures);
            }
        }
    }

    fn drain(&self, queue: &UpdateQueue, sink: &OrderedSink, workers: WorkerPool) {
        self.set_phase(StreamPhase::Draining);
        info!("draining binlog pipeline");
        queue.shutdown();
        workers.join();

        let (current, stable, tables) = {
            let state = self.state.lock();
            (
                state.current.clone(),
                state.stable.clone(),
                state.tracked.snapshot(),
            )
        };
        if current.is_known() {
            for (db, table, entry) in &tables {
                if let Err(e) = self.indexes.stamp_and_save(
                    db,
                    table,
                    &entry.vector_column,
                    &current,
                    SaveMode::Shutdown,
                ) {
                    warn!(index = %index_key(db, table, &entry.vector_column), error = %e, "failed to save vector index");
                    PipelineStats::incr(&self.stats.checkpoint_failures);
                }
            }
        }
        if let Some(stable) = &stable {
            self.persist_checkpoint(stable);
        }

        let mut discarded = 0usize;
        while queue.try_dequeue().is_some() {
            discarded += 1;
        }
        if discarded > 0 {
            warn!(discarded, "discarded queued updates at shutdown");
        }
        sink.reset();

        self.set_phase(StreamPhase::Stopped);
        info!(coords = %current, "binlog pipeline stopped");
    }
}
