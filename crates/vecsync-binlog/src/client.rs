//! MySQL replication client
//!
//! Connection handling, authentication and the replication handshake come
//! from the `mysql` driver. This module adapts it to the pipeline:
//!
//! * text queries keep every value as raw bytes, so binary vector columns
//!   survive a bulk read untouched
//! * the binlog dump is polled one event at a time and each event is handed
//!   back exactly as the server sent it, checksum trailer included
//!
//! The server is asked for a heartbeat every read timeout while the stream
//! is idle; a heartbeat surfaces as [`WireError::Timeout`] so a caller
//! polling [`MySqlConn::fetch_event`] regains control regularly.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use mysql::binlog::events::Event;
use mysql::binlog::{BinlogChecksumAlg, BinlogVersion, EventType};
use mysql::prelude::Queryable;
use mysql::{BinlogRequest, BinlogStream, Conn, OptsBuilder, Value};
use thiserror::Error;
use tracing::debug;

use crate::event::CHECKSUM_LEN;

const HEARTBEAT_EVENT: u8 = EventType::HEARTBEAT_EVENT as u8;
const HEARTBEAT_V2_EVENT: u8 = 41;
const FORMAT_DESCRIPTION_EVENT: u8 = EventType::FORMAT_DESCRIPTION_EVENT as u8;

/// Server codes for rejected credentials or schema access.
const ACCESS_DENIED_CODES: [u16; 3] = [1044, 1045, 1698];

/// Lower bound for socket timeouts; heartbeats keep an idle stream alive.
const MIN_SOCKET_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors from the MySQL client.
#[derive(Debug, Error)]
pub enum WireError {
    /// Socket error, including a connection closed by the server.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Nothing but a heartbeat arrived within the read timeout.
    #[error("read timed out")]
    Timeout,

    /// The server ended the binlog stream.
    #[error("end of binlog stream")]
    EndOfStream,

    /// The server answered with an error.
    #[error("server error {code}: {message}")]
    Server {
        /// MySQL error code
        code: u16,
        /// Error message
        message: String,
    },

    /// The server rejected the credentials.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The server sent something this client cannot use.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Any other driver failure.
    #[error("driver error: {0}")]
    Driver(mysql::Error),
}

impl WireError {
    /// Whether this is a read timeout rather than a failure.
    pub fn is_timeout(&self) -> bool {
        matches!(self, WireError::Timeout)
    }

    /// Whether the connection is gone or unusable, so a fresh one may help.
    pub fn is_connectivity(&self) -> bool {
        match self {
            WireError::Io(_) | WireError::Timeout | WireError::EndOfStream => true,
            WireError::Driver(err) => matches!(
                err,
                mysql::Error::DriverError(_) | mysql::Error::CodecError(_)
            ),
            _ => false,
        }
    }
}

impl From<mysql::Error> for WireError {
    fn from(err: mysql::Error) -> Self {
        match err {
            mysql::Error::IoError(err) => WireError::Io(err),
            mysql::Error::MySqlError(err) if ACCESS_DENIED_CODES.contains(&err.code) => {
                WireError::Auth(format!("{} ({})", err.message, err.code))
            }
            mysql::Error::MySqlError(err) => WireError::Server {
                code: err.code,
                message: err.message,
            },
            other => WireError::Driver(other),
        }
    }
}

/// Where and how to connect.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// Unix socket path; used instead of host/port when set
    pub socket: Option<PathBuf>,
    /// User name
    pub user: String,
    /// Password
    pub password: String,
    /// Connect and handshake timeout
    pub connect_timeout: Duration,
    /// Longest quiet spell on the binlog stream before a heartbeat is due
    pub read_timeout: Duration,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3306,
            socket: None,
            user: String::new(),
            password: String::new(),
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(1),
        }
    }
}

impl ConnectOptions {
    /// Socket read/write timeout: several heartbeat periods, never below
    /// [`MIN_SOCKET_TIMEOUT`].
    pub fn socket_timeout(&self) -> Duration {
        self.read_timeout.saturating_mul(4).max(MIN_SOCKET_TIMEOUT)
    }

    fn to_opts(&self) -> OptsBuilder {
        let builder = OptsBuilder::new()
            .user(Some(self.user.as_str()))
            .pass(Some(self.password.as_str()))
            .tcp_connect_timeout(Some(self.connect_timeout))
            .read_timeout(Some(self.socket_timeout()))
            .write_timeout(Some(self.socket_timeout()))
            .prefer_socket(false);
        match &self.socket {
            Some(path) => builder.socket(Some(path.to_string_lossy())),
            None => builder
                .ip_or_hostname(Some(self.host.as_str()))
                .tcp_port(self.port),
        }
    }
}

/// A result row with every value as raw bytes; `None` is SQL NULL.
pub type RawRow = Vec<Option<Vec<u8>>>;

/// A result row as text; `None` is SQL NULL.
pub type Row = Vec<Option<String>>;

/// Lossy UTF-8 view of a raw row.
pub fn text_row(raw: RawRow) -> Row {
    raw.into_iter()
        .map(|value| value.map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
        .collect()
}

fn raw_value(value: Value) -> Option<Vec<u8>> {
    match value {
        Value::NULL => None,
        Value::Bytes(bytes) => Some(bytes),
        other => Some(other.as_sql(true).into_bytes()),
    }
}

enum Session {
    Idle(Conn),
    Streaming(BinlogStream),
    Closed,
}

/// One connection: queries until [`MySqlConn::binlog_dump`], events after.
pub struct MySqlConn {
    session: Session,
    connection_id: u32,
    read_timeout: Duration,
}

impl MySqlConn {
    /// Connect and authenticate.
    pub fn connect(opts: &ConnectOptions) -> Result<Self, WireError> {
        let conn = Conn::new(opts.to_opts())?;
        let connection_id = conn.connection_id();
        debug!(
            connection_id,
            server_version = ?conn.server_version(),
            "connected to MySQL"
        );
        Ok(Self {
            session: Session::Idle(conn),
            connection_id,
            read_timeout: opts.read_timeout,
        })
    }

    /// Server-assigned connection id
    pub fn connection_id(&self) -> u32 {
        self.connection_id
    }

    fn idle(&mut self) -> Result<&mut Conn, WireError> {
        match &mut self.session {
            Session::Idle(conn) => Ok(conn),
            Session::Streaming(_) => Err(WireError::Protocol(
                "connection is streaming the binlog".to_string(),
            )),
            Session::Closed => Err(WireError::Protocol("connection is closed".to_string())),
        }
    }

    /// Run a query and collect its rows.
    pub fn query(&mut self, sql: &str) -> Result<Vec<RawRow>, WireError> {
        let rows: Vec<mysql::Row> = self.idle()?.query(sql)?;
        Ok(rows
            .into_iter()
            .map(|mut row| {
                (0..row.len())
                    .map(|i| row.take::<Value, usize>(i).and_then(raw_value))
                    .collect()
            })
            .collect())
    }

    /// Run a statement that returns no rows.
    pub fn execute(&mut self, sql: &str) -> Result<(), WireError> {
        self.idle()?.query_drop(sql)?;
        Ok(())
    }

    /// Register as a replica and start streaming from `file` at `pos`.
    ///
    /// The connection serves [`MySqlConn::fetch_event`] only from here on.
    pub fn binlog_dump(&mut self, file: &str, pos: u64, server_id: u32) -> Result<(), WireError> {
        let pos = u32::try_from(pos).map_err(|_| {
            WireError::Protocol(format!("binlog position {pos} does not fit a dump request"))
        })?;
        let period = self.read_timeout.as_nanos();
        self.execute(&format!(
            "SET @master_heartbeat_period = {period}, @source_heartbeat_period = {period}"
        ))?;

        let Session::Idle(conn) = std::mem::replace(&mut self.session, Session::Closed) else {
            return Err(WireError::Protocol(
                "binlog dump already requested".to_string(),
            ));
        };
        let request = BinlogRequest::new(server_id)
            .with_filename(file.as_bytes())
            .with_pos(pos);
        let stream = conn.get_binlog_stream(request)?;
        debug!(binlog_file = %file, pos, server_id, "requested binlog dump");
        self.session = Session::Streaming(stream);
        Ok(())
    }

    /// Next binlog event (header onwards) from a dump in progress.
    pub fn fetch_event(&mut self) -> Result<Vec<u8>, WireError> {
        let Session::Streaming(stream) = &mut self.session else {
            return Err(WireError::Protocol("no binlog dump in progress".to_string()));
        };
        match stream.next() {
            None => Err(WireError::EndOfStream),
            Some(Err(err)) => Err(err.into()),
            Some(Ok(event)) => match event.header().event_type_raw() {
                HEARTBEAT_EVENT | HEARTBEAT_V2_EVENT => Err(WireError::Timeout),
                _ => raw_event(&event),
            },
        }
    }
}

/// Whether [`Event::write`] emits a checksum trailer for `event`.
fn writes_trailer(event: &Event) -> bool {
    let is_fde = event.header().event_type_raw() == FORMAT_DESCRIPTION_EVENT;
    match event.footer().get_checksum_alg() {
        Ok(Some(BinlogChecksumAlg::BINLOG_CHECKSUM_ALG_CRC32)) => true,
        Ok(Some(_)) => is_fde,
        _ => false,
    }
}

/// The bytes the server sent for `event`.
///
/// The driver strips the trailer and recomputes it when writing, so the
/// received checksum is put back to keep corruption detectable.
pub fn raw_event(event: &Event) -> Result<Vec<u8>, WireError> {
    let mut raw = Vec::with_capacity(event.header().event_size() as usize);
    event.write(BinlogVersion::Version4, &mut raw)?;
    if writes_trailer(event) {
        if let (Some(checksum), Some(start)) =
            (event.checksum(), raw.len().checked_sub(CHECKSUM_LEN))
        {
            raw[start..].copy_from_slice(&checksum);
        }
    }
    Ok(raw)
}
