//! Where binlog events come from
//!
//! The controller talks to the server only through [`BinlogConnector`] and
//! [`BinlogConnection`]. [`MySqlConnector`] is the production
//! implementation; tests substitute scripted in-memory connections.

use tracing::debug;
use vecsync_binlog::{text_row, ConnectOptions, MySqlConn, RawRow, Row, WireError};
use vecsync_core::config::MySqlConfig;

/// Session variables set before requesting the dump; the driver announces
/// checksum support itself.
const SESSION_SETUP: &str = "SET @net_read_timeout = 3000, @replica_net_timeout = 3000";

/// One connection to a binlog source.
pub trait BinlogConnection: Send {
    /// `@@server_uuid` of the source
    fn server_uuid(&mut self) -> Result<String, WireError>;

    /// Oldest binlog file still on the server, if binary logging is enabled
    fn earliest_log_file(&mut self) -> Result<Option<String>, WireError>;

    /// Run a query, keeping every value as raw bytes.
    fn query_raw(&mut self, sql: &str) -> Result<Vec<RawRow>, WireError>;

    /// Run a query and read every value as text.
    fn query_rows(&mut self, sql: &str) -> Result<Vec<Row>, WireError> {
        Ok(self.query_raw(sql)?.into_iter().map(text_row).collect())
    }

    /// Switch the connection into binlog streaming from `file` at `pos`.
    fn start_dump(&mut self, file: &str, pos: u64) -> Result<(), WireError>;

    /// Next raw event, header included.
    ///
    /// Returns [`WireError::Timeout`] when nothing arrived within the read
    /// timeout.
    fn fetch_event(&mut self) -> Result<Vec<u8>, WireError>;
}

/// Opens new [`BinlogConnection`]s.
pub trait BinlogConnector: Send + Sync {
    /// Connect and authenticate.
    fn connect(&self) -> Result<Box<dyn BinlogConnection>, WireError>;
}

/// Connects to a MySQL server over TCP or a Unix socket.
#[derive(Debug, Clone)]
pub struct MySqlConnector {
    options: ConnectOptions,
    server_id: u32,
}

impl MySqlConnector {
    /// Connector using explicit connection options.
    pub fn new(options: ConnectOptions, server_id: u32) -> Self {
        Self { options, server_id }
    }

    /// Connector for the `[mysql]` configuration section.
    pub fn from_config(config: &MySqlConfig) -> Self {
        let options = ConnectOptions {
            host: config.host.clone(),
            port: config.port,
            socket: config.socket.clone(),
            user: config.user.clone(),
            password: config.password.clone(),
            connect_timeout: config.connect_timeout(),
            read_timeout: config.read_timeout(),
        };
        Self::new(options, config.server_id)
    }

    /// Connection options in use
    pub fn options(&self) -> &ConnectOptions {
        &self.options
    }
}

impl BinlogConnector for MySqlConnector {
    fn connect(&self) -> Result<Box<dyn BinlogConnection>, WireError> {
        let conn = MySqlConn::connect(&self.options)?;
        Ok(Box::new(MySqlBinlogConnection {
            conn,
            server_id: self.server_id,
        }))
    }
}

struct MySqlBinlogConnection {
    conn: MySqlConn,
    server_id: u32,
}

impl BinlogConnection for MySqlBinlogConnection {
    fn server_uuid(&mut self) -> Result<String, WireError> {
        first_value(self.query_rows("SELECT @@server_uuid")?)
            .ok_or_else(|| WireError::Protocol("server did not report @@server_uuid".to_string()))
    }

    fn earliest_log_file(&mut self) -> Result<Option<String>, WireError> {
        Ok(first_value(self.query_rows("SHOW BINARY LOGS")?))
    }

    fn query_raw(&mut self, sql: &str) -> Result<Vec<RawRow>, WireError> {
        self.conn.query(sql)
    }

    fn start_dump(&mut self, file: &str, pos: u64) -> Result<(), WireError> {
        self.conn.execute(SESSION_SETUP)?;
        debug!(connection_id = self.conn.connection_id(), "binlog session configured");
        self.conn.binlog_dump(file, pos, self.server_id)
    }

    fn fetch_event(&mut self) -> Result<Vec<u8>, WireError> {
        self.conn.fetch_event()
    }
}

/// First column of the first row, if present and non-NULL.
fn first_value(rows: Vec<Row>) -> Option<String> {
    rows.into_iter()
        .next()
        .and_then(|row| row.into_iter().next())
        .flatten()
        .filter(|value| !value.is_empty())
}
