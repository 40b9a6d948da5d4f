//! Configuration module for vecsync
//!
//! This module handles loading and parsing configuration from TOML files,
//! with sensible defaults for all optional values.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Result, VecsyncError};

/// Default checkpoint file name inside the index directory
pub const DEFAULT_CHECKPOINT_FILE: &str = "binlog_state.json";

/// Main configuration structure for vecsync
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Connection to the MySQL primary
    pub mysql: MySqlConfig,

    /// Streaming pipeline configuration
    pub stream: StreamConfig,

    /// Checkpoint location
    pub checkpoint: CheckpointConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            VecsyncError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        Self::parse_str(&contents)
    }

    /// Parse configuration from a TOML string
    pub fn parse_str(contents: &str) -> Result<Self> {
        toml::from_str(contents)
            .map_err(|e| VecsyncError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.mysql.port == 0 && self.mysql.socket.is_none() {
            return Err(VecsyncError::Config(
                "mysql.port cannot be 0 without mysql.socket".to_string(),
            ));
        }

        if self.mysql.user.is_empty() {
            return Err(VecsyncError::Config("mysql.user must be set".to_string()));
        }

        if self.stream.worker_threads == 0 {
            return Err(VecsyncError::Config(
                "stream.worker_threads must be at least 1".to_string(),
            ));
        }

        if self.stream.max_connect_attempts == 0 {
            return Err(VecsyncError::Config(
                "stream.max_connect_attempts must be at least 1".to_string(),
            ));
        }

        if self.checkpoint.file_name.is_empty() {
            return Err(VecsyncError::Config(
                "checkpoint.file_name cannot be empty".to_string(),
            ));
        }

        if !is_identifier(&self.stream.catalog_schema) || !is_identifier(&self.stream.catalog_table)
        {
            return Err(VecsyncError::Config(
                "stream.catalog_schema and stream.catalog_table must be plain identifiers"
                    .to_string(),
            ));
        }

        Ok(())
    }

    /// Write configuration to a TOML file
    ///
    /// Uses atomic write (temp file + rename) to prevent corruption.
    pub fn to_file(&self, path: &Path) -> Result<()> {
        let toml_str = toml::to_string_pretty(self)
            .map_err(|e| VecsyncError::Config(format!("Failed to serialize config: {}", e)))?;
        let tmp = path.with_extension("toml.tmp");
        std::fs::write(&tmp, toml_str)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}

fn is_identifier(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

/// MySQL connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MySqlConfig {
    /// Server host name or address
    pub host: String,

    /// Server port
    pub port: u16,

    /// Replication user
    pub user: String,

    /// Replication user password
    pub password: String,

    /// Unix socket path; takes precedence over host/port when set
    pub socket: Option<PathBuf>,

    /// Server id announced in the binlog dump request
    pub server_id: u32,

    /// TCP connect timeout in milliseconds
    pub connect_timeout_ms: u64,

    /// Socket read timeout in milliseconds; bounds how long a fetch blocks
    /// before the shutdown flag is re-checked
    pub read_timeout_ms: u64,
}

impl Default for MySqlConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3306,
            user: String::new(),
            password: String::new(),
            socket: None,
            server_id: 1,
            connect_timeout_ms: 5_000,
            read_timeout_ms: 1_000,
        }
    }
}

impl MySqlConfig {
    /// Connect timeout as a [`Duration`]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Read timeout as a [`Duration`]
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms.max(1))
    }
}

/// Streaming pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Run the binlog pipeline at all
    pub enabled: bool,

    /// Number of worker threads applying updates
    pub worker_threads: usize,

    /// Maximum queued updates before the decode thread blocks (0 = unbounded)
    pub queue_capacity: usize,

    /// Delay between connection attempts in milliseconds
    pub connect_retry_interval_ms: u64,

    /// Consecutive failed connection attempts before giving up
    pub max_connect_attempts: u32,

    /// Verify the CRC32 trailer of table-map and row events
    pub verify_checksum: bool,

    /// Schema holding the vector column catalog
    pub catalog_schema: String,

    /// Catalog table (or view) listing vector columns
    pub catalog_table: String,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            worker_threads: 2,
            queue_capacity: 0,
            connect_retry_interval_ms: 1_000,
            max_connect_attempts: 600,
            verify_checksum: false,
            catalog_schema: "mysql".to_string(),
            catalog_table: "myvector_columns".to_string(),
        }
    }
}

impl StreamConfig {
    /// Connect retry interval as a [`Duration`]
    pub fn connect_retry_interval(&self) -> Duration {
        Duration::from_millis(self.connect_retry_interval_ms)
    }
}

/// Checkpoint location
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    /// Index directory; the checkpoint file and index files live here
    pub dir: PathBuf,

    /// Checkpoint file name inside `dir`
    pub file_name: String,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("."),
            file_name: DEFAULT_CHECKPOINT_FILE.to_string(),
        }
    }
}

impl CheckpointConfig {
    /// Full path of the checkpoint file
    pub fn path(&self) -> PathBuf {
        self.dir.join(&self.file_name)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (pretty, json)
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable format
    #[default]
    Pretty,

    /// JSON format
    Json,
}
