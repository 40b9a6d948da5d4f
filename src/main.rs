//! vecsync - keeps vector indexes in sync with a MySQL binlog
//!
//! This is the main entry point for the vecsync daemon.
#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{ArgAction, Parser};
use tracing::{error, info, warn};
use vecsync::pipeline::{MySqlConnector, StreamController};
use vecsync::vecsync_core::config::LogFormat;
use vecsync::{CheckpointStore, Config, FlatIndexOpener, IndexCollection};

/// How often the main task checks whether the pipeline died on its own
const LIVENESS_INTERVAL: Duration = Duration::from_secs(1);

/// vecsync - incremental vector index maintenance from the MySQL binlog
#[derive(Parser, Debug)]
#[command(name = "vecsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (TOML)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level: trace, debug, info, warn, error (overrides config file)
    #[arg(short = 'l', long = "log-level", value_name = "LEVEL", env = "VECSYNC_LOG_LEVEL")]
    loglevel: Option<String>,

    /// MySQL host (overrides config file)
    #[arg(long = "host", value_name = "HOST", env = "VECSYNC_MYSQL_HOST")]
    host: Option<String>,

    /// MySQL port (overrides config file)
    #[arg(short = 'p', long = "port", value_name = "PORT", env = "VECSYNC_MYSQL_PORT")]
    port: Option<u16>,

    /// Directory holding index files and the binlog checkpoint
    #[arg(long = "index-dir", value_name = "PATH", env = "VECSYNC_INDEX_DIR")]
    index_dir: Option<PathBuf>,

    /// Number of worker threads applying updates
    #[arg(short = 'w', long = "workers", value_name = "NUM")]
    workers: Option<usize>,

    /// Test configuration and exit without connecting
    #[arg(long = "test-config", action = ArgAction::SetTrue)]
    test_config: bool,

    /// Dump effective configuration to stdout and exit
    #[arg(long = "dump-config", action = ArgAction::SetTrue)]
    dump_config: bool,

    /// Config overrides in key=value format (can be specified multiple times)
    #[arg(long = "set", value_name = "KEY=VALUE", action = ArgAction::Append)]
    config_overrides: Vec<String>,
}

impl Cli {
    /// Apply CLI argument overrides to the configuration
    fn apply_to_config(&self, config: &mut Config) -> Result<(), String> {
        if let Some(ref level) = self.loglevel {
            config.logging.level = level.clone();
        }
        if let Some(ref host) = self.host {
            config.mysql.host = host.clone();
        }
        if let Some(port) = self.port {
            config.mysql.port = port;
        }
        if let Some(ref dir) = self.index_dir {
            config.checkpoint.dir = dir.clone();
        }
        if let Some(workers) = self.workers {
            config.stream.worker_threads = workers;
        }

        for override_str in &self.config_overrides {
            let (key, value) = override_str.split_once('=').ok_or_else(|| {
                format!(
                    "Invalid config override '{}': expected key=value format",
                    override_str
                )
            })?;

            match key {
                "mysql.host" => config.mysql.host = value.to_string(),
                "mysql.port" => {
                    config.mysql.port = value
                        .parse()
                        .map_err(|_| format!("Invalid port value: {}", value))?;
                }
                "mysql.user" => config.mysql.user = value.to_string(),
                "mysql.password" => config.mysql.password = value.to_string(),
                "mysql.socket" => config.mysql.socket = Some(PathBuf::from(value)),
                "mysql.server_id" => {
                    config.mysql.server_id = value
                        .parse()
                        .map_err(|_| format!("Invalid server id: {}", value))?;
                }
                "stream.enabled" => {
                    config.stream.enabled = value
                        .parse()
                        .map_err(|_| format!("Invalid boolean value: {}", value))?;
                }
                "stream.queue_capacity" => {
                    config.stream.queue_capacity = value
                        .parse()
                        .map_err(|_| format!("Invalid queue capacity: {}", value))?;
                }
                "stream.verify_checksum" => {
                    config.stream.verify_checksum = value
                        .parse()
                        .map_err(|_| format!("Invalid boolean value: {}", value))?;
                }
                "logging.level" => config.logging.level = value.to_string(),
                _ => return Err(format!("Unknown config key: {}", key)),
            }
        }
        Ok(())
    }
}

fn load_config(cli: &Cli) -> Result<Config, String> {
    if let Some(path) = &cli.config {
        return Config::from_file(path).map_err(|e| e.to_string());
    }
    let default_path = PathBuf::from("vecsync.toml");
    if default_path.exists() {
        return Config::from_file(&default_path).map_err(|e| e.to_string());
    }
    Ok(Config::default())
}

fn init_logging(config: &Config) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json())
                .init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().pretty())
                .init();
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = cli.apply_to_config(&mut config) {
        eprintln!("{e}");
        return ExitCode::FAILURE;
    }
    if let Err(e) = config.validate() {
        eprintln!("{e}");
        return ExitCode::FAILURE;
    }

    if cli.dump_config {
        return match toml::to_string_pretty(&config) {
            Ok(output) => {
                print!("{output}");
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("Failed to serialize configuration: {e}");
                ExitCode::FAILURE
            }
        };
    }

    if cli.test_config {
        println!("Configuration OK");
        println!("  MySQL: {}@{}:{}", config.mysql.user, config.mysql.host, config.mysql.port);
        println!("  Server id: {}", config.mysql.server_id);
        println!("  Streaming enabled: {}", config.stream.enabled);
        println!("  Workers: {}", config.stream.worker_threads);
        println!("  Checkpoint: {}", config.checkpoint.path().display());
        println!("  Log level: {}", config.logging.level);
        return ExitCode::SUCCESS;
    }

    init_logging(&config);

    if !config.stream.enabled {
        info!("binlog streaming disabled by configuration");
        return ExitCode::SUCCESS;
    }

    let index_dir = config.checkpoint.dir.clone();
    if let Err(e) = std::fs::create_dir_all(&index_dir) {
        error!(dir = %index_dir.display(), error = %e, "cannot create index directory");
        return ExitCode::FAILURE;
    }

    let controller = Arc::new(StreamController::new(
        config.stream.clone(),
        Arc::new(MySqlConnector::from_config(&config.mysql)),
        CheckpointStore::new(&index_dir, &config.checkpoint.file_name),
        Arc::new(IndexCollection::new(&index_dir)),
        Some(Arc::new(FlatIndexOpener::new(&index_dir))),
    ));

    info!(
        host = %config.mysql.host,
        port = config.mysql.port,
        index_dir = %index_dir.display(),
        "starting vecsync"
    );

    let starter = controller.clone();
    match tokio::task::spawn_blocking(move || starter.start()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            error!(error = %e, "failed to start binlog pipeline");
            return ExitCode::FAILURE;
        }
        Err(e) => {
            error!(error = %e, "startup task failed");
            return ExitCode::FAILURE;
        }
    }

    let mut exit = ExitCode::SUCCESS;
    let mut liveness = tokio::time::interval(LIVENESS_INTERVAL);
    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    warn!(error = %e, "failed to listen for shutdown signal");
                }
                info!("shutdown requested");
                break;
            }
            _ = liveness.tick() => {
                if !controller.is_running() {
                    error!(phase = %controller.phase(), "binlog pipeline stopped unexpectedly");
                    exit = ExitCode::FAILURE;
                    break;
                }
            }
        }
    }

    let stopper = controller.clone();
    if let Err(e) = tokio::task::spawn_blocking(move || stopper.stop()).await {
        error!(error = %e, "shutdown task failed");
    }

    let stats = controller.stats();
    match serde_json::to_string(&stats) {
        Ok(json) => info!(stats = %json, "final pipeline statistics"),
        Err(e) => warn!(error = %e, "failed to serialize statistics"),
    }
    exit
}
