mod file_config;

pub use file_config::{
    AnalyzerConfig, BlobStoreConfig, FileConfig, TransactionsConfig, TransportConfig,
};

use crate::worker::AckPolicy;
use anyhow::{anyhow, bail, Result};
use clap::ValueEnum;
use std::path::PathBuf;

pub const DEFAULT_SCRATCH_DIR: &str = "tmp";
pub const DEFAULT_MAX_IN_FLIGHT: usize = 1;
pub const DEFAULT_METRICS_PORT: u16 = 9091;
pub const DEFAULT_ANALYZER_TIMEOUT_SECS: u64 = 600;
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 300;

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone)]
pub struct CliConfig {
    pub db_path: Option<PathBuf>,
    pub scratch_dir: PathBuf,
    pub analysis_id: Option<String>,
    pub max_in_flight: usize,
    pub ack_policy: AckPolicy,
    pub metrics_port: u16,
    pub analyzer_command: Option<String>,
    pub analyzer_args: Vec<String>,
    pub analyzer_timeout_secs: u64,
    pub http_timeout_secs: u64,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            scratch_dir: PathBuf::from(DEFAULT_SCRATCH_DIR),
            analysis_id: None,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            ack_policy: AckPolicy::default(),
            metrics_port: DEFAULT_METRICS_PORT,
            analyzer_command: None,
            analyzer_args: Vec::new(),
            analyzer_timeout_secs: DEFAULT_ANALYZER_TIMEOUT_SECS,
            http_timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    // Core settings
    pub db_path: PathBuf,
    pub scratch_dir: PathBuf,
    pub analysis_id: String,
    pub max_in_flight: usize,
    pub ack_policy: AckPolicy,
    /// 0 disables the metrics endpoint.
    pub metrics_port: u16,

    // Component settings
    pub analyzer: AnalyzerSettings,
    pub blob_store: BlobStoreSettings,
    pub transactions: TransactionSettings,
    pub transport: TransportSettings,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnalyzerSettings {
    pub command: String,
    pub args: Vec<String>,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BlobStoreSettings {
    pub http_timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransactionSettings {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for TransactionSettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 10,
            max_backoff_ms: 1000,
            backoff_multiplier: 2.0,
        }
    }
}

/// Receive failures tolerated before the transport is considered dead.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportSettings {
    pub max_receive_failures: u32,
    pub receive_retry_ms: u64,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            max_receive_failures: 5,
            receive_retry_ms: 500,
        }
    }
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        // TOML overrides CLI for each field
        let db_path = file
            .db_path
            .map(PathBuf::from)
            .or_else(|| cli.db_path.clone())
            .ok_or_else(|| anyhow!("db_path must be specified via --db-path or in config file"))?;

        // The database file may be created, but its directory must exist
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if !parent.is_dir() {
                bail!("Database directory does not exist: {:?}", parent);
            }
        }

        let scratch_dir = file
            .scratch_dir
            .map(PathBuf::from)
            .unwrap_or_else(|| cli.scratch_dir.clone());

        let analysis_id = file
            .analysis_id
            .or_else(|| cli.analysis_id.clone())
            .ok_or_else(|| {
                anyhow!("analysis_id must be specified via --analysis-id or in config file")
            })?;
        if analysis_id.trim().is_empty() {
            bail!("analysis_id must not be empty");
        }

        let max_in_flight = file.max_in_flight.unwrap_or(cli.max_in_flight);
        if max_in_flight == 0 {
            bail!("max_in_flight must be at least 1");
        }

        let ack_policy = match file.ack_policy {
            Some(s) => parse_ack_policy(&s)
                .ok_or_else(|| anyhow!("Invalid ack_policy '{}', expected always or on_success", s))?,
            None => cli.ack_policy,
        };

        let metrics_port = file.metrics_port.unwrap_or(cli.metrics_port);

        let analyzer_file = file.analyzer.unwrap_or_default();
        let analyzer = AnalyzerSettings {
            command: analyzer_file
                .command
                .or_else(|| cli.analyzer_command.clone())
                .ok_or_else(|| {
                    anyhow!("analyzer command must be specified via --analyzer or [analyzer] command")
                })?,
            args: analyzer_file
                .args
                .unwrap_or_else(|| cli.analyzer_args.clone()),
            timeout_secs: analyzer_file
                .timeout_secs
                .unwrap_or(cli.analyzer_timeout_secs),
        };
        if analyzer.timeout_secs == 0 {
            bail!("analyzer timeout_secs must be at least 1");
        }

        let blob_store = BlobStoreSettings {
            http_timeout_secs: file
                .blob_store
                .and_then(|b| b.http_timeout_secs)
                .unwrap_or(cli.http_timeout_secs),
        };

        // Transaction settings - merge file config with defaults
        let tx_file = file.transactions.unwrap_or_default();
        let tx_defaults = TransactionSettings::default();
        let transactions = TransactionSettings {
            max_attempts: tx_file.max_attempts.unwrap_or(tx_defaults.max_attempts),
            initial_backoff_ms: tx_file
                .initial_backoff_ms
                .unwrap_or(tx_defaults.initial_backoff_ms),
            max_backoff_ms: tx_file.max_backoff_ms.unwrap_or(tx_defaults.max_backoff_ms),
            backoff_multiplier: tx_file
                .backoff_multiplier
                .unwrap_or(tx_defaults.backoff_multiplier),
        };
        if transactions.max_attempts == 0 {
            bail!("transactions.max_attempts must be at least 1");
        }
        if transactions.backoff_multiplier < 1.0 {
            bail!("transactions.backoff_multiplier must be at least 1.0");
        }

        let transport_file = file.transport.unwrap_or_default();
        let transport_defaults = TransportSettings::default();
        let transport = TransportSettings {
            max_receive_failures: transport_file
                .max_receive_failures
                .unwrap_or(transport_defaults.max_receive_failures),
            receive_retry_ms: transport_file
                .receive_retry_ms
                .unwrap_or(transport_defaults.receive_retry_ms),
        };
        if transport.max_receive_failures == 0 {
            bail!("transport.max_receive_failures must be at least 1");
        }

        Ok(Self {
            db_path,
            scratch_dir,
            analysis_id,
            max_in_flight,
            ack_policy,
            metrics_port,
            analyzer,
            blob_store,
            transactions,
            transport,
        })
    }
}

/// Parses an ack policy string using clap's ValueEnum trait.
fn parse_ack_policy(s: &str) -> Option<AckPolicy> {
    AckPolicy::from_str(s, true).ok()
}
