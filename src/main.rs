use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use std::{fmt::Debug, path::PathBuf};
use tokio::io::BufReader;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

// Import modules from the library crate
use audio_analysis_worker::analyzer::CommandAnalyzer;
use audio_analysis_worker::blob_store::{DefaultBlobStore, ScratchSpace};
use audio_analysis_worker::config;
use audio_analysis_worker::result_store::{SqliteResultStore, TransactionPolicy};
use audio_analysis_worker::server::{metrics, run_metrics_server};
use audio_analysis_worker::transport::LineTransport;
use audio_analysis_worker::worker::{
    AckPolicy, MessageLifecycleController, SubscriptionFlowController, WorkerContext,
};

fn parse_path(s: &str) -> Result<PathBuf, String> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(format!("Error resolving path '{}': {}", s, msg));
            }
        }
    };

    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir().map_err(|e| format!("Failed to get current dir: {}", e))?;
    Ok(cwd.join(original_path))
}

/// Reads analysis notifications from stdin, one per line, and processes them.
#[derive(Parser, Debug)]
struct CliArgs {
    /// Path to TOML configuration file. Values in the file override CLI arguments.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Path to the SQLite results database file. Created if missing.
    #[clap(long, value_parser = parse_path)]
    pub db_path: Option<PathBuf>,

    /// Directory where clips are downloaded while they are analyzed.
    #[clap(long, value_parser = parse_path, default_value = config::DEFAULT_SCRATCH_DIR)]
    pub scratch_dir: PathBuf,

    /// Analysis applied to notifications that only carry an audio id.
    #[clap(long)]
    pub analysis_id: Option<String>,

    /// Maximum number of messages processed at the same time.
    #[clap(long, default_value_t = config::DEFAULT_MAX_IN_FLIGHT)]
    pub max_in_flight: usize,

    /// When failed messages are acknowledged.
    #[clap(long, value_enum, default_value_t = AckPolicy::Always)]
    pub ack_policy: AckPolicy,

    /// The port for the metrics server (Prometheus scraping). 0 disables it.
    #[clap(long, default_value_t = config::DEFAULT_METRICS_PORT)]
    pub metrics_port: u16,

    /// Analyzer executable. It receives the downloaded clip path as its last argument.
    #[clap(long)]
    pub analyzer: Option<String>,

    /// Extra argument passed to the analyzer, can be repeated.
    #[clap(long = "analyzer-arg")]
    pub analyzer_args: Vec<String>,

    /// Timeout in seconds for a single analyzer run.
    #[clap(long, default_value_t = config::DEFAULT_ANALYZER_TIMEOUT_SECS)]
    pub analyzer_timeout_secs: u64,

    /// Timeout in seconds for HTTP clip downloads.
    #[clap(long, default_value_t = config::DEFAULT_HTTP_TIMEOUT_SECS)]
    pub http_timeout_secs: u64,
}

impl From<&CliArgs> for config::CliConfig {
    fn from(args: &CliArgs) -> Self {
        config::CliConfig {
            db_path: args.db_path.clone(),
            scratch_dir: args.scratch_dir.clone(),
            analysis_id: args.analysis_id.clone(),
            max_in_flight: args.max_in_flight,
            ack_policy: args.ack_policy,
            metrics_port: args.metrics_port,
            analyzer_command: args.analyzer.clone(),
            analyzer_args: args.analyzer_args.clone(),
            analyzer_timeout_secs: args.analyzer_timeout_secs,
            http_timeout_secs: args.http_timeout_secs,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()?;

    // Load TOML config if provided
    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading configuration from {:?}", path);
            Some(config::FileConfig::load(path)?)
        }
        None => None,
    };

    // Resolve final configuration (TOML overrides CLI)
    let cli_config = config::CliConfig::from(&cli_args);
    let app_config = config::AppConfig::resolve(&cli_config, file_config)?;

    info!("Configuration loaded:");
    info!("  db_path: {:?}", app_config.db_path);
    info!("  scratch_dir: {:?}", app_config.scratch_dir);
    info!("  analysis_id: {}", app_config.analysis_id);
    info!("  max_in_flight: {}", app_config.max_in_flight);
    info!("  ack_policy: {:?}", app_config.ack_policy);
    info!("  analyzer: {} {:?}", app_config.analyzer.command, app_config.analyzer.args);

    info!("Initializing metrics...");
    metrics::init_metrics();

    info!("Opening SQLite results database at {:?}...", app_config.db_path);
    let result_store = Arc::new(SqliteResultStore::new(&app_config.db_path)?);
    let blob_store = Arc::new(DefaultBlobStore::new(
        app_config.blob_store.http_timeout_secs,
    )?);
    let analyzer = Arc::new(CommandAnalyzer::new(
        app_config.analyzer.command.clone(),
        app_config.analyzer.args.clone(),
        Duration::from_secs(app_config.analyzer.timeout_secs),
    ));
    let transport = Arc::new(LineTransport::new(BufReader::new(tokio::io::stdin())));

    let ctx = WorkerContext::new(
        result_store,
        blob_store,
        analyzer,
        transport,
        ScratchSpace::new(&app_config.scratch_dir),
        app_config.analysis_id.clone(),
    )
    .with_transaction_policy(TransactionPolicy::new(&app_config.transactions))
    .with_ack_policy(app_config.ack_policy);

    let controller = Arc::new(MessageLifecycleController::new(ctx));
    let flow = SubscriptionFlowController::new(controller, app_config.max_in_flight)
        .with_receive_retry(
            app_config.transport.max_receive_failures,
            Duration::from_millis(app_config.transport.receive_retry_ms),
        );

    let shutdown_token = CancellationToken::new();

    if app_config.metrics_port != 0 {
        let metrics_shutdown = shutdown_token.clone();
        let metrics_port = app_config.metrics_port;
        tokio::spawn(async move {
            if let Err(e) = run_metrics_server(metrics_port, metrics_shutdown).await {
                error!("Metrics server failed: {:#}", e);
            }
        });
    }

    let signal_token = shutdown_token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, initiating graceful shutdown");
            signal_token.cancel();
        }
    });

    let result = flow.run(shutdown_token.clone()).await;
    // Stops the metrics server once the flow has drained
    shutdown_token.cancel();

    let stats = result?;
    info!(
        "Worker stopped: {} processed, {} succeeded, {} failed",
        stats.processed, stats.succeeded, stats.failed
    );
    Ok(())
}
