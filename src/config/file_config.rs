use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub db_path: Option<String>,
    pub scratch_dir: Option<String>,
    pub analysis_id: Option<String>,
    pub max_in_flight: Option<usize>,
    pub ack_policy: Option<String>,
    pub metrics_port: Option<u16>,

    // Component configs
    pub analyzer: Option<AnalyzerConfig>,
    pub blob_store: Option<BlobStoreConfig>,
    pub transactions: Option<TransactionsConfig>,
    pub transport: Option<TransportConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct AnalyzerConfig {
    pub command: Option<String>,
    pub args: Option<Vec<String>>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct BlobStoreConfig {
    pub http_timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct TransactionsConfig {
    pub max_attempts: Option<u32>,
    pub initial_backoff_ms: Option<u64>,
    pub max_backoff_ms: Option<u64>,
    pub backoff_multiplier: Option<f64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct TransportConfig {
    pub max_receive_failures: Option<u32>,
    pub receive_retry_ms: Option<u64>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_full_config() {
        let toml_str = r#"
            db_path = "/data/results.db"
            scratch_dir = "/var/tmp/worker"
            analysis_id = "birdnet-v2"
            max_in_flight = 4
            ack_policy = "on_success"
            metrics_port = 9100

            [analyzer]
            command = "/opt/birdnet/analyze"
            args = ["--min-conf", "0.5"]
            timeout_secs = 120

            [blob_store]
            http_timeout_secs = 30

            [transactions]
            max_attempts = 8
            initial_backoff_ms = 5
            max_backoff_ms = 200
            backoff_multiplier = 1.5

            [transport]
            max_receive_failures = 10
            receive_retry_ms = 250
        "#;

        let config: FileConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.db_path, Some("/data/results.db".to_string()));
        assert_eq!(config.scratch_dir, Some("/var/tmp/worker".to_string()));
        assert_eq!(config.analysis_id, Some("birdnet-v2".to_string()));
        assert_eq!(config.max_in_flight, Some(4));
        assert_eq!(config.ack_policy, Some("on_success".to_string()));
        assert_eq!(config.metrics_port, Some(9100));

        let analyzer = config.analyzer.unwrap();
        assert_eq!(analyzer.command, Some("/opt/birdnet/analyze".to_string()));
        assert_eq!(
            analyzer.args,
            Some(vec!["--min-conf".to_string(), "0.5".to_string()])
        );
        assert_eq!(analyzer.timeout_secs, Some(120));

        assert_eq!(config.blob_store.unwrap().http_timeout_secs, Some(30));

        let transactions = config.transactions.unwrap();
        assert_eq!(transactions.max_attempts, Some(8));
        assert_eq!(transactions.initial_backoff_ms, Some(5));
        assert_eq!(transactions.max_backoff_ms, Some(200));
        assert_eq!(transactions.backoff_multiplier, Some(1.5));

        let transport = config.transport.unwrap();
        assert_eq!(transport.max_receive_failures, Some(10));
        assert_eq!(transport.receive_retry_ms, Some(250));
    }

    #[test]
    fn test_parse_partial_config() {
        let toml_str = r#"
            analysis_id = "run"

            [analyzer]
            command = "analyze"
        "#;

        let config: FileConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.analysis_id, Some("run".to_string()));
        assert!(config.db_path.is_none());
        assert!(config.transactions.is_none());
        let analyzer = config.analyzer.unwrap();
        assert!(analyzer.args.is_none());
        assert!(analyzer.timeout_secs.is_none());
    }

    #[test]
    fn test_parse_empty_config() {
        let config: FileConfig = toml::from_str("").unwrap();
        assert!(config.db_path.is_none());
        assert!(config.analyzer.is_none());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "max_in_flight = 2").unwrap();

        let config = FileConfig::load(file.path()).unwrap();
        assert_eq!(config.max_in_flight, Some(2));
    }

    #[test]
    fn test_load_invalid_toml_fails() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "max_in_flight = [").unwrap();

        let err = FileConfig::load(file.path()).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }
}
