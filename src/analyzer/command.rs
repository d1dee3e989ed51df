//! Analyzer backed by an external program.

use super::{AnalysisOutput, AnalysisRequest, Analyzer};
use crate::result_store::{Detection, JsonMap};
use async_trait::async_trait;
use serde::Deserialize;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

/// Errors that can occur while running the analyzer program.
#[derive(Debug, Error)]
pub enum AnalyzerError {
    #[error("Failed to start analyzer {0}: {1}")]
    Spawn(String, #[source] std::io::Error),

    #[error("Analyzer timed out after {0:?}")]
    Timeout(Duration),

    #[error("Analyzer exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },

    #[error("Invalid analyzer output: {0}")]
    InvalidOutput(String),
}

/// Accepted stdout shapes.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum AnalyzerStdout {
    Detections(Vec<Detection>),
    Full {
        detections: Vec<Detection>,
        #[serde(default)]
        result: Option<JsonMap>,
    },
}

impl From<AnalyzerStdout> for AnalysisOutput {
    fn from(stdout: AnalyzerStdout) -> Self {
        match stdout {
            AnalyzerStdout::Detections(detections) => AnalysisOutput {
                detections,
                result: None,
            },
            AnalyzerStdout::Full { detections, result } => AnalysisOutput { detections, result },
        }
    }
}

/// Runs `command args... <local path>` and reads detections from its stdout.
///
/// The child also gets `AUDIO_ID`, `ANALYSIS_ID` and `AUDIO_URI` in its
/// environment. It is killed if it outlives the timeout.
#[derive(Debug, Clone)]
pub struct CommandAnalyzer {
    command: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandAnalyzer {
    pub fn new(command: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            args,
            timeout,
        }
    }

    pub async fn run(&self, request: AnalysisRequest<'_>) -> Result<AnalysisOutput, AnalyzerError> {
        let child = Command::new(&self.command)
            .args(&self.args)
            .arg(request.local_path)
            .env("AUDIO_ID", request.audio_id)
            .env("ANALYSIS_ID", request.analysis_id)
            .env("AUDIO_URI", request.uri)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AnalyzerError::Spawn(self.command.clone(), e))?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| AnalyzerError::Timeout(self.timeout))?
            .map_err(|e| AnalyzerError::Spawn(self.command.clone(), e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AnalyzerError::Failed {
                status: output.status.to_string(),
                stderr: stderr.trim().to_string(),
            });
        }

        let stdout: AnalyzerStdout = serde_json::from_slice(&output.stdout)
            .map_err(|e| AnalyzerError::InvalidOutput(format!("JSON parse error: {}", e)))?;
        let output = AnalysisOutput::from(stdout);
        debug!(
            "Analyzer returned {} detections for {}",
            output.detections.len(),
            request.audio_id
        );
        Ok(output)
    }
}

#[async_trait]
impl Analyzer for CommandAnalyzer {
    async fn analyze(&self, request: AnalysisRequest<'_>) -> anyhow::Result<AnalysisOutput> {
        Ok(self.run(request).await?)
    }
}
