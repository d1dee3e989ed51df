//! External analyzer boundary.

mod command;

pub use command::{AnalyzerError, CommandAnalyzer};

use crate::result_store::{Detection, JsonMap};
use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;

/// Everything an analyzer gets to know about one clip.
#[derive(Debug, Clone, Copy)]
pub struct AnalysisRequest<'a> {
    pub audio_id: &'a str,
    pub analysis_id: &'a str,
    pub uri: &'a str,
    /// Downloaded copy of the clip.
    pub local_path: &'a Path,
}

/// What an analysis run produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnalysisOutput {
    pub detections: Vec<Detection>,
    /// Optional run summary for the per-analysis result cache.
    pub result: Option<JsonMap>,
}

/// Turns a local audio file into detections.
#[async_trait]
pub trait Analyzer: Send + Sync {
    async fn analyze(&self, request: AnalysisRequest<'_>) -> Result<AnalysisOutput>;
}
