//! Common test infrastructure
//!
//! Wires a real SQLite result store, local blob store and channel transport
//! around a scripted analyzer, all inside a temporary directory.

use anyhow::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use audio_analysis_worker::analyzer::{AnalysisOutput, AnalysisRequest, Analyzer};
use audio_analysis_worker::blob_store::{LocalBlobStore, ScratchSpace};
use audio_analysis_worker::result_store::{AudioRecord, Detection, ResultStore, SqliteResultStore};
use audio_analysis_worker::transport::ChannelTransport;
use audio_analysis_worker::worker::{
    AckPolicy, FlowStats, MessageLifecycleController, SubscriptionFlowController, WorkerContext,
};

pub const DEFAULT_ANALYSIS_ID: &str = "y";

/// Returns the same detections for every clip and remembers what it saw.
pub struct ScriptedAnalyzer {
    detections: Vec<Detection>,
    seen: Mutex<Vec<(String, PathBuf, Vec<u8>)>>,
}

impl ScriptedAnalyzer {
    pub fn new(detections: Vec<Detection>) -> Self {
        Self {
            detections,
            seen: Mutex::new(Vec::new()),
        }
    }

    /// `(audio_id, local_path, clip contents)` per call.
    pub fn seen(&self) -> Vec<(String, PathBuf, Vec<u8>)> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl Analyzer for ScriptedAnalyzer {
    async fn analyze(&self, request: AnalysisRequest<'_>) -> Result<AnalysisOutput> {
        let contents = tokio::fs::read(request.local_path).await?;
        self.seen.lock().unwrap().push((
            request.audio_id.to_string(),
            request.local_path.to_path_buf(),
            contents,
        ));
        Ok(AnalysisOutput {
            detections: self.detections.clone(),
            result: None,
        })
    }
}

pub struct TestWorker {
    pub dir: TempDir,
    pub store: Arc<SqliteResultStore>,
    pub transport: Arc<ChannelTransport>,
    pub ctx: WorkerContext,
}

impl TestWorker {
    pub fn new(analyzer: Arc<dyn Analyzer>) -> Self {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("clips")).unwrap();
        let store = Arc::new(SqliteResultStore::new(dir.path().join("results.db")).unwrap());
        let transport = Arc::new(ChannelTransport::new());
        let ctx = WorkerContext::new(
            store.clone(),
            Arc::new(LocalBlobStore),
            analyzer,
            transport.clone(),
            ScratchSpace::new(dir.path().join("scratch")),
            DEFAULT_ANALYSIS_ID,
        );
        Self {
            dir,
            store,
            transport,
            ctx,
        }
    }

    pub fn with_ack_policy(mut self, ack_policy: AckPolicy) -> Self {
        self.ctx = self.ctx.clone().with_ack_policy(ack_policy);
        self
    }

    pub fn scratch_dir(&self) -> PathBuf {
        self.dir.path().join("scratch")
    }

    /// Write a clip file and return its `file://` URI.
    pub fn add_clip(&self, audio_id: &str, contents: &[u8]) -> String {
        let path = self.dir.path().join("clips").join(format!("{}.wav", audio_id));
        std::fs::write(&path, contents).unwrap();
        format!("file://{}", path.display())
    }

    pub fn put_record(&self, record: AudioRecord) {
        self.store.put_audio_record(&record).unwrap();
    }

    pub fn record(&self, audio_id: &str) -> Option<AudioRecord> {
        self.store.get_audio_record(audio_id).unwrap()
    }

    /// Process every published message, then stop.
    pub async fn run_to_completion(&self, max_in_flight: usize) -> FlowStats {
        self.transport.close();
        let controller = Arc::new(MessageLifecycleController::new(self.ctx.clone()));
        SubscriptionFlowController::new(controller, max_in_flight)
            .run(CancellationToken::new())
            .await
            .unwrap()
    }
}

/// Regular files anywhere below `dir`.
pub fn files_under(dir: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let Ok(entries) = std::fs::read_dir(dir) else {
        return files;
    };
    for entry in entries {
        let path = entry.unwrap().path();
        if path.is_dir() {
            files.extend(files_under(&path));
        } else {
            files.push(path);
        }
    }
    files
}
