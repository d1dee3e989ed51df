//! Fakes shared by the worker tests.

use crate::analyzer::{AnalysisOutput, AnalysisRequest, Analyzer};
use crate::blob_store::{BlobStore, ScratchSpace};
use crate::result_store::{
    AudioRecord, CommitOutcome, Detection, InMemoryResultStore, JsonMap, RecordSnapshot,
    RecordUpdate, ResultStore,
};
use crate::transport::{ChannelTransport, Delivery, FatalTransportError, NotificationTransport};
use crate::worker::WorkerContext;
use anyhow::{bail, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// Writes a small file instead of transferring anything.
#[derive(Default)]
pub struct FakeBlobStore {
    pub fail: bool,
    pub downloads: Mutex<Vec<PathBuf>>,
    pub deletes: Mutex<Vec<PathBuf>>,
}

impl FakeBlobStore {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn downloads(&self) -> Vec<PathBuf> {
        self.downloads.lock().unwrap().clone()
    }

    pub fn deletes(&self) -> Vec<PathBuf> {
        self.deletes.lock().unwrap().clone()
    }
}

#[async_trait]
impl BlobStore for FakeBlobStore {
    async fn download(&self, _uri: &str, dest: &Path) -> Result<u64> {
        self.downloads.lock().unwrap().push(dest.to_path_buf());
        tokio::fs::create_dir_all(dest.parent().unwrap()).await?;
        if self.fail {
            // Leave a partial file behind like an interrupted transfer
            tokio::fs::write(dest, b"par").await?;
            bail!("connection reset");
        }
        tokio::fs::write(dest, b"audio").await?;
        Ok(5)
    }

    async fn delete(&self, path: &Path) -> Result<()> {
        self.deletes.lock().unwrap().push(path.to_path_buf());
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

pub enum AnalyzerBehavior {
    Detect(Vec<Detection>, Option<JsonMap>),
    Fail,
    Panic,
}

/// Analyzer with scripted behavior that tracks concurrency.
pub struct FakeAnalyzer {
    pub behavior: AnalyzerBehavior,
    pub delay: Duration,
    pub calls: AtomicUsize,
    pub active: AtomicUsize,
    pub max_active: AtomicUsize,
    pub saw_local_file: AtomicBool,
}

impl FakeAnalyzer {
    pub fn new(behavior: AnalyzerBehavior) -> Self {
        Self {
            behavior,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            saw_local_file: AtomicBool::new(false),
        }
    }

    pub fn detecting(detections: Vec<Detection>) -> Self {
        Self::new(AnalyzerBehavior::Detect(detections, None))
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl Analyzer for FakeAnalyzer {
    async fn analyze(&self, request: AnalysisRequest<'_>) -> Result<AnalysisOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);
        if request.local_path.exists() {
            self.saw_local_file.store(true, Ordering::SeqCst);
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        match &self.behavior {
            AnalyzerBehavior::Detect(detections, result) => Ok(AnalysisOutput {
                detections: detections.clone(),
                result: result.clone(),
            }),
            AnalyzerBehavior::Fail => bail!("model exited with status 1"),
            AnalyzerBehavior::Panic => panic!("analyzer crashed"),
        }
    }
}

/// In-memory store with injectable write failures.
#[derive(Default)]
pub struct FlakyStore {
    pub inner: InMemoryResultStore,
    pub fail_commits: bool,
    pub fail_cache: bool,
}

impl ResultStore for FlakyStore {
    fn get_audio_record(&self, audio_id: &str) -> Result<Option<AudioRecord>> {
        self.inner.get_audio_record(audio_id)
    }

    fn put_audio_record(&self, record: &AudioRecord) -> Result<()> {
        self.inner.put_audio_record(record)
    }

    fn read_snapshot(&self, audio_id: &str) -> Result<Option<RecordSnapshot>> {
        self.inner.read_snapshot(audio_id)
    }

    fn commit_if_unchanged(
        &self,
        audio_id: &str,
        expected_version: i64,
        update: &RecordUpdate,
    ) -> Result<CommitOutcome> {
        if self.fail_commits {
            bail!("database is locked");
        }
        self.inner
            .commit_if_unchanged(audio_id, expected_version, update)
    }

    fn get_cached_analysis_result(
        &self,
        analysis_id: &str,
        audio_id: &str,
    ) -> Result<Option<JsonMap>> {
        self.inner.get_cached_analysis_result(analysis_id, audio_id)
    }

    fn set_cached_analysis_result(
        &self,
        analysis_id: &str,
        audio_id: &str,
        result: &JsonMap,
    ) -> Result<()> {
        if self.fail_cache {
            bail!("cache unavailable");
        }
        self.inner
            .set_cached_analysis_result(analysis_id, audio_id, result)
    }
}

/// When a [`TrackingTransport`] stops delivering.
pub struct TransportFailure {
    /// Receive calls that still reach the channel.
    pub after: usize,
    pub fatal: bool,
}

/// Wraps the harness channel to count deliveries that were handed out but not
/// settled yet, and optionally to start failing.
pub struct TrackingTransport {
    pub inner: Arc<ChannelTransport>,
    pub failure: Option<TransportFailure>,
    pub receives: AtomicUsize,
    pub outstanding: AtomicUsize,
    pub max_outstanding: AtomicUsize,
}

impl TrackingTransport {
    fn settled(&self) {
        self.outstanding.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl NotificationTransport for TrackingTransport {
    async fn receive(&self) -> Result<Option<Delivery>> {
        let call = self.receives.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(failure) = &self.failure {
            if call > failure.after {
                if failure.fatal {
                    return Err(FatalTransportError("subscription deleted".to_string()).into());
                }
                bail!("subscription unavailable");
            }
        }
        let delivery = self.inner.receive().await?;
        if delivery.is_some() {
            let outstanding = self.outstanding.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_outstanding.fetch_max(outstanding, Ordering::SeqCst);
        }
        Ok(delivery)
    }

    async fn acknowledge(&self, delivery: Delivery) -> Result<()> {
        self.settled();
        self.inner.acknowledge(delivery).await
    }

    async fn nack(&self, delivery: Delivery) -> Result<()> {
        self.settled();
        self.inner.nack(delivery).await
    }
}

pub struct Harness {
    pub ctx: WorkerContext,
    pub transport: Arc<ChannelTransport>,
    pub blob_store: Arc<FakeBlobStore>,
    pub analyzer: Arc<FakeAnalyzer>,
    pub scratch_dir: TempDir,
}

pub fn harness(
    store: Arc<dyn ResultStore>,
    blob_store: FakeBlobStore,
    analyzer: FakeAnalyzer,
) -> Harness {
    let scratch_dir = TempDir::new().unwrap();
    let transport = Arc::new(ChannelTransport::new());
    let blob_store = Arc::new(blob_store);
    let analyzer = Arc::new(analyzer);
    let ctx = WorkerContext::new(
        store,
        blob_store.clone(),
        analyzer.clone(),
        transport.clone(),
        ScratchSpace::new(scratch_dir.path()),
        "birdnet",
    );
    Harness {
        ctx,
        transport,
        blob_store,
        analyzer,
        scratch_dir,
    }
}

impl Harness {
    /// Route the context through a [`TrackingTransport`] over the same channel.
    pub fn track_transport(&mut self, failure: Option<TransportFailure>) -> Arc<TrackingTransport> {
        let tracking = Arc::new(TrackingTransport {
            inner: self.transport.clone(),
            failure,
            receives: AtomicUsize::new(0),
            outstanding: AtomicUsize::new(0),
            max_outstanding: AtomicUsize::new(0),
        });
        self.ctx.transport = tracking.clone();
        tracking
    }
}

pub fn store_with_records(ids: &[&str]) -> Arc<InMemoryResultStore> {
    let store = InMemoryResultStore::new();
    for id in ids {
        store
            .put_audio_record(&AudioRecord::new(*id, format!("file:///clips/{}.mp3", id)))
            .unwrap();
    }
    Arc::new(store)
}
