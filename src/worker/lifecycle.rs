//! Message lifecycle.
//!
//! One controller run takes a delivery through
//! `Received -> MetadataFetched -> BlobDownloaded -> Analyzed -> Submitted`
//! and then always cleans up: the scratch file is deleted if one was created
//! and the delivery is settled exactly once. A failure at any stage, including
//! a panic in a collaborator, turns the run into `Aborted` but never skips the
//! cleanup.

use super::{LifecycleError, WorkerContext};
use crate::analyzer::AnalysisRequest;
use crate::result_store::{merge_detections_in_transaction, JsonMap, MergeReport};
use crate::server::metrics;
use crate::transport::{decode_payload, AnalysisMessage, Delivery};
use anyhow::Context;
use clap::ValueEnum;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// How deliveries are settled once their lifecycle ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum AckPolicy {
    /// Acknowledge every delivery, whatever the outcome.
    #[default]
    Always,
    /// Nack retriable failures so the transport can redeliver them.
    /// Undecodable messages and missing records are still acknowledged.
    #[value(name = "on_success", alias = "on-success")]
    OnSuccess,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Received,
    MetadataFetched,
    BlobDownloaded,
    Analyzed,
    Submitted,
    CleanedUp,
    Aborted,
}

impl LifecycleState {
    pub fn is_terminal(self) -> bool {
        matches!(self, LifecycleState::CleanedUp | LifecycleState::Aborted)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Acknowledged,
    Nacked,
    /// The transport rejected the settlement call.
    Failed,
}

impl Settlement {
    pub fn as_str(self) -> &'static str {
        match self {
            Settlement::Acknowledged => "acknowledged",
            Settlement::Nacked => "nacked",
            Settlement::Failed => "failed",
        }
    }
}

/// Everything known about a finished lifecycle.
#[derive(Debug)]
pub struct LifecycleOutcome {
    pub message_id: String,
    /// `None` when the payload could not be decoded.
    pub message: Option<AnalysisMessage>,
    /// Last stage completed before cleanup.
    pub reached: LifecycleState,
    /// `CleanedUp` on success, `Aborted` otherwise.
    pub final_state: LifecycleState,
    pub report: Option<MergeReport>,
    pub error: Option<LifecycleError>,
    pub settlement: Settlement,
    pub elapsed: Duration,
}

impl LifecycleOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Metric label: `success` or the error kind.
    pub fn outcome_label(&self) -> &'static str {
        self.error.as_ref().map_or("success", LifecycleError::kind)
    }
}

/// Mutable progress of one run, readable after the stages stop.
struct Progress {
    state: LifecycleState,
    message: Option<AnalysisMessage>,
    blob: Option<PathBuf>,
}

pub struct MessageLifecycleController {
    ctx: WorkerContext,
}

impl MessageLifecycleController {
    pub fn new(ctx: WorkerContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &WorkerContext {
        &self.ctx
    }

    /// Drive one delivery to a terminal state.
    pub async fn process(&self, delivery: Delivery) -> LifecycleOutcome {
        let start = Instant::now();
        let message_id = delivery.message_id().to_string();
        let mut progress = Progress {
            state: LifecycleState::Received,
            message: None,
            blob: None,
        };
        debug!(
            "Received message {} (attempt {})",
            message_id,
            delivery.attempt()
        );

        let staged = AssertUnwindSafe(self.run_stages(&delivery, Uuid::new_v4(), &mut progress))
            .catch_unwind()
            .await;
        let (report, error) = match staged {
            Ok(Ok(report)) => (Some(report), None),
            Ok(Err(e)) => (None, Some(e)),
            Err(panic) => (None, Some(LifecycleError::Panicked(panic_message(&*panic)))),
        };

        // Cleanup always runs from here on
        if let Some(path) = progress.blob.take() {
            self.release_blob(path).await;
        }
        let settlement = self.settle(delivery, error.as_ref()).await;

        let outcome = LifecycleOutcome {
            message_id,
            message: progress.message,
            reached: progress.state,
            final_state: if error.is_none() {
                LifecycleState::CleanedUp
            } else {
                LifecycleState::Aborted
            },
            report,
            error,
            settlement,
            elapsed: start.elapsed(),
        };
        log_outcome(&outcome);
        metrics::record_message(outcome.outcome_label(), outcome.elapsed);
        metrics::record_settlement(outcome.settlement.as_str());
        outcome
    }

    async fn run_stages(
        &self,
        delivery: &Delivery,
        lifecycle_id: Uuid,
        progress: &mut Progress,
    ) -> Result<MergeReport, LifecycleError> {
        let message = decode_payload(delivery.payload(), &self.ctx.default_analysis_id)?;
        info!(
            "Starting analysis {} of audio {} (message {}, attempt {})",
            message.analysis_id,
            message.audio_id,
            delivery.message_id(),
            delivery.attempt()
        );
        progress.message = Some(message.clone());
        let AnalysisMessage {
            audio_id,
            analysis_id,
        } = message;

        let record = {
            let store = Arc::clone(&self.ctx.result_store);
            let audio_id = audio_id.clone();
            run_blocking(move || store.get_audio_record(&audio_id))
                .await
                .map_err(LifecycleError::Store)?
        }
        .ok_or_else(|| LifecycleError::RecordNotFound(audio_id.clone()))?;
        progress.state = LifecycleState::MetadataFetched;

        let local_path =
            self.ctx
                .scratch
                .path_for(&analysis_id, &audio_id, &record.uri, lifecycle_id);
        // Registered before the transfer so partial files are removed too
        progress.blob = Some(local_path.clone());
        let bytes = self
            .ctx
            .blob_store
            .download(&record.uri, &local_path)
            .await
            .map_err(LifecycleError::Transfer)?;
        debug!(
            "Downloaded {} bytes of {} to {:?}",
            bytes, audio_id, local_path
        );
        progress.state = LifecycleState::BlobDownloaded;

        let output = self
            .ctx
            .analyzer
            .analyze(AnalysisRequest {
                audio_id: &audio_id,
                analysis_id: &analysis_id,
                uri: &record.uri,
                local_path: &local_path,
            })
            .await
            .map_err(LifecycleError::Analysis)?;
        progress.state = LifecycleState::Analyzed;

        let report = {
            let store = Arc::clone(&self.ctx.result_store);
            let policy = self.ctx.transaction_policy.clone();
            let audio_id = audio_id.clone();
            let analysis_id = analysis_id.clone();
            let detections = output.detections;
            run_blocking(move || {
                Ok(merge_detections_in_transaction(
                    store.as_ref(),
                    &policy,
                    &audio_id,
                    &analysis_id,
                    &detections,
                )?)
            })
            .await
            .map_err(LifecycleError::Submission)?
        };
        progress.state = LifecycleState::Submitted;

        if let Some(result) = output.result {
            self.cache_result(&analysis_id, &audio_id, result).await;
        }

        Ok(report)
    }

    /// Best effort: the cache is never the source of truth.
    async fn cache_result(&self, analysis_id: &str, audio_id: &str, result: JsonMap) {
        let store = Arc::clone(&self.ctx.result_store);
        let (analysis, audio) = (analysis_id.to_string(), audio_id.to_string());
        let cached =
            run_blocking(move || store.set_cached_analysis_result(&analysis, &audio, &result))
                .await;
        if let Err(e) = cached {
            warn!(
                "Failed to cache result of {} for {}: {:#}",
                analysis_id, audio_id, e
            );
        }
    }

    async fn release_blob(&self, path: PathBuf) {
        let deleted = AssertUnwindSafe(self.ctx.blob_store.delete(&path))
            .catch_unwind()
            .await;
        match deleted {
            Ok(Ok(())) => debug!("Deleted scratch file {:?}", path),
            Ok(Err(e)) => warn!("Failed to delete scratch file {:?}: {:#}", path, e),
            Err(panic) => warn!(
                "Deleting scratch file {:?} panicked: {}",
                path,
                panic_message(&*panic)
            ),
        }
    }

    async fn settle(&self, delivery: Delivery, error: Option<&LifecycleError>) -> Settlement {
        let nack = match (self.ctx.ack_policy, error) {
            (AckPolicy::OnSuccess, Some(e)) => e.is_retriable(),
            _ => false,
        };
        let message_id = delivery.message_id().to_string();

        let (settlement, result) = if nack {
            (Settlement::Nacked, self.ctx.transport.nack(delivery).await)
        } else {
            (
                Settlement::Acknowledged,
                self.ctx.transport.acknowledge(delivery).await,
            )
        };

        match result {
            Ok(()) => settlement,
            Err(e) => {
                error!(
                    "Failed to settle message {} as {}: {:#}",
                    message_id,
                    settlement.as_str(),
                    e
                );
                Settlement::Failed
            }
        }
    }
}

/// Run blocking store work off the async runtime.
async fn run_blocking<T, F>(f: F) -> anyhow::Result<T>
where
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .context("Blocking store task failed")?
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

fn log_outcome(outcome: &LifecycleOutcome) {
    let (audio_id, analysis_id) = outcome
        .message
        .as_ref()
        .map_or(("?", "?"), |m| (m.audio_id.as_str(), m.analysis_id.as_str()));

    match &outcome.error {
        None => info!(
            "Finished analysis {} of audio {} as {:?} in {:?} ({} detections, {})",
            analysis_id,
            audio_id,
            outcome.final_state,
            outcome.elapsed,
            outcome.report.as_ref().map_or(0, |r| r.total_detections),
            outcome.settlement.as_str()
        ),
        Some(e) => error!(
            "Analysis {} of audio {} ended as {:?} after {:?} at {:?} [{}]: {} ({})",
            analysis_id,
            audio_id,
            outcome.final_state,
            outcome.elapsed,
            outcome.reached,
            e.kind(),
            e,
            outcome.settlement.as_str()
        ),
    }
}
