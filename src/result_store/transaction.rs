//! Optimistic read-modify-write transactions over a [`ResultStore`].
//!
//! A transaction reads a snapshot, computes an update from it and writes the
//! update only if the record did not change in between. On conflict the whole
//! sequence is retried from the read, with exponential backoff between attempts.
//!
//! All functions here block (store calls and backoff sleeps); async callers run
//! them on the blocking pool.

use super::merge::merge_detections;
use super::models::{AudioRecord, CommitOutcome, Detection, RecordUpdate};
use super::trait_def::ResultStore;
use crate::config::TransactionSettings;
use crate::server::metrics;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors that can end a transaction.
#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("Audio record not found: {0}")]
    RecordNotFound(String),

    #[error("Gave up on {audio_id} after {attempts} conflicting attempts")]
    ConflictRetriesExhausted { audio_id: String, attempts: u32 },

    #[error("Store error: {0}")]
    Store(#[from] anyhow::Error),
}

/// Retry policy for conflicting transactions.
#[derive(Debug, Clone)]
pub struct TransactionPolicy {
    /// Total number of read-modify-write attempts, including the first one.
    pub max_attempts: u32,
    /// Backoff after the first conflict, in milliseconds.
    pub initial_backoff_ms: u64,
    /// Cap for exponential growth, in milliseconds.
    pub max_backoff_ms: u64,
    /// Multiplier applied to backoff after each conflict.
    pub backoff_multiplier: f64,
}

impl TransactionPolicy {
    pub fn new(settings: &TransactionSettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            initial_backoff_ms: settings.initial_backoff_ms,
            max_backoff_ms: settings.max_backoff_ms,
            backoff_multiplier: settings.backoff_multiplier,
        }
    }

    /// Backoff to wait after the given (zero-based) conflicting attempt.
    ///
    /// `initial_backoff * multiplier^attempt`, capped at `max_backoff_ms`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let backoff = self.initial_backoff_ms as f64 * self.backoff_multiplier.powi(attempt as i32);
        Duration::from_millis(backoff.min(self.max_backoff_ms as f64) as u64)
    }
}

impl Default for TransactionPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 10,
            max_backoff_ms: 1000,
            backoff_multiplier: 2.0,
        }
    }
}

/// Run `body` as an atomic read-modify-write on one audio record.
///
/// `body` receives the current record and returns the update to write plus a
/// value handed back to the caller once the write commits. It may run several
/// times and must not have side effects.
pub fn with_transaction<T, F>(
    store: &dyn ResultStore,
    audio_id: &str,
    policy: &TransactionPolicy,
    mut body: F,
) -> Result<T, TransactionError>
where
    F: FnMut(&AudioRecord) -> (RecordUpdate, T),
{
    let max_attempts = policy.max_attempts.max(1);
    for attempt in 0..max_attempts {
        let snapshot = store
            .read_snapshot(audio_id)?
            .ok_or_else(|| TransactionError::RecordNotFound(audio_id.to_string()))?;

        let (update, value) = body(&snapshot.record);

        match store.commit_if_unchanged(audio_id, snapshot.version, &update)? {
            CommitOutcome::Committed => return Ok(value),
            CommitOutcome::Conflict => {
                metrics::record_transaction_conflict();
                debug!(
                    "Write conflict on {} (attempt {}/{}, read version {})",
                    audio_id,
                    attempt + 1,
                    max_attempts,
                    snapshot.version
                );
                if attempt + 1 < max_attempts {
                    std::thread::sleep(policy.backoff(attempt));
                }
            }
        }
    }

    Err(TransactionError::ConflictRetriesExhausted {
        audio_id: audio_id.to_string(),
        attempts: max_attempts,
    })
}

/// Summary of a committed detection submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeReport {
    /// Number of detections stored on the record after the merge.
    pub total_detections: usize,
    /// The analysis had already been registered on the record.
    pub duplicate_analysis: bool,
}

/// Merge `detections` from `analysis_id` into the record of `audio_id` and
/// register the analysis as performed, atomically.
pub fn merge_detections_in_transaction(
    store: &dyn ResultStore,
    policy: &TransactionPolicy,
    audio_id: &str,
    analysis_id: &str,
    detections: &[Detection],
) -> Result<MergeReport, TransactionError> {
    let report = with_transaction(store, audio_id, policy, |record| {
        let outcome = merge_detections(
            &record.analyses_performed,
            &record.detections,
            analysis_id,
            detections,
        );
        let report = MergeReport {
            total_detections: outcome.update.detections.len(),
            duplicate_analysis: outcome.duplicate_analysis,
        };
        (outcome.update, report)
    })?;

    if report.duplicate_analysis {
        metrics::record_duplicate_analysis();
        warn!(
            "Analysis {} was already completed for {}, merged idempotently",
            analysis_id, audio_id
        );
    }

    Ok(report)
}
