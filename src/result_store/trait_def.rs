//! ResultStore trait definition.

use super::models::{AudioRecord, CommitOutcome, JsonMap, RecordSnapshot, RecordUpdate};
use anyhow::Result;

/// Trait for result storage backends.
///
/// Audio records are owned by the store. Workers only read snapshots and
/// propose updates through [`crate::result_store::with_transaction`], which
/// is built on `read_snapshot` + `commit_if_unchanged`.
#[cfg_attr(feature = "mock", mockall::automock)]
pub trait ResultStore: Send + Sync {
    // =========================================================================
    // Audio records
    // =========================================================================

    /// Get the audio record for a clip, if one exists.
    fn get_audio_record(&self, audio_id: &str) -> Result<Option<AudioRecord>>;

    /// Insert or replace an audio record. Replacing bumps the record version,
    /// so transactions that read the old record will conflict.
    fn put_audio_record(&self, record: &AudioRecord) -> Result<()>;

    /// Read a record together with the version used for conditional writes.
    fn read_snapshot(&self, audio_id: &str) -> Result<Option<RecordSnapshot>>;

    /// Write `update` only if the record is still at `expected_version`.
    fn commit_if_unchanged(
        &self,
        audio_id: &str,
        expected_version: i64,
        update: &RecordUpdate,
    ) -> Result<CommitOutcome>;

    // =========================================================================
    // Per-analysis result cache
    // =========================================================================

    /// Get the cached result an analysis stored for a clip.
    ///
    /// This is a convenience side channel, never the source of truth.
    fn get_cached_analysis_result(
        &self,
        analysis_id: &str,
        audio_id: &str,
    ) -> Result<Option<JsonMap>>;

    /// Merge `result` into the cached result, field by field, last write wins.
    fn set_cached_analysis_result(
        &self,
        analysis_id: &str,
        audio_id: &str,
        result: &JsonMap,
    ) -> Result<()>;
}
