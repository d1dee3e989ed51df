//! In-process result store, used by tests and dry runs.

use super::models::{AudioRecord, CommitOutcome, JsonMap, RecordSnapshot, RecordUpdate};
use super::trait_def::ResultStore;
use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

#[derive(Default)]
struct Inner {
    records: HashMap<String, RecordSnapshot>,
    cache: HashMap<(String, String), JsonMap>,
}

/// Result store kept entirely in memory, with the same versioning contract
/// as the SQLite store.
#[derive(Default)]
pub struct InMemoryResultStore {
    inner: Mutex<Inner>,
}

impl InMemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn inner(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| anyhow!("In-memory result store lock poisoned"))
    }
}

impl ResultStore for InMemoryResultStore {
    fn get_audio_record(&self, audio_id: &str) -> Result<Option<AudioRecord>> {
        Ok(self
            .inner()?
            .records
            .get(audio_id)
            .map(|snapshot| snapshot.record.clone()))
    }

    fn put_audio_record(&self, record: &AudioRecord) -> Result<()> {
        let mut inner = self.inner()?;
        let version = inner
            .records
            .get(&record.id)
            .map(|existing| existing.version + 1)
            .unwrap_or(0);
        inner.records.insert(
            record.id.clone(),
            RecordSnapshot {
                record: record.clone(),
                version,
            },
        );
        Ok(())
    }

    fn read_snapshot(&self, audio_id: &str) -> Result<Option<RecordSnapshot>> {
        Ok(self.inner()?.records.get(audio_id).cloned())
    }

    fn commit_if_unchanged(
        &self,
        audio_id: &str,
        expected_version: i64,
        update: &RecordUpdate,
    ) -> Result<CommitOutcome> {
        let mut inner = self.inner()?;
        match inner.records.get_mut(audio_id) {
            Some(snapshot) if snapshot.version == expected_version => {
                snapshot.record.apply(update);
                snapshot.version += 1;
                Ok(CommitOutcome::Committed)
            }
            _ => Ok(CommitOutcome::Conflict),
        }
    }

    fn get_cached_analysis_result(
        &self,
        analysis_id: &str,
        audio_id: &str,
    ) -> Result<Option<JsonMap>> {
        Ok(self
            .inner()?
            .cache
            .get(&(analysis_id.to_string(), audio_id.to_string()))
            .cloned())
    }

    fn set_cached_analysis_result(
        &self,
        analysis_id: &str,
        audio_id: &str,
        result: &JsonMap,
    ) -> Result<()> {
        let mut inner = self.inner()?;
        let entry = inner
            .cache
            .entry((analysis_id.to_string(), audio_id.to_string()))
            .or_default();
        for (key, value) in result {
            entry.insert(key.clone(), value.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result_store::Detection;
    use serde_json::json;

    #[test]
    fn test_versioning_matches_contract() {
        let store = InMemoryResultStore::new();
        store
            .put_audio_record(&AudioRecord::new("a1", "file:///a1.mp3"))
            .unwrap();
        let snapshot = store.read_snapshot("a1").unwrap().unwrap();
        assert_eq!(snapshot.version, 0);

        let update = RecordUpdate {
            analyses_performed: vec!["run".to_string()],
            detections: vec![Detection::new("d1")],
            has_detections: true,
        };
        assert_eq!(
            store.commit_if_unchanged("a1", 0, &update).unwrap(),
            CommitOutcome::Committed
        );
        assert_eq!(
            store.commit_if_unchanged("a1", 0, &update).unwrap(),
            CommitOutcome::Conflict
        );
        assert_eq!(
            store.commit_if_unchanged("missing", 0, &update).unwrap(),
            CommitOutcome::Conflict
        );

        let after = store.read_snapshot("a1").unwrap().unwrap();
        assert_eq!(after.version, 1);
        assert_eq!(after.record.detections.len(), 1);
    }

    #[test]
    fn test_cache_merges_fields() {
        let store = InMemoryResultStore::new();
        let first = json!({"a": 1}).as_object().unwrap().clone();
        let second = json!({"a": 2, "b": 3}).as_object().unwrap().clone();

        store.set_cached_analysis_result("run", "a1", &first).unwrap();
        store.set_cached_analysis_result("run", "a1", &second).unwrap();

        assert_eq!(
            store.get_cached_analysis_result("run", "a1").unwrap(),
            Some(second)
        );
    }
}
