//! SQLite-backed result store implementation.

use super::models::{AudioRecord, CommitOutcome, Detection, JsonMap, RecordSnapshot, RecordUpdate};
use super::schema::RESULT_STORE_VERSIONED_SCHEMAS;
use super::trait_def::ResultStore;
use crate::sqlite_persistence::migrate_if_needed;
use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::info;

/// SQLite-backed result store.
///
/// A single connection serializes statements; conditional commits guard the
/// read-modify-write cycles that span several statements.
#[derive(Clone)]
pub struct SqliteResultStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteResultStore {
    /// Open (or create) the result database at `db_path`.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_path_ref = db_path.as_ref();

        let mut conn = Connection::open_with_flags(
            db_path_ref,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI
                | rusqlite::OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .with_context(|| format!("Failed to open result database {:?}", db_path_ref))?;

        migrate_if_needed(&mut conn, RESULT_STORE_VERSIONED_SCHEMAS)?;

        conn.pragma_update(None, "journal_mode", "WAL")
            .context("Failed to set WAL mode on result database")?;

        let (records, analyzed) = Self::count_rows(&conn)?;
        info!(
            "Result store ready: {} audio records, {} with at least one analysis",
            records, analyzed
        );

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn count_rows(conn: &Connection) -> Result<(usize, usize)> {
        let records: usize =
            conn.query_row("SELECT COUNT(*) FROM audio_records", [], |r| r.get(0))?;
        let analyzed: usize = conn.query_row(
            "SELECT COUNT(*) FROM audio_records WHERE analyses_performed != '[]'",
            [],
            |r| r.get(0),
        )?;
        Ok((records, analyzed))
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("Result database connection lock poisoned"))
    }
}

/// Raw `audio_records` row, JSON columns still encoded.
struct RecordRow {
    id: String,
    uri: String,
    analyses_performed: String,
    detections: String,
    has_detections: bool,
    version: i64,
}

impl RecordRow {
    fn decode(self) -> Result<RecordSnapshot> {
        let analyses_performed: Vec<String> = serde_json::from_str(&self.analyses_performed)
            .with_context(|| format!("Malformed analyses_performed for {}", self.id))?;
        let detections: Vec<Detection> = serde_json::from_str(&self.detections)
            .with_context(|| format!("Malformed detections for {}", self.id))?;
        Ok(RecordSnapshot {
            record: AudioRecord {
                id: self.id,
                uri: self.uri,
                analyses_performed,
                detections,
                has_detections: self.has_detections,
            },
            version: self.version,
        })
    }
}

impl ResultStore for SqliteResultStore {
    fn get_audio_record(&self, audio_id: &str) -> Result<Option<AudioRecord>> {
        Ok(self.read_snapshot(audio_id)?.map(|snapshot| snapshot.record))
    }

    fn put_audio_record(&self, record: &AudioRecord) -> Result<()> {
        let analyses_performed = serde_json::to_string(&record.analyses_performed)?;
        let detections = serde_json::to_string(&record.detections)?;

        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO audio_records
             (id, uri, analyses_performed, detections, has_detections, version)
             VALUES (?1, ?2, ?3, ?4, ?5, 0)
             ON CONFLICT(id) DO UPDATE SET
                uri = excluded.uri,
                analyses_performed = excluded.analyses_performed,
                detections = excluded.detections,
                has_detections = excluded.has_detections,
                version = audio_records.version + 1",
            params![
                record.id,
                record.uri,
                analyses_performed,
                detections,
                record.has_detections,
            ],
        )?;
        Ok(())
    }

    fn read_snapshot(&self, audio_id: &str) -> Result<Option<RecordSnapshot>> {
        let row = {
            let conn = self.conn()?;
            let mut stmt = conn.prepare_cached(
                "SELECT id, uri, analyses_performed, detections, has_detections, version
                 FROM audio_records WHERE id = ?1",
            )?;
            let row = stmt
                .query_row(params![audio_id], |row| {
                    Ok(RecordRow {
                        id: row.get(0)?,
                        uri: row.get(1)?,
                        analyses_performed: row.get(2)?,
                        detections: row.get(3)?,
                        has_detections: row.get(4)?,
                        version: row.get(5)?,
                    })
                })
                .optional()?;
            row
        };
        row.map(RecordRow::decode).transpose()
    }

    fn commit_if_unchanged(
        &self,
        audio_id: &str,
        expected_version: i64,
        update: &RecordUpdate,
    ) -> Result<CommitOutcome> {
        let analyses_performed = serde_json::to_string(&update.analyses_performed)?;
        let detections = serde_json::to_string(&update.detections)?;

        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE audio_records
             SET analyses_performed = ?1, detections = ?2, has_detections = ?3,
                 version = version + 1
             WHERE id = ?4 AND version = ?5",
            params![
                analyses_performed,
                detections,
                update.has_detections,
                audio_id,
                expected_version,
            ],
        )?;

        Ok(if changed == 1 {
            CommitOutcome::Committed
        } else {
            CommitOutcome::Conflict
        })
    }

    fn get_cached_analysis_result(
        &self,
        analysis_id: &str,
        audio_id: &str,
    ) -> Result<Option<JsonMap>> {
        let conn = self.conn()?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT result FROM analysis_results WHERE analysis_id = ?1 AND audio_id = ?2",
                params![analysis_id, audio_id],
                |row| row.get(0),
            )
            .optional()?;
        raw.map(|json| {
            serde_json::from_str(&json).with_context(|| {
                format!("Malformed cached result for {}/{}", analysis_id, audio_id)
            })
        })
        .transpose()
    }

    fn set_cached_analysis_result(
        &self,
        analysis_id: &str,
        audio_id: &str,
        result: &JsonMap,
    ) -> Result<()> {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;

        let existing: Option<String> = tx
            .query_row(
                "SELECT result FROM analysis_results WHERE analysis_id = ?1 AND audio_id = ?2",
                params![analysis_id, audio_id],
                |row| row.get(0),
            )
            .optional()?;

        // Malformed cache entries are overwritten rather than failing the write
        let mut merged: JsonMap = existing
            .and_then(|json| serde_json::from_str(&json).ok())
            .unwrap_or_default();
        for (key, value) in result {
            merged.insert(key.clone(), value.clone());
        }

        tx.execute(
            "INSERT INTO analysis_results (analysis_id, audio_id, result, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(analysis_id, audio_id) DO UPDATE SET
                result = excluded.result,
                updated_at = excluded.updated_at",
            params![
                analysis_id,
                audio_id,
                serde_json::to_string(&merged)?,
                chrono::Utc::now().timestamp(),
            ],
        )?;
        tx.commit()?;
        Ok(())
    }
}
