//! SQLite schema definitions for the result database.

use crate::sqlite_column;
use crate::sqlite_persistence::{Column, SqlType, Table, VersionedSchema};

/// One row per audio clip. `version` is bumped on every write and guards
/// conditional commits.
const AUDIO_RECORDS_TABLE: Table = Table {
    name: "audio_records",
    columns: &[
        sqlite_column!("id", &SqlType::Text, is_primary_key = true),
        sqlite_column!("uri", &SqlType::Text, non_null = true),
        sqlite_column!("analyses_performed", &SqlType::Text, non_null = true), // JSON array
        sqlite_column!("detections", &SqlType::Text, non_null = true), // JSON array
        sqlite_column!("has_detections", &SqlType::Integer, non_null = true, default_value = Some("0")),
        sqlite_column!("version", &SqlType::Integer, non_null = true, default_value = Some("0")),
    ],
    indices: &[],
    unique_constraints: &[],
};

/// Per-analysis result cache.
const ANALYSIS_RESULTS_TABLE: Table = Table {
    name: "analysis_results",
    columns: &[
        sqlite_column!("analysis_id", &SqlType::Text, non_null = true),
        sqlite_column!("audio_id", &SqlType::Text, non_null = true),
        sqlite_column!("result", &SqlType::Text, non_null = true), // JSON object
        sqlite_column!("updated_at", &SqlType::Integer, non_null = true),
    ],
    indices: &[("idx_analysis_results_audio_id", "audio_id")],
    unique_constraints: &[&["analysis_id", "audio_id"]],
};

pub const RESULT_STORE_VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 0,
    tables: &[AUDIO_RECORDS_TABLE, ANALYSIS_RESULTS_TABLE],
    migration: None,
}];
