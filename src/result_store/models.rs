//! Data models for the result store.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Free-form JSON object, used for detection payloads and cached results.
pub type JsonMap = Map<String, Value>;

/// One finding produced by one analysis run.
///
/// Only `id` is interpreted: it is the merge key across runs. Every other field
/// is carried through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub id: String,
    #[serde(flatten)]
    pub fields: JsonMap,
}

impl Detection {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            fields: JsonMap::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Field-wise union of `self` and `newer`; fields of `newer` win.
    pub fn merged_with(&self, newer: &Detection) -> Detection {
        let mut merged = self.clone();
        for (key, value) in &newer.fields {
            merged.fields.insert(key.clone(), value.clone());
        }
        merged
    }
}

/// Catalog entry for one audio clip.
///
/// Field names follow the document layout used by the upstream catalog
/// (`analysesPerformed`, `hasDetections`), so records can be imported as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioRecord {
    pub id: String,
    pub uri: String,
    #[serde(default)]
    pub analyses_performed: Vec<String>,
    #[serde(default)]
    pub detections: Vec<Detection>,
    #[serde(default)]
    pub has_detections: bool,
}

impl AudioRecord {
    pub fn new(id: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            uri: uri.into(),
            analyses_performed: Vec::new(),
            detections: Vec::new(),
            has_detections: false,
        }
    }

    pub fn apply(&mut self, update: &RecordUpdate) {
        self.analyses_performed = update.analyses_performed.clone();
        self.detections = update.detections.clone();
        self.has_detections = update.has_detections;
    }
}

/// A record read inside a transaction, tagged with the version it was read at.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordSnapshot {
    pub record: AudioRecord,
    pub version: i64,
}

/// The fields a detection submission is allowed to write.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordUpdate {
    pub analyses_performed: Vec<String>,
    pub detections: Vec<Detection>,
    pub has_detections: bool,
}

/// Result of a conditional write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed,
    /// The record changed since the snapshot was read.
    Conflict,
}
