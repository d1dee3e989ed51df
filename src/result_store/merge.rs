//! Detection merge.
//!
//! Combines the detections already stored on an audio record with the ones a
//! new analysis run produced. The function is pure so it can be re-run on every
//! retry of the enclosing transaction.
//!
//! Rules:
//! 1. `analysis_id` is appended to the performed analyses unless already there
//!    (a redelivery or rerun, reported through `duplicate_analysis`).
//! 2. Previous detections keep their order. One that shares an id with a new
//!    detection becomes the field-wise union of both, new fields winning.
//! 3. New detections whose id was not matched are appended in submission order.
//! 4. `has_detections` is true iff the merged list is non-empty.

use super::models::{Detection, RecordUpdate};
use std::collections::{HashMap, HashSet};

/// Output of [`merge_detections`].
#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome {
    pub update: RecordUpdate,
    /// `analysis_id` was already registered on the record.
    pub duplicate_analysis: bool,
}

pub fn merge_detections(
    previous_analyses: &[String],
    previous_detections: &[Detection],
    analysis_id: &str,
    new_detections: &[Detection],
) -> MergeOutcome {
    let duplicate_analysis = previous_analyses.iter().any(|a| a == analysis_id);
    let mut analyses_performed = previous_analyses.to_vec();
    if !duplicate_analysis {
        analyses_performed.push(analysis_id.to_string());
    }

    // First occurrence wins when a submission repeats an id
    let mut incoming: HashMap<&str, &Detection> = HashMap::with_capacity(new_detections.len());
    for detection in new_detections {
        incoming.entry(detection.id.as_str()).or_insert(detection);
    }

    let mut consumed: HashSet<&str> = HashSet::with_capacity(new_detections.len());
    let mut detections = Vec::with_capacity(previous_detections.len() + new_detections.len());

    for previous in previous_detections {
        match incoming.get(previous.id.as_str()) {
            Some(&newer) => {
                detections.push(previous.merged_with(newer));
                consumed.insert(newer.id.as_str());
            }
            None => detections.push(previous.clone()),
        }
    }

    for detection in new_detections {
        if consumed.insert(detection.id.as_str()) {
            detections.push(detection.clone());
        }
    }

    let has_detections = !detections.is_empty();
    MergeOutcome {
        update: RecordUpdate {
            analyses_performed,
            detections,
            has_detections,
        },
        duplicate_analysis,
    }
}
