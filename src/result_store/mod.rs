//! Result storage.
//!
//! Holds the audio catalog records that analyses write detections into, plus a
//! per-analysis result cache. Detection submissions go through optimistic
//! transactions so that concurrent workers never lose each other's writes.

mod memory_store;
mod merge;
mod models;
mod schema;
mod sqlite_store;
mod trait_def;
mod transaction;

pub use memory_store::InMemoryResultStore;
pub use merge::{merge_detections, MergeOutcome};
pub use models::{AudioRecord, CommitOutcome, Detection, JsonMap, RecordSnapshot, RecordUpdate};
pub use sqlite_store::SqliteResultStore;
pub use trait_def::ResultStore;
pub use transaction::{
    merge_detections_in_transaction, with_transaction, MergeReport, TransactionError,
    TransactionPolicy,
};

#[cfg(feature = "mock")]
pub use trait_def::MockResultStore;
