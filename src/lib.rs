//! Audio Analysis Worker Library
//!
//! This library exposes the internal modules for the binaries and integration tests.

pub mod analyzer;
pub mod blob_store;
pub mod config;
pub mod result_store;
pub mod server;
pub mod sqlite_persistence;
pub mod transport;
pub mod worker;

// Re-export commonly used types for convenience
pub use analyzer::{Analyzer, CommandAnalyzer};
pub use blob_store::{BlobStore, DefaultBlobStore, ScratchSpace};
pub use result_store::{ResultStore, SqliteResultStore};
pub use transport::{ChannelTransport, LineTransport, NotificationTransport};
pub use worker::{MessageLifecycleController, SubscriptionFlowController, WorkerContext};
