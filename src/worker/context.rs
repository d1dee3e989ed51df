use super::AckPolicy;
use crate::analyzer::Analyzer;
use crate::blob_store::{BlobStore, ScratchSpace};
use crate::result_store::{ResultStore, TransactionPolicy};
use crate::transport::NotificationTransport;
use std::sync::Arc;

/// Shared resources handed to every message lifecycle.
#[derive(Clone)]
pub struct WorkerContext {
    /// Catalog records and the result cache.
    pub result_store: Arc<dyn ResultStore>,

    /// Fetches clips into scratch space.
    pub blob_store: Arc<dyn BlobStore>,

    pub analyzer: Arc<dyn Analyzer>,

    /// Source of deliveries, and where they are settled.
    pub transport: Arc<dyn NotificationTransport>,

    pub scratch: ScratchSpace,

    pub transaction_policy: TransactionPolicy,

    /// Analysis bound to payloads that only carry an audio id.
    pub default_analysis_id: String,

    pub ack_policy: AckPolicy,
}

impl WorkerContext {
    /// Create a context with default transaction and ack policies.
    pub fn new(
        result_store: Arc<dyn ResultStore>,
        blob_store: Arc<dyn BlobStore>,
        analyzer: Arc<dyn Analyzer>,
        transport: Arc<dyn NotificationTransport>,
        scratch: ScratchSpace,
        default_analysis_id: impl Into<String>,
    ) -> Self {
        Self {
            result_store,
            blob_store,
            analyzer,
            transport,
            scratch,
            transaction_policy: TransactionPolicy::default(),
            default_analysis_id: default_analysis_id.into(),
            ack_policy: AckPolicy::default(),
        }
    }

    pub fn with_transaction_policy(mut self, policy: TransactionPolicy) -> Self {
        self.transaction_policy = policy;
        self
    }

    pub fn with_ack_policy(mut self, ack_policy: AckPolicy) -> Self {
        self.ack_policy = ack_policy;
        self
    }
}
