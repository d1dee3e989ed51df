use crate::transport::DecodeError;
use thiserror::Error;

/// Failures that end a message lifecycle.
///
/// Write conflicts and duplicate analyses never show up here: the transaction
/// layer absorbs them.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Undecodable message: {0}")]
    Decode(#[from] DecodeError),

    #[error("Audio record not found: {0}")]
    RecordNotFound(String),

    #[error("Blob transfer failed: {0:#}")]
    Transfer(anyhow::Error),

    #[error("Analysis failed: {0:#}")]
    Analysis(anyhow::Error),

    #[error("Detection submission failed: {0:#}")]
    Submission(anyhow::Error),

    #[error("Result store error: {0:#}")]
    Store(anyhow::Error),

    #[error("Lifecycle panicked: {0}")]
    Panicked(String),
}

impl LifecycleError {
    /// Stable label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            LifecycleError::Decode(_) => "undecodable",
            LifecycleError::RecordNotFound(_) => "record_not_found",
            LifecycleError::Transfer(_) => "transfer",
            LifecycleError::Analysis(_) => "analysis",
            LifecycleError::Submission(_) => "submission",
            LifecycleError::Store(_) => "store",
            LifecycleError::Panicked(_) => "panic",
        }
    }

    /// Whether redelivering the same message could succeed.
    pub fn is_retriable(&self) -> bool {
        !matches!(
            self,
            LifecycleError::Decode(_) | LifecycleError::RecordNotFound(_)
        )
    }
}
