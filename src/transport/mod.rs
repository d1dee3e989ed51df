//! Notification transports.
//!
//! A transport hands out [`Delivery`] values at least once. Each delivery must
//! be settled exactly once, either acknowledged or negatively acknowledged;
//! both consume it.

mod channel;
mod line;
mod message;

pub use channel::ChannelTransport;
pub use line::LineTransport;
pub use message::{decode_payload, AnalysisMessage, DecodeError};

use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;

/// Returned (inside `anyhow::Error`) by a transport that can no longer deliver.
///
/// Any other receive error is treated as transient and retried.
#[derive(Debug, Error)]
#[error("Notification transport closed permanently: {0}")]
pub struct FatalTransportError(pub String);

impl FatalTransportError {
    /// Whether `error` carries a fatal marker anywhere in its chain.
    pub fn is_fatal(error: &anyhow::Error) -> bool {
        error.chain().any(|cause| cause.is::<FatalTransportError>())
    }
}

/// One delivery of a notification.
#[derive(Debug)]
pub struct Delivery {
    message_id: String,
    payload: Vec<u8>,
    attempt: u32,
}

impl Delivery {
    pub fn new(message_id: impl Into<String>, payload: impl Into<Vec<u8>>, attempt: u32) -> Self {
        Self {
            message_id: message_id.into(),
            payload: payload.into(),
            attempt,
        }
    }

    /// Stable across redeliveries of the same message.
    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// 1 for the first delivery, incremented on each redelivery.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

#[async_trait]
pub trait NotificationTransport: Send + Sync {
    /// Wait for the next delivery. `None` means the stream has ended.
    ///
    /// Errors are retried by the caller unless they carry a
    /// [`FatalTransportError`].
    ///
    /// Must be cancel safe: dropping the future loses no message.
    async fn receive(&self) -> Result<Option<Delivery>>;

    /// Settle a delivery as processed.
    async fn acknowledge(&self, delivery: Delivery) -> Result<()>;

    /// Settle a delivery as failed, allowing redelivery where supported.
    async fn nack(&self, delivery: Delivery) -> Result<()>;
}
