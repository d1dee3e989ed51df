//! In-process transport over a tokio channel.

use super::{Delivery, NotificationTransport};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Transport whose messages are published from the same process.
///
/// Nacked deliveries are queued again with their attempt counter bumped.
/// Settlements are recorded so callers can inspect what happened to each
/// message.
pub struct ChannelTransport {
    sender: mpsc::UnboundedSender<Delivery>,
    receiver: tokio::sync::Mutex<mpsc::UnboundedReceiver<Delivery>>,
    closed: CancellationToken,
    next_id: AtomicU64,
    acknowledged: Mutex<Vec<String>>,
    nacked: Mutex<Vec<String>>,
}

impl Default for ChannelTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelTransport {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: tokio::sync::Mutex::new(receiver),
            closed: CancellationToken::new(),
            next_id: AtomicU64::new(1),
            acknowledged: Mutex::new(Vec::new()),
            nacked: Mutex::new(Vec::new()),
        }
    }

    /// Queue a message, returning its id.
    pub fn publish(&self, payload: impl Into<Vec<u8>>) -> Result<String> {
        let message_id = self.next_id.fetch_add(1, Ordering::SeqCst).to_string();
        self.sender
            .send(Delivery::new(message_id.clone(), payload, 1))
            .map_err(|_| anyhow!("Channel transport receiver dropped"))?;
        Ok(message_id)
    }

    /// End the stream once the queued messages are drained.
    pub fn close(&self) {
        self.closed.cancel();
    }

    /// Ids of acknowledged deliveries, in settlement order.
    pub fn acknowledged(&self) -> Vec<String> {
        self.acknowledged
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Ids of nacked deliveries, in settlement order.
    pub fn nacked(&self) -> Vec<String> {
        self.nacked
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl NotificationTransport for ChannelTransport {
    async fn receive(&self) -> Result<Option<Delivery>> {
        let mut receiver = self.receiver.lock().await;
        loop {
            if let Ok(delivery) = receiver.try_recv() {
                return Ok(Some(delivery));
            }
            if self.closed.is_cancelled() {
                return Ok(None);
            }
            tokio::select! {
                biased;
                delivery = receiver.recv() => return Ok(delivery),
                _ = self.closed.cancelled() => {}
            }
        }
    }

    async fn acknowledge(&self, delivery: Delivery) -> Result<()> {
        debug!("Acknowledged message {}", delivery.message_id());
        self.acknowledged
            .lock()
            .map_err(|_| anyhow!("Acknowledgement log poisoned"))?
            .push(delivery.message_id);
        Ok(())
    }

    async fn nack(&self, delivery: Delivery) -> Result<()> {
        debug!(
            "Nacked message {} (attempt {}), queueing redelivery",
            delivery.message_id(),
            delivery.attempt()
        );
        self.nacked
            .lock()
            .map_err(|_| anyhow!("Nack log poisoned"))?
            .push(delivery.message_id.clone());
        let redelivery = Delivery {
            attempt: delivery.attempt + 1,
            ..delivery
        };
        self.sender
            .send(redelivery)
            .map_err(|_| anyhow!("Channel transport receiver dropped"))?;
        Ok(())
    }
}
