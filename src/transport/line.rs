//! Newline-delimited transport over any async reader.
//!
//! Lines are handed out as raw bytes; decoding (including UTF-8 validation)
//! happens in the lifecycle so a malformed line is settled like any other
//! undecodable message.

use super::{Delivery, NotificationTransport};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, Split};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Reads one message per line. Blank lines are skipped and the stream ends at
/// EOF.
///
/// Lines cannot be redelivered, so a nack only logs the loss.
pub struct LineTransport<R> {
    lines: Mutex<Split<R>>,
    line_number: AtomicU64,
}

impl<R: AsyncBufRead + Unpin + Send> LineTransport<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: Mutex::new(reader.split(b'\n')),
            line_number: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send> NotificationTransport for LineTransport<R> {
    async fn receive(&self) -> Result<Option<Delivery>> {
        let mut lines = self.lines.lock().await;
        while let Some(mut line) = lines
            .next_segment()
            .await
            .context("Failed to read notification line")?
        {
            let line_number = self.line_number.fetch_add(1, Ordering::SeqCst) + 1;
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            return Ok(Some(Delivery::new(
                format!("line-{}", line_number),
                line,
                1,
            )));
        }
        Ok(None)
    }

    async fn acknowledge(&self, delivery: Delivery) -> Result<()> {
        debug!("Acknowledged {}", delivery.message_id());
        Ok(())
    }

    async fn nack(&self, delivery: Delivery) -> Result<()> {
        warn!(
            "Line transport cannot redeliver {}, message dropped",
            delivery.message_id()
        );
        Ok(())
    }
}
