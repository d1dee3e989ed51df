//! Subscription flow control.
//!
//! Admits deliveries into lifecycles under an admission ceiling. A slot is
//! taken before a delivery is pulled from the transport, so at most
//! `max_in_flight` messages are ever outstanding, and it is released only when
//! the lifecycle has settled its delivery.

use super::lifecycle::{LifecycleOutcome, MessageLifecycleController, Settlement};
use crate::server::metrics;
use crate::transport::{Delivery, FatalTransportError, NotificationTransport};
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const DEFAULT_MAX_RECEIVE_FAILURES: u32 = 5;
const DEFAULT_RECEIVE_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Counters for one `run` of the flow controller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlowStats {
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub acknowledged: usize,
    pub nacked: usize,
    /// Lifecycle tasks that died without producing an outcome.
    pub crashed: usize,
}

impl FlowStats {
    fn record(&mut self, joined: Result<LifecycleOutcome, JoinError>) {
        match joined {
            Ok(outcome) => {
                self.processed += 1;
                if outcome.is_success() {
                    self.succeeded += 1;
                } else {
                    self.failed += 1;
                }
                match outcome.settlement {
                    Settlement::Acknowledged => self.acknowledged += 1,
                    Settlement::Nacked => self.nacked += 1,
                    Settlement::Failed => {}
                }
            }
            Err(e) => {
                error!("Lifecycle task crashed: {}", e);
                self.crashed += 1;
            }
        }
    }
}

/// Decrements the in-flight gauge however the lifecycle task ends.
struct InFlight {
    _permit: OwnedSemaphorePermit,
}

impl InFlight {
    fn new(permit: OwnedSemaphorePermit) -> Self {
        metrics::inc_in_flight();
        Self { _permit: permit }
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        metrics::dec_in_flight();
    }
}

pub struct SubscriptionFlowController {
    controller: Arc<MessageLifecycleController>,
    transport: Arc<dyn NotificationTransport>,
    max_in_flight: usize,
    max_receive_failures: u32,
    receive_retry_delay: Duration,
}

impl SubscriptionFlowController {
    /// `max_in_flight` is clamped to at least 1.
    pub fn new(controller: Arc<MessageLifecycleController>, max_in_flight: usize) -> Self {
        let transport = Arc::clone(&controller.context().transport);
        Self {
            controller,
            transport,
            max_in_flight: max_in_flight.max(1),
            max_receive_failures: DEFAULT_MAX_RECEIVE_FAILURES,
            receive_retry_delay: DEFAULT_RECEIVE_RETRY_DELAY,
        }
    }

    /// Consecutive receive errors tolerated (at least 1) and the pause between them.
    pub fn with_receive_retry(mut self, max_failures: u32, delay: Duration) -> Self {
        self.max_receive_failures = max_failures.max(1);
        self.receive_retry_delay = delay;
        self
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }

    /// Admit deliveries until the transport ends or `shutdown` is cancelled,
    /// then wait for every admitted lifecycle to finish.
    ///
    /// A fatal transport error, or too many consecutive receive errors, also
    /// stops admission. In-flight lifecycles are still drained before the
    /// error is returned.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<FlowStats> {
        let slots = Arc::new(Semaphore::new(self.max_in_flight));
        let mut lifecycles: JoinSet<LifecycleOutcome> = JoinSet::new();
        let mut stats = FlowStats::default();
        let mut transport_failure = None;

        info!(
            "Subscription started with admission ceiling {}",
            self.max_in_flight
        );

        loop {
            let permit = tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!("Shutdown requested, no longer admitting messages");
                    break;
                }
                Some(joined) = lifecycles.join_next(), if !lifecycles.is_empty() => {
                    stats.record(joined);
                    continue;
                }
                permit = Arc::clone(&slots).acquire_owned() => {
                    permit.context("Admission semaphore closed")?
                }
            };

            let delivery = match self
                .next_delivery(&shutdown, &mut lifecycles, &mut stats)
                .await
            {
                Ok(Some(delivery)) => delivery,
                Ok(None) => break,
                Err(e) => {
                    error!("Notification transport failed, no longer admitting messages: {:#}", e);
                    transport_failure = Some(e);
                    break;
                }
            };

            let controller = Arc::clone(&self.controller);
            let in_flight = InFlight::new(permit);
            lifecycles.spawn(async move {
                let _in_flight = in_flight;
                controller.process(delivery).await
            });
        }

        if !lifecycles.is_empty() {
            info!("Draining {} in-flight lifecycles", lifecycles.len());
        }
        while let Some(joined) = lifecycles.join_next().await {
            stats.record(joined);
        }

        info!(
            "Subscription stopped: {} processed ({} succeeded, {} failed, {} nacked)",
            stats.processed, stats.succeeded, stats.failed, stats.nacked
        );
        match transport_failure {
            Some(e) => Err(e),
            None => Ok(stats),
        }
    }

    /// Wait for a delivery while reaping finished lifecycles. `None` when the
    /// stream ended or shutdown was requested, `Err` when the transport is
    /// considered dead.
    async fn next_delivery(
        &self,
        shutdown: &CancellationToken,
        lifecycles: &mut JoinSet<LifecycleOutcome>,
        stats: &mut FlowStats,
    ) -> Result<Option<Delivery>> {
        let mut failures = 0u32;
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!("Shutdown requested, no longer admitting messages");
                    return Ok(None);
                }
                Some(joined) = lifecycles.join_next(), if !lifecycles.is_empty() => {
                    stats.record(joined);
                }
                received = self.transport.receive() => match received {
                    Ok(Some(delivery)) => {
                        debug!("Admitted message {}", delivery.message_id());
                        return Ok(Some(delivery));
                    }
                    Ok(None) => {
                        info!("Notification stream ended");
                        return Ok(None);
                    }
                    Err(e) if FatalTransportError::is_fatal(&e) => return Err(e),
                    Err(e) => {
                        failures += 1;
                        if failures >= self.max_receive_failures {
                            return Err(e.context(format!(
                                "Giving up after {} consecutive receive failures",
                                failures
                            )));
                        }
                        warn!(
                            "Failed to receive notification (attempt {}/{}): {:#}",
                            failures, self.max_receive_failures, e
                        );
                        tokio::select! {
                            _ = shutdown.cancelled() => return Ok(None),
                            _ = tokio::time::sleep(self.receive_retry_delay) => {}
                        }
                    }
                }
            }
        }
    }
}
