//! Consumer loop shared by the queue backends
//!
//! One background task per subscribed queue: pull a delivery, invoke the
//! handler, settle the delivery, repeat. Handler invocations are therefore
//! serialized per consumer instance.

use async_trait::async_trait;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{Delivery, DeliveryHandler, Disposition, QueueError};

#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub poll_interval: Duration,
    pub handler_timeout: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(200),
            handler_timeout: Duration::from_secs(30),
        }
    }
}

impl From<&crate::config::QueueConfig> for ConsumerConfig {
    fn from(config: &crate::config::QueueConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            handler_timeout: config.handler_timeout(),
        }
    }
}

/// Backend side of a consumer: where deliveries come from and how they settle
#[async_trait]
pub(crate) trait DeliverySource: Send + Sync + 'static {
    /// Lease the next visible message, if any
    async fn next(&self) -> Result<Option<Delivery>, QueueError>;

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError>;

    async fn nack(&self, delivery: &Delivery) -> Result<(), QueueError>;

    /// Wait until a message may be available, at most `idle`
    async fn wait(&self, idle: Duration);
}

pub(crate) struct ConsumerTask {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl ConsumerTask {
    pub(crate) fn spawn(
        queue_name: String,
        source: Arc<dyn DeliverySource>,
        handler: Arc<dyn DeliveryHandler>,
        config: ConsumerConfig,
    ) -> Self {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(run(queue_name, source, handler, config, shutdown_rx));
        Self { shutdown, handle }
    }

    /// Signal shutdown and wait up to `grace` for the loop to exit.
    ///
    /// Returns true on a clean exit, false when the task had to be aborted.
    pub(crate) async fn stop(self, grace: Duration) -> bool {
        let _ = self.shutdown.send(true);
        let mut handle = self.handle;

        match tokio::time::timeout(grace, &mut handle).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                error!(error = %e, "Consumer task terminated abnormally");
                false
            }
            Err(_) => {
                warn!(grace_ms = grace.as_millis() as u64, "Consumer did not drain within grace period, aborting");
                handle.abort();
                false
            }
        }
    }
}

async fn run(
    queue_name: String,
    source: Arc<dyn DeliverySource>,
    handler: Arc<dyn DeliveryHandler>,
    config: ConsumerConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(queue = %queue_name, "Consumer started");

    loop {
        if *shutdown.borrow() {
            break;
        }

        let next = tokio::select! {
            _ = shutdown.changed() => break,
            next = source.next() => next,
        };

        match next {
            Ok(Some(delivery)) => {
                // Shutdown is not observed while a handler runs; stop() bounds it
                let disposition = invoke(&queue_name, handler.as_ref(), &delivery, &config).await;
                let settled = match disposition {
                    Disposition::Ack => source.ack(&delivery).await,
                    Disposition::Nack => source.nack(&delivery).await,
                };
                if let Err(e) = settled {
                    // Unsettled deliveries come back once their lease expires
                    error!(
                        queue = %queue_name,
                        delivery_id = delivery.delivery_id,
                        ?disposition,
                        error = %e,
                        "Failed to settle delivery"
                    );
                }
            }
            Ok(None) => {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = source.wait(config.poll_interval) => {}
                }
            }
            Err(e) => {
                error!(queue = %queue_name, error = %e, "Failed to fetch next delivery");
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = tokio::time::sleep(config.poll_interval) => {}
                }
            }
        }
    }

    info!(queue = %queue_name, "Consumer stopped");
}

async fn invoke(
    queue_name: &str,
    handler: &dyn DeliveryHandler,
    delivery: &Delivery,
    config: &ConsumerConfig,
) -> Disposition {
    debug!(
        queue = %queue_name,
        delivery_id = delivery.delivery_id,
        key = %delivery.idempotency_key,
        attempt = delivery.attempt,
        redelivery = delivery.is_redelivery(),
        "Dispatching delivery"
    );

    let guarded = AssertUnwindSafe(handler.handle(delivery)).catch_unwind();
    match tokio::time::timeout(config.handler_timeout, guarded).await {
        Ok(Ok(disposition)) => disposition,
        Ok(Err(_)) => {
            error!(
                queue = %queue_name,
                delivery_id = delivery.delivery_id,
                "Handler panicked, delivery will be redelivered"
            );
            Disposition::Nack
        }
        Err(_) => {
            warn!(
                queue = %queue_name,
                delivery_id = delivery.delivery_id,
                timeout_ms = config.handler_timeout.as_millis() as u64,
                "Handler timed out, delivery will be redelivered"
            );
            Disposition::Nack
        }
    }
}
