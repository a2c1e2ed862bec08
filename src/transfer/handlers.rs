//! Queue subscriptions for the two transfer queues

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use super::orchestrator::TransferOrchestrator;
use crate::queue::{Delivery, DeliveryHandler, Disposition, QueueChannel, QueueError};

/// Consumes transfer intents
pub struct IntentHandler(pub Arc<TransferOrchestrator>);

#[async_trait]
impl DeliveryHandler for IntentHandler {
    async fn handle(&self, delivery: &Delivery) -> Disposition {
        self.0.handle_delivery(delivery).await
    }
}

/// Consumes revert messages
pub struct RevertHandler(pub Arc<TransferOrchestrator>);

#[async_trait]
impl DeliveryHandler for RevertHandler {
    async fn handle(&self, delivery: &Delivery) -> Disposition {
        self.0.handle_revert(delivery).await
    }
}

/// Register both handlers on their queues
pub async fn subscribe_all(
    orchestrator: Arc<TransferOrchestrator>,
    intents: &dyn QueueChannel,
    reverts: &dyn QueueChannel,
) -> Result<(), QueueError> {
    intents
        .subscribe(Arc::new(IntentHandler(orchestrator.clone())))
        .await?;
    reverts
        .subscribe(Arc::new(RevertHandler(orchestrator)))
        .await?;
    tracing::info!(
        transfer_queue = intents.name(),
        revert_queue = reverts.name(),
        "Transfer consumers subscribed"
    );
    Ok(())
}

/// Close the intent queue, then the revert queue.
///
/// An intent handler still running inside the grace period may publish a
/// revert, so the revert queue must outlive it.
pub async fn close_all(
    intents: &dyn QueueChannel,
    reverts: &dyn QueueChannel,
    grace: Duration,
) -> [(String, Result<bool, QueueError>); 2] {
    let intents_closed = intents.close(grace).await;
    let reverts_closed = reverts.close(grace).await;
    [
        (intents.name().to_string(), intents_closed),
        (reverts.name().to_string(), reverts_closed),
    ]
}
