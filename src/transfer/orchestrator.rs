//! Transfer Orchestrator
//!
//! Producer side: validate, reserve shop-product stock, persist the record
//! IN_TRANSIT, publish the intent.
//!
//! Consumer side: apply the source decrement, then either complete (crediting
//! the destination) or emit a revert that restores the reservation.
//!
//! Once the source decrement decision is committed, a transient failure is no
//! longer answered with a redelivery: the record stays IN_TRANSIT and the
//! reconciliation worker re-drives it. The journaled decision makes the
//! re-drive replay the same outcome.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::error::TransferError;
use super::ledger::{DecrementOutcome, Refusal, StockLedger};
use super::messages::{RevertReason, RevertTransferProduct, TransferIntent};
use super::state::TransferStatus;
use super::store::{Transition, TransferStore};
use super::types::{TransferId, TransferRecord, TransferRequest};
use crate::config::TransferConfig;
use crate::queue::{Delivery, Disposition, QueueChannel, publish_json};

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Upper bound for one queue publish
    pub publish_timeout: Duration,
    /// Upper bound for one store or ledger call
    pub store_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            publish_timeout: Duration::from_secs(5),
            store_timeout: Duration::from_secs(5),
        }
    }
}

impl From<&TransferConfig> for OrchestratorConfig {
    fn from(config: &TransferConfig) -> Self {
        Self {
            publish_timeout: config.publish_timeout(),
            store_timeout: config.store_timeout(),
        }
    }
}

pub struct TransferOrchestrator {
    store: Arc<dyn TransferStore>,
    ledger: Arc<dyn StockLedger>,
    intents: Arc<dyn QueueChannel>,
    reverts: Arc<dyn QueueChannel>,
    config: OrchestratorConfig,
}

async fn bounded<T>(
    limit: Duration,
    what: &'static str,
    fut: impl Future<Output = Result<T, TransferError>>,
) -> Result<T, TransferError> {
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| TransferError::Timeout(format!("{} after {:?}", what, limit)))?
}

impl TransferOrchestrator {
    pub fn new(
        store: Arc<dyn TransferStore>,
        ledger: Arc<dyn StockLedger>,
        intents: Arc<dyn QueueChannel>,
        reverts: Arc<dyn QueueChannel>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            store,
            ledger,
            intents,
            reverts,
            config,
        }
    }

    pub fn store(&self) -> &Arc<dyn TransferStore> {
        &self.store
    }

    pub fn ledger(&self) -> &Arc<dyn StockLedger> {
        &self.ledger
    }

    /// Reserve stock, persist IN_TRANSIT, publish the intent.
    ///
    /// Everything before the reservation commit fails without side effects.
    /// A publish failure after the commit yields `PublishDeferred`.
    pub async fn initiate(&self, req: TransferRequest) -> Result<TransferRecord, TransferError> {
        req.validate()?;
        let limit = self.config.store_timeout;

        let available = bounded(
            limit,
            "shop product lookup",
            self.store.shop_product_stock(req.shop_product_id),
        )
        .await?
        .ok_or(TransferError::ShopProductNotFound(req.shop_product_id))?;
        if available < req.stock_to_transfer {
            return Err(TransferError::InsufficientStock {
                available,
                requested: req.stock_to_transfer,
            });
        }

        let source = req.source_key();
        if bounded(limit, "source stock lookup", self.ledger.balance(source))
            .await?
            .is_none()
        {
            return Err(TransferError::WarehouseStockNotFound(source));
        }

        let mut record = TransferRecord::new(&req);
        record.transition(TransferStatus::InTransit, None)?;
        match bounded(limit, "reservation", self.store.create_reserved(&record)).await {
            Ok(()) => {}
            Err(TransferError::Timeout(cause)) => self.confirm_reservation(&record, cause).await?,
            Err(e) => return Err(e),
        }

        info!(
            transfer_id = %record.id,
            shop_product_id = record.shop_product_id,
            quantity = record.stock_to_transfer,
            source = record.warehouse_id_source,
            destination = record.warehouse_id_destination,
            "Stock reserved, transfer in transit"
        );

        if let Err(e) = self.publish_intent(&record).await {
            error!(
                transfer_id = %record.id,
                error = %e,
                "Intent publish failed after reservation, left for reconciliation"
            );
            return Err(TransferError::PublishDeferred(record.id));
        }

        Ok(record)
    }

    /// A reservation whose acknowledgment timed out may still have committed.
    ///
    /// Only a confirmed absence is reported as a retryable timeout.
    async fn confirm_reservation(
        &self,
        record: &TransferRecord,
        cause: String,
    ) -> Result<(), TransferError> {
        match bounded(
            self.config.store_timeout,
            "reservation check",
            self.store.get(record.id),
        )
        .await
        {
            Ok(Some(_)) => {
                warn!(transfer_id = %record.id, cause = %cause, "Reservation acknowledged late but committed");
                Ok(())
            }
            Ok(None) => Err(TransferError::Timeout(cause)),
            Err(e) => {
                error!(
                    transfer_id = %record.id,
                    cause = %cause,
                    error = %e,
                    "Reservation outcome unknown, left for reconciliation"
                );
                Err(TransferError::ReservationUnknown(record.id))
            }
        }
    }

    pub async fn get(&self, id: TransferId) -> Result<TransferRecord, TransferError> {
        bounded(self.config.store_timeout, "transfer lookup", self.store.get(id))
            .await?
            .ok_or_else(|| TransferError::TransferNotFound(id.to_string()))
    }

    /// Re-publish the intent of a stale IN_TRANSIT record.
    ///
    /// Returns false when the record left IN_TRANSIT in the meantime.
    pub async fn redrive(&self, record: &TransferRecord) -> Result<bool, TransferError> {
        let marked = bounded(
            self.config.store_timeout,
            "redrive mark",
            self.store.mark_redriven(record.id),
        )
        .await?;
        if !marked {
            return Ok(false);
        }
        self.publish_intent(record).await?;
        Ok(true)
    }

    async fn publish_intent(&self, record: &TransferRecord) -> Result<(), TransferError> {
        let intent = TransferIntent::from(record);
        publish_json(
            self.intents.as_ref(),
            &record.id.to_string(),
            &intent,
            self.config.publish_timeout,
        )
        .await?;
        Ok(())
    }

    /// Consumer entry point for the transfer queue
    pub async fn handle_delivery(&self, delivery: &Delivery) -> Disposition {
        let intent: TransferIntent = match delivery.decode() {
            Ok(intent) => intent,
            Err(e) => {
                error!(
                    delivery_id = delivery.delivery_id,
                    key = %delivery.idempotency_key,
                    error = %e,
                    "Undecodable transfer intent, dropped as poison"
                );
                return Disposition::Ack;
            }
        };
        let id = intent.id;
        let limit = self.config.store_timeout;

        let record = match bounded(limit, "transfer lookup", self.store.get(id)).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                error!(transfer_id = %id, "Intent for unknown transfer, dropped");
                return Disposition::Ack;
            }
            Err(e) => return uncommitted_failure(id, &e),
        };

        if record.status.is_terminal() {
            debug!(transfer_id = %id, status = %record.status, attempt = delivery.attempt, "Transfer already settled, duplicate intent acknowledged");
            return Disposition::Ack;
        }

        let outcome = match bounded(
            limit,
            "source decrement",
            self.ledger
                .decrement(id, record.source_key(), record.stock_to_transfer),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(e) => return uncommitted_failure(id, &e),
        };

        let settled = if let Some(refusal) = outcome.refusal() {
            self.emit_revert(&intent, &record, refusal).await
        } else {
            if let DecrementOutcome::Applied { remaining } = outcome {
                info!(transfer_id = %id, key = %record.source_key(), remaining, "Source stock decremented");
            } else {
                debug!(transfer_id = %id, "Source decrement replayed");
            }
            self.complete(&record).await
        };

        if let Err(e) = settled {
            error!(
                transfer_id = %id,
                decision = ?outcome,
                error = %e,
                "Transfer settlement failed after source decision, left for reconciliation"
            );
        }
        Disposition::Ack
    }

    async fn complete(&self, record: &TransferRecord) -> Result<(), TransferError> {
        let limit = self.config.store_timeout;
        let destination = record.destination_key();

        bounded(
            limit,
            "destination credit",
            self.ledger
                .credit(record.id, destination, record.stock_to_transfer),
        )
        .await?;

        let note = format!(
            "moved {} from warehouse {} to warehouse {}",
            record.stock_to_transfer, record.warehouse_id_source, record.warehouse_id_destination
        );
        match bounded(limit, "completion", self.store.complete(record.id, Some(note))).await? {
            Transition::Applied => {
                info!(transfer_id = %record.id, "Transfer completed");
            }
            Transition::Unchanged(status) => {
                warn!(transfer_id = %record.id, %status, "Completion skipped, transfer no longer in transit");
            }
        }
        Ok(())
    }

    async fn emit_revert(
        &self,
        intent: &TransferIntent,
        record: &TransferRecord,
        refusal: Refusal,
    ) -> Result<(), TransferError> {
        let (reason, note) = match refusal {
            Refusal::Insufficient { available } => (
                RevertReason::InsufficientStock,
                format!(
                    "{}: available {}, requested {}",
                    RevertReason::InsufficientStock,
                    available,
                    record.stock_to_transfer
                ),
            ),
            Refusal::Missing => (
                RevertReason::SourceStockMissing,
                RevertReason::SourceStockMissing.to_string(),
            ),
        };

        let revert = RevertTransferProduct::new(intent, reason, note);
        publish_json(
            self.reverts.as_ref(),
            &record.id.to_string(),
            &revert,
            self.config.publish_timeout,
        )
        .await?;

        warn!(transfer_id = %record.id, %refusal, "Source decrement refused, revert published");
        Ok(())
    }

    /// Consumer entry point for the revert queue
    pub async fn handle_revert(&self, delivery: &Delivery) -> Disposition {
        let revert: RevertTransferProduct = match delivery.decode() {
            Ok(revert) => revert,
            Err(e) => {
                error!(
                    delivery_id = delivery.delivery_id,
                    key = %delivery.idempotency_key,
                    error = %e,
                    "Undecodable revert, dropped as poison"
                );
                return Disposition::Ack;
            }
        };
        let id = revert.transfer_product_id;

        match bounded(self.config.store_timeout, "revert", self.store.revert(&revert)).await {
            Ok(Transition::Applied) => {
                info!(transfer_id = %id, reason = ?revert.reason, "Transfer reverted, reservation restored");
            }
            Ok(Transition::Unchanged(TransferStatus::Reverted)) => {
                debug!(transfer_id = %id, "Transfer already reverted, duplicate revert acknowledged");
            }
            Ok(Transition::Unchanged(status)) => {
                error!(transfer_id = %id, %status, "Revert for transfer not in transit, ignored");
            }
            Err(e) => return uncommitted_failure(id, &e),
        }
        Disposition::Ack
    }
}

/// Disposition for a failure before anything was committed
fn uncommitted_failure(id: TransferId, e: &TransferError) -> Disposition {
    if e.is_transient() {
        warn!(transfer_id = %id, error = %e, "Transient failure, requesting redelivery");
        Disposition::Nack
    } else {
        error!(transfer_id = %id, error = %e, "Non-retryable failure, delivery dropped");
        Disposition::Ack
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{ConsumerConfig, MemoryQueue};
    use crate::transfer::ledger::MemoryStockLedger;
    use crate::transfer::store::MemoryTransferStore;
    use crate::transfer::types::WarehouseStockKey;

    struct Fixture {
        store: Arc<MemoryTransferStore>,
        ledger: Arc<MemoryStockLedger>,
        intents: Arc<MemoryQueue>,
        orchestrator: TransferOrchestrator,
    }

    async fn fixture(shop_stock: i64, source_stock: Option<i64>) -> Fixture {
        let store = Arc::new(MemoryTransferStore::new());
        let ledger = Arc::new(MemoryStockLedger::new());
        let intents = Arc::new(MemoryQueue::new("intents", ConsumerConfig::default()));
        let reverts = Arc::new(MemoryQueue::new("reverts", ConsumerConfig::default()));

        store.set_shop_product_stock(1, shop_stock).await;
        if let Some(stock) = source_stock {
            ledger.set_stock(WarehouseStockKey::new(1, 10), stock).await;
        }

        let orchestrator = TransferOrchestrator::new(
            store.clone(),
            ledger.clone(),
            intents.clone(),
            reverts,
            OrchestratorConfig::default(),
        );
        Fixture {
            store,
            ledger,
            intents,
            orchestrator,
        }
    }

    fn request(qty: i64) -> TransferRequest {
        TransferRequest {
            shop_product_id: 1,
            stock_to_transfer: qty,
            warehouse_id_source: 10,
            warehouse_id_destination: 20,
        }
    }

    #[tokio::test]
    async fn test_initiate_rejects_before_any_write() {
        let f = fixture(10, Some(10)).await;

        let err = f.orchestrator.initiate(request(0)).await.unwrap_err();
        assert!(matches!(err, TransferError::InvalidQuantity(0)));

        let mut same = request(1);
        same.warehouse_id_destination = same.warehouse_id_source;
        let err = f.orchestrator.initiate(same).await.unwrap_err();
        assert!(matches!(err, TransferError::SameWarehouse(10)));

        let mut unknown = request(1);
        unknown.shop_product_id = 99;
        let err = f.orchestrator.initiate(unknown).await.unwrap_err();
        assert!(matches!(err, TransferError::ShopProductNotFound(99)));

        let err = f.orchestrator.initiate(request(11)).await.unwrap_err();
        assert!(matches!(err, TransferError::InsufficientStock { available: 10, requested: 11 }));

        assert_eq!(f.store.shop_product_stock(1).await.unwrap(), Some(10));
        assert_eq!(f.intents.pending_len().await, 0);
    }

    #[tokio::test]
    async fn test_initiate_requires_source_stock_row() {
        let f = fixture(10, None).await;
        let err = f.orchestrator.initiate(request(4)).await.unwrap_err();
        assert!(matches!(err, TransferError::WarehouseStockNotFound(_)));
        assert_eq!(f.store.shop_product_stock(1).await.unwrap(), Some(10));
    }

    #[tokio::test]
    async fn test_initiate_publish_failure_is_deferred() {
        let f = fixture(10, Some(10)).await;
        f.intents.close(Duration::from_millis(10)).await.unwrap();

        let err = f.orchestrator.initiate(request(4)).await.unwrap_err();
        let TransferError::PublishDeferred(id) = err else {
            panic!("expected PublishDeferred, got {err:?}");
        };

        // The reservation stands and the record is visible
        assert_eq!(f.store.shop_product_stock(1).await.unwrap(), Some(6));
        let record = f.orchestrator.get(id).await.unwrap();
        assert_eq!(record.status, TransferStatus::InTransit);
    }

    #[tokio::test]
    async fn test_poison_intent_is_acked() {
        let f = fixture(10, Some(10)).await;
        let delivery = Delivery {
            delivery_id: 1,
            idempotency_key: "x".into(),
            payload: b"{\"id\": 5}".to_vec(),
            attempt: 1,
        };
        assert_eq!(f.orchestrator.handle_delivery(&delivery).await, Disposition::Ack);
        assert_eq!(f.orchestrator.handle_revert(&delivery).await, Disposition::Ack);
    }

    #[tokio::test]
    async fn test_transient_decrement_failure_nacks_without_change() {
        let f = fixture(10, Some(10)).await;
        let record = f.orchestrator.initiate(request(4)).await.unwrap();
        let delivery = f.intents.drain_pending().await.remove(0);

        f.ledger.fail_next(1);
        assert_eq!(f.orchestrator.handle_delivery(&delivery).await, Disposition::Nack);
        assert_eq!(f.ledger.stock(record.source_key()).await, 10);

        assert_eq!(f.orchestrator.handle_delivery(&delivery).await, Disposition::Ack);
        assert_eq!(f.ledger.stock(record.source_key()).await, 6);
        assert_eq!(
            f.orchestrator.get(record.id).await.unwrap().status,
            TransferStatus::Completed
        );
    }
}
