//! In-memory transfer store

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

use super::{Transition, TransferStore};
use crate::transfer::error::TransferError;
use crate::transfer::messages::RevertTransferProduct;
use crate::transfer::state::TransferStatus;
use crate::transfer::types::{TransferId, TransferRecord};

#[derive(Default)]
struct Tables {
    shop_products: HashMap<i64, i64>,
    transfers: HashMap<TransferId, TransferRecord>,
}

#[derive(Default)]
pub struct MemoryTransferStore {
    tables: Mutex<Tables>,
    failures: AtomicUsize,
}

impl MemoryTransferStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_shop_product_stock(&self, shop_product_id: i64, stock: i64) {
        self.tables
            .lock()
            .await
            .shop_products
            .insert(shop_product_id, stock);
    }

    /// Make the next `n` store calls fail as if the database were unreachable
    pub fn fail_next(&self, n: usize) {
        self.failures.store(n, Ordering::SeqCst);
    }

    /// Shift `updated_at` into the past, as if the record sat idle for `age`
    pub async fn age_record(&self, id: TransferId, age: Duration) {
        if let Some(record) = self.tables.lock().await.transfers.get_mut(&id)
            && let Ok(age) = chrono::Duration::from_std(age)
        {
            record.updated_at -= age;
        }
    }

    fn injected_failure(&self) -> Result<(), TransferError> {
        let hit = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if hit {
            return Err(TransferError::DatabaseError(
                "injected store failure".to_string(),
            ));
        }
        Ok(())
    }
}

fn cas(
    record: &mut TransferRecord,
    next: TransferStatus,
    note: Option<String>,
) -> Result<Transition, TransferError> {
    if record.status != TransferStatus::InTransit {
        return Ok(Transition::Unchanged(record.status));
    }
    record.transition(next, note)?;
    Ok(Transition::Applied)
}

#[async_trait]
impl TransferStore for MemoryTransferStore {
    async fn shop_product_stock(&self, shop_product_id: i64) -> Result<Option<i64>, TransferError> {
        self.injected_failure()?;
        Ok(self
            .tables
            .lock()
            .await
            .shop_products
            .get(&shop_product_id)
            .copied())
    }

    async fn create_reserved(&self, record: &TransferRecord) -> Result<(), TransferError> {
        self.injected_failure()?;
        if record.status != TransferStatus::InTransit {
            return Err(TransferError::InvalidStateTransition(format!(
                "transfer {} must be {} to persist, is {}",
                record.id,
                TransferStatus::InTransit,
                record.status
            )));
        }

        let mut guard = self.tables.lock().await;
        let tables = &mut *guard;
        let stock = tables
            .shop_products
            .get_mut(&record.shop_product_id)
            .ok_or(TransferError::ShopProductNotFound(record.shop_product_id))?;
        if *stock < record.stock_to_transfer {
            return Err(TransferError::InsufficientStock {
                available: *stock,
                requested: record.stock_to_transfer,
            });
        }
        *stock -= record.stock_to_transfer;
        tables.transfers.insert(record.id, record.clone());
        Ok(())
    }

    async fn get(&self, id: TransferId) -> Result<Option<TransferRecord>, TransferError> {
        self.injected_failure()?;
        Ok(self.tables.lock().await.transfers.get(&id).cloned())
    }

    async fn complete(&self, id: TransferId, note: Option<String>) -> Result<Transition, TransferError> {
        self.injected_failure()?;
        let mut tables = self.tables.lock().await;
        let record = tables
            .transfers
            .get_mut(&id)
            .ok_or_else(|| TransferError::TransferNotFound(id.to_string()))?;
        cas(record, TransferStatus::Completed, note)
    }

    async fn revert(&self, revert: &RevertTransferProduct) -> Result<Transition, TransferError> {
        self.injected_failure()?;
        let id = revert.transfer_product_id;
        let mut guard = self.tables.lock().await;
        let tables = &mut *guard;
        let record = tables
            .transfers
            .get_mut(&id)
            .ok_or_else(|| TransferError::TransferNotFound(id.to_string()))?;

        let transition = cas(record, TransferStatus::Reverted, Some(revert.note.clone()))?;
        if transition == Transition::Applied {
            let (product, quantity) = (record.shop_product_id, record.stock_to_transfer);
            *tables.shop_products.entry(product).or_insert(0) += quantity;
        }
        Ok(transition)
    }

    async fn find_stale(
        &self,
        threshold: Duration,
        limit: usize,
    ) -> Result<Vec<TransferRecord>, TransferError> {
        self.injected_failure()?;
        let cutoff = Utc::now()
            - chrono::Duration::from_std(threshold)
                .map_err(|e| TransferError::InvalidRequest(e.to_string()))?;

        let tables = self.tables.lock().await;
        let mut stale: Vec<TransferRecord> = tables
            .transfers
            .values()
            .filter(|r| r.status.is_pending() && r.updated_at <= cutoff)
            .cloned()
            .collect();
        stale.sort_by_key(|r| r.updated_at);
        stale.truncate(limit);
        Ok(stale)
    }

    async fn mark_redriven(&self, id: TransferId) -> Result<bool, TransferError> {
        self.injected_failure()?;
        let mut tables = self.tables.lock().await;
        match tables.transfers.get_mut(&id) {
            Some(record) if record.status.is_pending() => {
                record.retry_count += 1;
                record.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
