//! In-memory stock ledger
//!
//! Same decision semantics as the PostgreSQL ledger. The whole ledger sits
//! behind one lock, so each call is atomic with respect to every other.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;
use tracing::debug;

use super::{CreditOutcome, DecrementOutcome, OpType, Refusal, StockLedger};
use crate::transfer::error::TransferError;
use crate::transfer::types::{TransferId, WarehouseStockKey};

#[derive(Default)]
struct Books {
    stock: HashMap<WarehouseStockKey, i64>,
    decisions: HashMap<(TransferId, OpType), Option<Refusal>>,
}

#[derive(Default)]
pub struct MemoryStockLedger {
    books: Mutex<Books>,
    /// Upcoming calls that fail with a transient error
    failures: AtomicUsize,
    credit_failures: AtomicUsize,
}

impl MemoryStockLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_stock(&self, key: WarehouseStockKey, stock: i64) {
        self.books.lock().await.stock.insert(key, stock);
    }

    /// Stock for the pair, 0 when absent
    pub async fn stock(&self, key: WarehouseStockKey) -> i64 {
        self.books.lock().await.stock.get(&key).copied().unwrap_or(0)
    }

    /// Drop the row for the pair
    pub async fn remove_stock(&self, key: WarehouseStockKey) {
        self.books.lock().await.stock.remove(&key);
    }

    /// Make the next `n` ledger calls fail as if the store were unreachable
    pub fn fail_next(&self, n: usize) {
        self.failures.store(n, Ordering::SeqCst);
    }

    /// Make only the next `n` credits fail
    pub fn fail_next_credits(&self, n: usize) {
        self.credit_failures.store(n, Ordering::SeqCst);
    }

    fn injected_failure(&self) -> Result<(), TransferError> {
        take_one(&self.failures)
    }
}

fn take_one(counter: &AtomicUsize) -> Result<(), TransferError> {
    let hit = counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok();
    if hit {
        return Err(TransferError::DatabaseError(
            "injected ledger failure".to_string(),
        ));
    }
    Ok(())
}

#[async_trait]
impl StockLedger for MemoryStockLedger {
    async fn balance(&self, key: WarehouseStockKey) -> Result<Option<i64>, TransferError> {
        self.injected_failure()?;
        Ok(self.books.lock().await.stock.get(&key).copied())
    }

    async fn decrement(
        &self,
        transfer_id: TransferId,
        key: WarehouseStockKey,
        quantity: i64,
    ) -> Result<DecrementOutcome, TransferError> {
        self.injected_failure()?;
        let mut books = self.books.lock().await;

        if let Some(decided) = books.decisions.get(&(transfer_id, OpType::Decrement)) {
            debug!(transfer_id = %transfer_id, key = %key, "Decrement already decided");
            return Ok(match decided {
                None => DecrementOutcome::AlreadyApplied,
                Some(refusal) => DecrementOutcome::AlreadyRefused(*refusal),
            });
        }

        let (outcome, decision) = match books.stock.get_mut(&key) {
            Some(stock) if *stock >= quantity => {
                *stock -= quantity;
                (DecrementOutcome::Applied { remaining: *stock }, None)
            }
            Some(stock) => {
                let refusal = Refusal::Insufficient { available: *stock };
                (DecrementOutcome::Refused(refusal), Some(refusal))
            }
            None => (DecrementOutcome::Refused(Refusal::Missing), Some(Refusal::Missing)),
        };
        books
            .decisions
            .insert((transfer_id, OpType::Decrement), decision);

        Ok(outcome)
    }

    async fn credit(
        &self,
        transfer_id: TransferId,
        key: WarehouseStockKey,
        quantity: i64,
    ) -> Result<CreditOutcome, TransferError> {
        self.injected_failure()?;
        take_one(&self.credit_failures)?;
        let mut books = self.books.lock().await;

        if books.decisions.contains_key(&(transfer_id, OpType::Credit)) {
            return Ok(CreditOutcome::AlreadyApplied);
        }
        books.decisions.insert((transfer_id, OpType::Credit), None);

        let stock = books.stock.entry(key).or_insert(0);
        *stock += quantity;
        Ok(CreditOutcome::Applied { balance: *stock })
    }
}
