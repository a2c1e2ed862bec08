//! Transfer Store
//!
//! Persists transfer records, their history, and the shop-product stock
//! that is reserved on initiation and restored on revert. Every state change
//! is a CAS on the current status, committed together with its history entry
//! and any shop-product stock write.

pub mod db;
pub mod memory;

pub use db::PgTransferStore;
pub use memory::MemoryTransferStore;

use async_trait::async_trait;
use std::time::Duration;

use super::error::TransferError;
use super::messages::RevertTransferProduct;
use super::state::TransferStatus;
use super::types::{TransferId, TransferRecord};

/// Result of a CAS status change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Status changed now
    Applied,
    /// Record was not in the expected status; nothing written
    Unchanged(TransferStatus),
}

#[async_trait]
pub trait TransferStore: Send + Sync {
    /// Current shop-product stock, `None` when the product does not exist
    async fn shop_product_stock(&self, shop_product_id: i64) -> Result<Option<i64>, TransferError>;

    /// Debit the shop-product stock and insert `record` (already IN_TRANSIT)
    /// in one transaction.
    ///
    /// Fails with `ShopProductNotFound` or `InsufficientStock` without writing.
    async fn create_reserved(&self, record: &TransferRecord) -> Result<(), TransferError>;

    async fn get(&self, id: TransferId) -> Result<Option<TransferRecord>, TransferError>;

    /// IN_TRANSIT → COMPLETED
    async fn complete(&self, id: TransferId, note: Option<String>) -> Result<Transition, TransferError>;

    /// IN_TRANSIT → REVERTED, crediting the reserved quantity back to the
    /// shop product in the same transaction
    async fn revert(&self, revert: &RevertTransferProduct) -> Result<Transition, TransferError>;

    /// IN_TRANSIT records not touched for `threshold`, oldest first
    async fn find_stale(
        &self,
        threshold: Duration,
        limit: usize,
    ) -> Result<Vec<TransferRecord>, TransferError>;

    /// Bump `retry_count` and `updated_at`; `false` if no longer IN_TRANSIT
    async fn mark_redriven(&self, id: TransferId) -> Result<bool, TransferError>;
}
