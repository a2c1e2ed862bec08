//! Wire messages carried by the transfer queues

use serde::{Deserialize, Serialize};
use std::fmt;

use super::types::{TransferId, TransferRecord};

/// Published on the transfer queue once the reservation is committed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferIntent {
    pub id: TransferId,
    pub shop_product_id: i64,
    pub stock_to_transfer: i64,
    pub warehouse_id_source: i64,
    pub warehouse_id_destination: i64,
}

impl From<&TransferRecord> for TransferIntent {
    fn from(record: &TransferRecord) -> Self {
        Self {
            id: record.id,
            shop_product_id: record.shop_product_id,
            stock_to_transfer: record.stock_to_transfer,
            warehouse_id_source: record.warehouse_id_source,
            warehouse_id_destination: record.warehouse_id_destination,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevertReason {
    /// Source warehouse holds less than the requested quantity
    InsufficientStock,
    /// No stock row for the product at the source warehouse
    SourceStockMissing,
}

impl RevertReason {
    pub fn note(&self) -> &'static str {
        match self {
            RevertReason::InsufficientStock => "insufficient stock at source warehouse",
            RevertReason::SourceStockMissing => "product not stored at source warehouse",
        }
    }
}

impl fmt::Display for RevertReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.note())
    }
}

/// Compensation message, published when the source decrement is refused
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevertTransferProduct {
    pub transfer_product_id: TransferId,
    pub shop_product_id: i64,
    pub stock_to_transfer: i64,
    pub warehouse_id_source: i64,
    pub warehouse_id_destination: i64,
    pub reason: RevertReason,
    pub note: String,
}

impl RevertTransferProduct {
    pub fn new(intent: &TransferIntent, reason: RevertReason, note: String) -> Self {
        Self {
            transfer_product_id: intent.id,
            shop_product_id: intent.shop_product_id,
            stock_to_transfer: intent.stock_to_transfer,
            warehouse_id_source: intent.warehouse_id_source,
            warehouse_id_destination: intent.warehouse_id_destination,
            reason,
            note,
        }
    }
}
