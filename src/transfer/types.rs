//! Transfer core types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::error::TransferError;
use super::state::TransferStatus;

/// Transfer ID - ULID, sortable by creation time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransferId(ulid::Ulid);

impl TransferId {
    pub fn new() -> Self {
        Self(ulid::Ulid::new())
    }
}

impl Default for TransferId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TransferId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(ulid::Ulid::from_string(s)?))
    }
}

/// Identifies one warehouse stock counter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WarehouseStockKey {
    pub shop_product_id: i64,
    pub warehouse_id: i64,
}

impl WarehouseStockKey {
    pub fn new(shop_product_id: i64, warehouse_id: i64) -> Self {
        Self {
            shop_product_id,
            warehouse_id,
        }
    }
}

impl fmt::Display for WarehouseStockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.shop_product_id, self.warehouse_id)
    }
}

/// Inbound command to move stock between two warehouses
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub shop_product_id: i64,
    pub stock_to_transfer: i64,
    pub warehouse_id_source: i64,
    pub warehouse_id_destination: i64,
}

impl TransferRequest {
    pub fn validate(&self) -> Result<(), TransferError> {
        if self.stock_to_transfer <= 0 {
            return Err(TransferError::InvalidQuantity(self.stock_to_transfer));
        }
        if self.warehouse_id_source == self.warehouse_id_destination {
            return Err(TransferError::SameWarehouse(self.warehouse_id_source));
        }
        Ok(())
    }

    pub fn source_key(&self) -> WarehouseStockKey {
        WarehouseStockKey::new(self.shop_product_id, self.warehouse_id_source)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub status: TransferStatus,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl HistoryEntry {
    pub fn new(status: TransferStatus, note: Option<String>) -> Self {
        Self {
            status,
            timestamp: Utc::now(),
            note,
        }
    }
}

/// Persisted transfer with its append-only history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRecord {
    pub id: TransferId,
    pub shop_product_id: i64,
    pub stock_to_transfer: i64,
    pub warehouse_id_source: i64,
    pub warehouse_id_destination: i64,
    pub status: TransferStatus,
    pub history: Vec<HistoryEntry>,
    /// Reconciliation re-drives so far
    pub retry_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TransferRecord {
    /// Build an uncommitted record in CREATED with a fresh id
    pub fn new(req: &TransferRequest) -> Self {
        let now = Utc::now();
        Self {
            id: TransferId::new(),
            shop_product_id: req.shop_product_id,
            stock_to_transfer: req.stock_to_transfer,
            warehouse_id_source: req.warehouse_id_source,
            warehouse_id_destination: req.warehouse_id_destination,
            status: TransferStatus::Created,
            history: Vec::new(),
            retry_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to `next` and append the matching history entry
    pub fn transition(
        &mut self,
        next: TransferStatus,
        note: Option<String>,
    ) -> Result<(), TransferError> {
        if !self.status.can_transition_to(next) {
            return Err(TransferError::InvalidStateTransition(format!(
                "{} -> {} for transfer {}",
                self.status, next, self.id
            )));
        }
        let entry = HistoryEntry::new(next, note);
        self.updated_at = entry.timestamp;
        self.status = next;
        self.history.push(entry);
        Ok(())
    }

    pub fn source_key(&self) -> WarehouseStockKey {
        WarehouseStockKey::new(self.shop_product_id, self.warehouse_id_source)
    }

    pub fn destination_key(&self) -> WarehouseStockKey {
        WarehouseStockKey::new(self.shop_product_id, self.warehouse_id_destination)
    }
}
