//! Transfer error types

use thiserror::Error;

use super::types::{TransferId, WarehouseStockKey};
use crate::queue::QueueError;

#[derive(Error, Debug, Clone)]
pub enum TransferError {
    // === Validation Errors ===
    #[error("Quantity must be greater than zero, got {0}")]
    InvalidQuantity(i64),

    #[error("Source and destination warehouse cannot be the same ({0})")]
    SameWarehouse(i64),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    // === Not Found ===
    #[error("Shop product not found: {0}")]
    ShopProductNotFound(i64),

    #[error("Warehouse stock not found: product {} at warehouse {}", .0.shop_product_id, .0.warehouse_id)]
    WarehouseStockNotFound(WarehouseStockKey),

    #[error("Transfer not found: {0}")]
    TransferNotFound(String),

    // === Business ===
    #[error("Insufficient stock: available {available}, requested {requested}")]
    InsufficientStock { available: i64, requested: i64 },

    // === Transient I/O ===
    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Queue error: {0}")]
    QueueError(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    // === Partial commit ===
    /// Reservation is committed but the intent was not published
    #[error("Transfer {0} reserved, intent publish deferred to reconciliation")]
    PublishDeferred(TransferId),

    /// Reservation commit timed out and could not be confirmed either way
    #[error("Reservation outcome of transfer {0} unknown, left for reconciliation")]
    ReservationUnknown(TransferId),

    // === Non-retryable ===
    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl TransferError {
    pub fn code(&self) -> &'static str {
        match self {
            TransferError::InvalidQuantity(_) => "INVALID_QUANTITY",
            TransferError::SameWarehouse(_) => "SAME_WAREHOUSE",
            TransferError::InvalidRequest(_) => "INVALID_REQUEST",
            TransferError::ShopProductNotFound(_) => "SHOP_PRODUCT_NOT_FOUND",
            TransferError::WarehouseStockNotFound(_) => "WAREHOUSE_STOCK_NOT_FOUND",
            TransferError::TransferNotFound(_) => "TRANSFER_NOT_FOUND",
            TransferError::InsufficientStock { .. } => "INSUFFICIENT_STOCK",
            TransferError::DatabaseError(_) => "DATABASE_ERROR",
            TransferError::QueueError(_) => "QUEUE_ERROR",
            TransferError::Timeout(_) => "TIMEOUT",
            TransferError::PublishDeferred(_) => "PUBLISH_DEFERRED",
            TransferError::ReservationUnknown(_) => "RESERVATION_UNKNOWN",
            TransferError::InvalidStateTransition(_) => "INVALID_STATE_TRANSITION",
            TransferError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }

    /// Get HTTP status code suggestion
    pub fn http_status(&self) -> u16 {
        match self {
            TransferError::InvalidQuantity(_)
            | TransferError::SameWarehouse(_)
            | TransferError::InvalidRequest(_) => 400,
            TransferError::ShopProductNotFound(_)
            | TransferError::WarehouseStockNotFound(_)
            | TransferError::TransferNotFound(_) => 404,
            TransferError::InsufficientStock { .. } => 422,
            // Accepted: the reservation stands and will be re-driven
            TransferError::PublishDeferred(_) => 202,
            TransferError::QueueError(_) | TransferError::Timeout(_) => 503,
            TransferError::DatabaseError(_)
            | TransferError::ReservationUnknown(_)
            | TransferError::InvalidStateTransition(_)
            | TransferError::Serialization(_) => 500,
        }
    }

    /// Whether retrying the same operation may succeed without any change
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TransferError::DatabaseError(_) | TransferError::QueueError(_) | TransferError::Timeout(_)
        )
    }
}

impl From<sqlx::Error> for TransferError {
    fn from(e: sqlx::Error) -> Self {
        TransferError::DatabaseError(e.to_string())
    }
}

impl From<QueueError> for TransferError {
    fn from(e: QueueError) -> Self {
        match e {
            QueueError::Timeout(limit) => {
                TransferError::Timeout(format!("queue publish after {:?}", limit))
            }
            QueueError::Serialization(msg) => TransferError::Serialization(msg),
            other => TransferError::QueueError(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for TransferError {
    fn from(e: serde_json::Error) -> Self {
        TransferError::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_error_codes() {
        assert_eq!(TransferError::SameWarehouse(1).code(), "SAME_WAREHOUSE");
        assert_eq!(
            TransferError::InsufficientStock {
                available: 3,
                requested: 4
            }
            .code(),
            "INSUFFICIENT_STOCK"
        );
        assert_eq!(
            TransferError::PublishDeferred(TransferId::new()).code(),
            "PUBLISH_DEFERRED"
        );
    }

    #[test]
    fn test_http_status() {
        assert_eq!(TransferError::InvalidQuantity(0).http_status(), 400);
        assert_eq!(TransferError::ShopProductNotFound(9).http_status(), 404);
        assert_eq!(
            TransferError::WarehouseStockNotFound(WarehouseStockKey::new(1, 2)).http_status(),
            404
        );
        assert_eq!(
            TransferError::InsufficientStock {
                available: 0,
                requested: 1
            }
            .http_status(),
            422
        );
        assert_eq!(TransferError::Timeout("x".into()).http_status(), 503);
        assert_eq!(TransferError::DatabaseError("x".into()).http_status(), 500);
    }

    #[test]
    fn test_transient_classification() {
        assert!(TransferError::DatabaseError("x".into()).is_transient());
        assert!(TransferError::QueueError("x".into()).is_transient());
        assert!(TransferError::Timeout("x".into()).is_transient());

        assert!(!TransferError::TransferNotFound("x".into()).is_transient());
        assert!(!TransferError::PublishDeferred(TransferId::new()).is_transient());
        assert!(!TransferError::ReservationUnknown(TransferId::new()).is_transient());
        assert!(!TransferError::Serialization("x".into()).is_transient());
        assert!(!TransferError::InvalidStateTransition("x".into()).is_transient());
    }

    #[test]
    fn test_from_queue_error() {
        let e: TransferError = QueueError::Timeout(Duration::from_secs(1)).into();
        assert!(matches!(e, TransferError::Timeout(_)));

        let e: TransferError = QueueError::Closed("q".into()).into();
        assert!(matches!(e, TransferError::QueueError(_)));
        assert!(e.is_transient());

        let e: TransferError = QueueError::Serialization("bad".into()).into();
        assert!(matches!(e, TransferError::Serialization(_)));
    }

    #[test]
    fn test_display() {
        let err = TransferError::WarehouseStockNotFound(WarehouseStockKey::new(5, 1));
        assert_eq!(
            err.to_string(),
            "Warehouse stock not found: product 5 at warehouse 1"
        );
    }
}
