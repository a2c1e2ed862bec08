//! Transfer API Layer
//!
//! Request/response DTOs and error mapping for the HTTP trigger. Validates
//! the request shape before the orchestrator validates it again.

use axum::http::StatusCode;
use serde::{Deserialize, Serialize};

use super::error::TransferError;
use super::orchestrator::TransferOrchestrator;
use super::types::{HistoryEntry, TransferId, TransferRecord, TransferRequest};

// ============================================================================
// API Request/Response Types
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct TransferApiRequest {
    pub shop_product_id: i64,
    pub stock_to_transfer: i64,
    pub warehouse_id_source: i64,
    pub warehouse_id_destination: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryApiEntry {
    pub status: String,
    /// Milliseconds since epoch
    pub timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl From<&HistoryEntry> for HistoryApiEntry {
    fn from(entry: &HistoryEntry) -> Self {
        Self {
            status: entry.status.to_string(),
            timestamp: entry.timestamp.timestamp_millis(),
            note: entry.note.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransferApiResponse {
    pub transfer_id: String,
    pub shop_product_id: i64,
    pub stock_to_transfer: i64,
    pub warehouse_id_source: i64,
    pub warehouse_id_destination: i64,
    pub status: String,
    pub retry_count: i32,
    pub history: Vec<HistoryApiEntry>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl From<&TransferRecord> for TransferApiResponse {
    fn from(record: &TransferRecord) -> Self {
        Self {
            transfer_id: record.id.to_string(),
            shop_product_id: record.shop_product_id,
            stock_to_transfer: record.stock_to_transfer,
            warehouse_id_source: record.warehouse_id_source,
            warehouse_id_destination: record.warehouse_id_destination,
            status: record.status.to_string(),
            retry_count: record.retry_count,
            history: record.history.iter().map(HistoryApiEntry::from).collect(),
            created_at: record.created_at.timestamp_millis(),
            updated_at: record.updated_at.timestamp_millis(),
        }
    }
}

/// Unified API response wrapper
///
/// - code: 0 = success, non-zero = error code
/// - msg: short message description
/// - data: payload on success
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub code: i32,
    pub msg: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            code: 0,
            msg: "ok".to_string(),
            data: Some(data),
        }
    }

    pub fn error(code: i32, msg: impl Into<String>) -> ApiResponse<()> {
        ApiResponse {
            code,
            msg: msg.into(),
            data: None,
        }
    }
}

// ============================================================================
// Error Codes
// ============================================================================

pub mod error_codes {
    pub const INVALID_PARAMETER: i32 = -1001;
    pub const INVALID_QUANTITY: i32 = -1002;
    pub const SAME_WAREHOUSE: i32 = -1004;
    pub const INSUFFICIENT_STOCK: i32 = -2001;
    pub const SHOP_PRODUCT_NOT_FOUND: i32 = -2002;
    pub const WAREHOUSE_STOCK_NOT_FOUND: i32 = -2003;
    pub const SERVICE_UNAVAILABLE: i32 = -5001;
    pub const INTERNAL_ERROR: i32 = -5000;
    pub const TRANSFER_NOT_FOUND: i32 = -6001;
    pub const PUBLISH_DEFERRED: i32 = -6003;
    pub const RESERVATION_UNKNOWN: i32 = -6004;
}

pub type ApiError = (StatusCode, ApiResponse<()>);

/// Map TransferError to (StatusCode, error_code, message)
pub fn map_error(e: &TransferError) -> (StatusCode, i32, String) {
    let status =
        StatusCode::from_u16(e.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    let code = match e {
        TransferError::InvalidQuantity(_) => error_codes::INVALID_QUANTITY,
        TransferError::SameWarehouse(_) => error_codes::SAME_WAREHOUSE,
        TransferError::InvalidRequest(_) => error_codes::INVALID_PARAMETER,
        TransferError::InsufficientStock { .. } => error_codes::INSUFFICIENT_STOCK,
        TransferError::ShopProductNotFound(_) => error_codes::SHOP_PRODUCT_NOT_FOUND,
        TransferError::WarehouseStockNotFound(_) => error_codes::WAREHOUSE_STOCK_NOT_FOUND,
        TransferError::TransferNotFound(_) => error_codes::TRANSFER_NOT_FOUND,
        TransferError::PublishDeferred(_) => error_codes::PUBLISH_DEFERRED,
        TransferError::ReservationUnknown(_) => error_codes::RESERVATION_UNKNOWN,
        TransferError::QueueError(_) | TransferError::Timeout(_) => {
            error_codes::SERVICE_UNAVAILABLE
        }
        TransferError::DatabaseError(_)
        | TransferError::InvalidStateTransition(_)
        | TransferError::Serialization(_) => error_codes::INTERNAL_ERROR,
    };

    (status, code, e.to_string())
}

fn to_api_error(e: &TransferError) -> ApiError {
    let (status, code, msg) = map_error(e);
    (status, ApiResponse::<()>::error(code, msg))
}

fn validate_request(req: &TransferApiRequest) -> Result<TransferRequest, TransferError> {
    if req.shop_product_id <= 0 {
        return Err(TransferError::InvalidRequest(
            "shop_product_id must be positive".to_string(),
        ));
    }
    if req.warehouse_id_source <= 0 || req.warehouse_id_destination <= 0 {
        return Err(TransferError::InvalidRequest(
            "warehouse ids must be positive".to_string(),
        ));
    }

    let core = TransferRequest {
        shop_product_id: req.shop_product_id,
        stock_to_transfer: req.stock_to_transfer,
        warehouse_id_source: req.warehouse_id_source,
        warehouse_id_destination: req.warehouse_id_destination,
    };
    core.validate()?;
    Ok(core)
}

// ============================================================================
// Handlers
// ============================================================================

/// Returns 200 with the record, or 202 with the record and
/// `PUBLISH_DEFERRED` when the reservation stands but the intent is left to
/// the reconciliation worker.
pub async fn create_transfer(
    orchestrator: &TransferOrchestrator,
    req: TransferApiRequest,
) -> Result<(StatusCode, ApiResponse<TransferApiResponse>), ApiError> {
    let core = validate_request(&req).map_err(|e| to_api_error(&e))?;

    match orchestrator.initiate(core).await {
        Ok(record) => Ok((
            StatusCode::OK,
            ApiResponse::success(TransferApiResponse::from(&record)),
        )),
        Err(e @ TransferError::PublishDeferred(id)) => {
            let (status, code, msg) = map_error(&e);
            let record = orchestrator.get(id).await.map_err(|lookup| {
                tracing::error!(transfer_id = %id, error = %lookup, "Deferred transfer lookup failed");
                to_api_error(&e)
            })?;
            Ok((
                status,
                ApiResponse {
                    code,
                    msg,
                    data: Some(TransferApiResponse::from(&record)),
                },
            ))
        }
        Err(e) => {
            if !matches!(e.http_status(), 400 | 404 | 422) {
                tracing::error!(error = %e, code = e.code(), "Transfer initiation failed");
            }
            Err(to_api_error(&e))
        }
    }
}

pub async fn get_transfer_status(
    orchestrator: &TransferOrchestrator,
    transfer_id: &str,
) -> Result<TransferApiResponse, ApiError> {
    let id: TransferId = transfer_id.parse().map_err(|_| {
        (
            StatusCode::BAD_REQUEST,
            ApiResponse::<()>::error(error_codes::INVALID_PARAMETER, "Invalid transfer id format"),
        )
    })?;

    let record = orchestrator.get(id).await.map_err(|e| to_api_error(&e))?;
    Ok(TransferApiResponse::from(&record))
}
