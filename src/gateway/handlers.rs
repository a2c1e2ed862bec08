//! HTTP handlers for the transfer trigger and status endpoints

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use super::state::AppState;
use crate::transfer::api::{self, ApiResponse, TransferApiRequest, TransferApiResponse};

type HandlerResult<T> =
    Result<(StatusCode, Json<ApiResponse<T>>), (StatusCode, Json<ApiResponse<()>>)>;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Server timestamp in milliseconds
    pub timestamp_ms: u64,
    pub version: &'static str,
}

/// GET /api/v1/health
///
/// 503 when the database is configured but does not answer.
pub async fn health_check(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<ApiResponse<HealthResponse>>) {
    let now_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);

    if let Some(db) = &state.db
        && let Err(e) = db.health_check().await
    {
        tracing::error!(error = %e, "[HEALTH] PostgreSQL ping failed");
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ApiResponse {
                code: 503,
                msg: "unavailable".to_string(),
                data: None,
            }),
        );
    }

    (
        StatusCode::OK,
        Json(ApiResponse::success(HealthResponse {
            timestamp_ms: now_ms,
            version: env!("GIT_HASH"),
        })),
    )
}

/// POST /api/v1/transfers
pub async fn create_transfer(
    State(state): State<Arc<AppState>>,
    Json(req): Json<TransferApiRequest>,
) -> HandlerResult<TransferApiResponse> {
    tracing::info!(
        shop_product_id = req.shop_product_id,
        quantity = req.stock_to_transfer,
        source = req.warehouse_id_source,
        destination = req.warehouse_id_destination,
        "Transfer requested"
    );

    match api::create_transfer(&state.orchestrator, req).await {
        Ok((status, body)) => Ok((status, Json(body))),
        Err((status, body)) => Err((status, Json(body))),
    }
}

/// GET /api/v1/transfers/{transfer_id}
pub async fn get_transfer(
    State(state): State<Arc<AppState>>,
    Path(transfer_id): Path<String>,
) -> HandlerResult<TransferApiResponse> {
    match api::get_transfer_status(&state.orchestrator, &transfer_id).await {
        Ok(resp) => Ok((StatusCode::OK, Json(ApiResponse::success(resp)))),
        Err((status, body)) => Err((status, Json(body))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{ConsumerConfig, MemoryQueue, QueueChannel};
    use crate::transfer::api::error_codes;
    use crate::transfer::{
        MemoryStockLedger, MemoryTransferStore, OrchestratorConfig, TransferOrchestrator,
        WarehouseStockKey,
    };

    async fn state(shop_stock: i64, source_stock: i64) -> Arc<AppState> {
        state_with_intents(
            shop_stock,
            source_stock,
            Arc::new(MemoryQueue::new("intents", ConsumerConfig::default())),
        )
        .await
    }

    async fn state_with_intents(
        shop_stock: i64,
        source_stock: i64,
        intents: Arc<MemoryQueue>,
    ) -> Arc<AppState> {
        let store = Arc::new(MemoryTransferStore::new());
        let ledger = Arc::new(MemoryStockLedger::new());
        store.set_shop_product_stock(1, shop_stock).await;
        ledger.set_stock(WarehouseStockKey::new(1, 10), source_stock).await;

        let orchestrator = TransferOrchestrator::new(
            store,
            ledger,
            intents,
            Arc::new(MemoryQueue::new("reverts", ConsumerConfig::default())),
            OrchestratorConfig::default(),
        );
        Arc::new(AppState::new(Arc::new(orchestrator), None))
    }

    fn body(qty: i64) -> TransferApiRequest {
        TransferApiRequest {
            shop_product_id: 1,
            stock_to_transfer: qty,
            warehouse_id_source: 10,
            warehouse_id_destination: 20,
        }
    }

    #[tokio::test]
    async fn test_health_without_database() {
        let (status, Json(resp)) = health_check(State(state(0, 0).await)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(resp.code, 0);
        assert!(resp.data.is_some());
    }

    #[tokio::test]
    async fn test_create_then_get() {
        let state = state(10, 10).await;

        let (status, Json(created)) = create_transfer(State(state.clone()), Json(body(4)))
            .await
            .unwrap();
        assert_eq!(status, StatusCode::OK);
        let created = created.data.unwrap();
        assert_eq!(created.status, "IN_TRANSIT");

        let (_, Json(fetched)) =
            get_transfer(State(state), Path(created.transfer_id.clone()))
                .await
                .unwrap();
        assert_eq!(fetched.data.unwrap(), created);
    }

    #[tokio::test]
    async fn test_create_with_deferred_publish_returns_record() {
        let intents = Arc::new(MemoryQueue::new("intents", ConsumerConfig::default()));
        intents.close(std::time::Duration::ZERO).await.unwrap();
        let state = state_with_intents(10, 10, intents).await;

        let (status, Json(resp)) = create_transfer(State(state.clone()), Json(body(4)))
            .await
            .unwrap();
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(resp.code, error_codes::PUBLISH_DEFERRED);
        let record = resp.data.expect("deferred response carries the record");
        assert_eq!(record.status, "IN_TRANSIT");

        let (_, Json(fetched)) = get_transfer(State(state), Path(record.transfer_id.clone()))
            .await
            .unwrap();
        assert_eq!(fetched.data.unwrap(), record);
    }

    #[tokio::test]
    async fn test_create_insufficient_stock() {
        let (status, Json(err)) = create_transfer(State(state(3, 10).await), Json(body(4)))
            .await
            .unwrap_err();
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(err.code, error_codes::INSUFFICIENT_STOCK);
    }

    #[tokio::test]
    async fn test_create_same_warehouse() {
        let mut req = body(4);
        req.warehouse_id_destination = req.warehouse_id_source;
        let (status, Json(err)) = create_transfer(State(state(10, 10).await), Json(req))
            .await
            .unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(err.code, error_codes::SAME_WAREHOUSE);
    }

    #[tokio::test]
    async fn test_get_unknown_and_malformed_id() {
        let state = state(10, 10).await;

        let (status, _) = get_transfer(State(state.clone()), Path("not-a-ulid".to_string()))
            .await
            .unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let unknown = crate::transfer::TransferId::new().to_string();
        let (status, Json(err)) = get_transfer(State(state), Path(unknown))
            .await
            .unwrap_err();
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(err.code, error_codes::TRANSFER_NOT_FOUND);
    }
}
