pub mod handlers;
pub mod state;

use axum::{
    Router,
    routing::{get, post},
};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;

use crate::config::GatewayConfig;
use state::AppState;

/// Build the HTTP router
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/v1/health", get(handlers::health_check))
        .route("/api/v1/transfers", post(handlers::create_transfer))
        .route(
            "/api/v1/transfers/{transfer_id}",
            get(handlers::get_transfer),
        )
        .with_state(state)
}

/// Start the HTTP gateway; returns once `shutdown` resolves and in-flight
/// requests have drained
pub async fn run_server(
    config: &GatewayConfig,
    state: Arc<AppState>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr).await.inspect_err(|e| {
        tracing::error!(addr = %addr, error = %e, "Failed to bind gateway listener");
    })?;

    tracing::info!(addr = %addr, "Gateway listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}
