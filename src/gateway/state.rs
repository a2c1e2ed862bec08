use std::sync::Arc;

use crate::db::Database;
use crate::transfer::TransferOrchestrator;

/// Gateway shared state
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<TransferOrchestrator>,
    /// PostgreSQL pool, absent when running on in-memory backends
    pub db: Option<Arc<Database>>,
}

impl AppState {
    pub fn new(orchestrator: Arc<TransferOrchestrator>, db: Option<Arc<Database>>) -> Self {
        Self { orchestrator, db }
    }
}
