//! Stock Transfer service
//!
//! ```text
//! ┌──────────┐    ┌──────────────┐    ┌─────────────────┐    ┌──────────┐
//! │  HTTP    │───▶│ Orchestrator │───▶│ transfer_product│───▶│ Consumer │
//! │ Gateway  │    │  (reserve)   │    │     queue       │    │(decrement│
//! └──────────┘    └──────────────┘    └─────────────────┘    └────┬─────┘
//!                                                                 │ refused
//!                                     ┌─────────────────────────┐ ▼
//!                                     │ transfer_product_revert │◀┘
//!                                     └─────────────────────────┘
//! ```

use anyhow::Context;
use std::sync::Arc;
use tokio::sync::watch;

use stock_transfer::config::{AppConfig, QueueBackend};
use stock_transfer::db::Database;
use stock_transfer::gateway::{self, state::AppState};
use stock_transfer::queue::{ConsumerConfig, MemoryQueue, PgQueue, QueueChannel};
use stock_transfer::transfer::{
    MemoryStockLedger, MemoryTransferStore, OrchestratorConfig, PgStockLedger, PgTransferStore,
    ReconciliationWorker, StockLedger, TransferOrchestrator, TransferStore, WorkerConfig,
    close_all, subscribe_all,
};

fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

struct Backends {
    store: Arc<dyn TransferStore>,
    ledger: Arc<dyn StockLedger>,
    intents: Arc<dyn QueueChannel>,
    reverts: Arc<dyn QueueChannel>,
}

fn queue_channel(
    config: &AppConfig,
    db: Option<&Database>,
    name: &str,
) -> anyhow::Result<Arc<dyn QueueChannel>> {
    let queue = &config.queue;
    let consumer = ConsumerConfig::from(queue);
    let channel: Arc<dyn QueueChannel> = match queue.backend {
        QueueBackend::Postgres => {
            let db = db.context("queue.backend is postgres but postgres_url is not set")?;
            Arc::new(PgQueue::declare(
                db.pool().clone(),
                name,
                consumer,
                queue.visibility_timeout(),
                queue.retry_delay(),
            ))
        }
        QueueBackend::Memory => Arc::new(MemoryQueue::new(name, consumer)),
    };
    if !channel.is_durable() {
        tracing::warn!(queue = name, "Non-durable queue: undelivered messages are lost on restart");
    }
    Ok(channel)
}

fn build_backends(config: &AppConfig, db: Option<&Database>) -> anyhow::Result<Backends> {
    let intents = queue_channel(config, db, &config.queue.transfer_queue)?;
    let reverts = queue_channel(config, db, &config.queue.revert_queue)?;

    let store: Arc<dyn TransferStore>;
    let ledger: Arc<dyn StockLedger>;
    match db {
        Some(db) => {
            store = Arc::new(PgTransferStore::new(db.pool().clone()));
            ledger = Arc::new(PgStockLedger::new(db.pool().clone()));
        }
        None => {
            tracing::warn!("No postgres_url configured, running on in-memory store and ledger");
            store = Arc::new(MemoryTransferStore::new());
            ledger = Arc::new(MemoryStockLedger::new());
        }
    }

    Ok(Backends {
        store,
        ledger,
        intents,
        reverts,
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = get_env();
    let config = AppConfig::load(&env).context("failed to load config")?;
    let _log_guard = stock_transfer::logging::init_logging(&config);

    tracing::info!(env = %env, version = env!("GIT_HASH"), "Starting stock transfer service");

    let db = match &config.postgres_url {
        Some(url) => {
            let db = Database::connect(url)
                .await
                .context("failed to connect to PostgreSQL")?;
            db.migrate().await.context("schema bootstrap failed")?;
            Some(Arc::new(db))
        }
        None => None,
    };

    let backends = build_backends(&config, db.as_deref())?;
    let orchestrator = Arc::new(TransferOrchestrator::new(
        backends.store,
        backends.ledger,
        backends.intents.clone(),
        backends.reverts.clone(),
        OrchestratorConfig::from(&config.transfer),
    ));

    subscribe_all(
        orchestrator.clone(),
        backends.intents.as_ref(),
        backends.reverts.as_ref(),
    )
    .await?;

    let (worker_tx, worker_rx) = watch::channel(false);
    let worker_handle = if config.reconciliation.enabled {
        let worker = ReconciliationWorker::new(
            orchestrator.clone(),
            WorkerConfig::from(&config.reconciliation),
        );
        Some(tokio::spawn(async move { worker.run(worker_rx).await }))
    } else {
        tracing::info!("Reconciliation worker disabled");
        None
    };

    let state = Arc::new(AppState::new(orchestrator, db));
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
        }
        tracing::info!("Shutdown signal received");
    };
    let served = gateway::run_server(&config.gateway, state, shutdown).await;

    let _ = worker_tx.send(true);
    if let Some(handle) = worker_handle
        && let Err(e) = handle.await
    {
        tracing::error!(error = %e, "Reconciliation worker task failed");
    }

    let closed = close_all(
        backends.intents.as_ref(),
        backends.reverts.as_ref(),
        config.queue.close_grace(),
    )
    .await;
    for (name, result) in closed {
        match result {
            Ok(true) => tracing::info!(queue = %name, "Queue closed"),
            Ok(false) => tracing::warn!(queue = %name, "Queue closed, in-flight handler aborted"),
            Err(e) => tracing::error!(queue = %name, error = %e, "Queue close failed"),
        }
    }

    served.context("gateway server error")?;
    tracing::info!("Stock transfer service stopped");
    Ok(())
}
