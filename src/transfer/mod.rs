//! Inter-Warehouse Stock Transfer
//!
//! Moves a quantity of one shop product from a source warehouse to a
//! destination warehouse in two asynchronous phases:
//!
//! 1. **Initiate** (HTTP trigger): validate, reserve the quantity against the
//!    shop product's aggregate stock, persist the record IN_TRANSIT and publish
//!    a transfer intent.
//! 2. **Consume** (queue subscriber): decrement the source warehouse under a
//!    `stock >= qty` guard. On success credit the destination and complete;
//!    on refusal publish a revert that restores the reservation.
//!
//! # State Machine
//!
//! ```text
//! CREATED → IN_TRANSIT → COMPLETED
//!               ↓
//!           REVERTED
//! ```
//!
//! # Safety Invariants
//!
//! 1. **Single decision**: the source decrement for a transfer is decided once
//!    and journaled; redeliveries replay the journaled decision
//! 2. **CAS transitions**: IN_TRANSIT → terminal is a compare-and-swap, so a
//!    duplicate completion or revert is a no-op
//! 3. **Nack before commit only**: a transient error is answered with a
//!    redelivery only when nothing was committed for the delivery
//! 4. **No negative stock**: neither the reservation nor the decrement can
//!    drive a balance below zero

pub mod api;
pub mod error;
pub mod handlers;
pub mod ledger;
pub mod messages;
pub mod orchestrator;
pub mod state;
pub mod store;
pub mod types;
pub mod worker;


// Re-exports for convenience
pub use api::{TransferApiRequest, TransferApiResponse, create_transfer, get_transfer_status};
pub use error::TransferError;
pub use handlers::{close_all, subscribe_all};
pub use ledger::{MemoryStockLedger, PgStockLedger, StockLedger};
pub use messages::{RevertReason, RevertTransferProduct, TransferIntent};
pub use orchestrator::{OrchestratorConfig, TransferOrchestrator};
pub use state::TransferStatus;
pub use store::{MemoryTransferStore, PgTransferStore, TransferStore};
pub use types::{TransferId, TransferRecord, TransferRequest, WarehouseStockKey};
pub use worker::{ReconciliationWorker, WorkerConfig};
