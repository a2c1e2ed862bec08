//! Stock Transfer - inter-warehouse stock moves over an at-least-once queue
//!
//! # Modules
//!
//! - [`config`] - YAML application config
//! - [`logging`] - tracing subscriber setup
//! - [`db`] - PostgreSQL pool and schema bootstrap
//! - [`queue`] - Durable and in-memory queue channels
//! - [`transfer`] - Reservation, decrement, completion and revert workflow
//! - [`gateway`] - HTTP trigger and status endpoints

pub mod config;
pub mod db;
pub mod gateway;
pub mod logging;
pub mod queue;
pub mod transfer;

// Convenient re-exports at crate root
pub use config::AppConfig;
pub use queue::{MemoryQueue, PgQueue, QueueChannel};
pub use transfer::{
    TransferError, TransferId, TransferOrchestrator, TransferRecord, TransferRequest,
    TransferStatus,
};
