//! Stock Ledger
//!
//! Per-(shop product, warehouse) stock counters. Writes go through exactly two
//! operations, both keyed by transfer id:
//!
//! - `decrement`: atomic `stock >= qty` guarded debit. The decision (applied
//!   or refused) is journaled once per transfer and replayed on redelivery.
//! - `credit`: upsert add, journaled so a transfer credits at most once.

pub mod db;
pub mod memory;

pub use db::PgStockLedger;
pub use memory::MemoryStockLedger;

use async_trait::async_trait;
use std::fmt;

use super::error::TransferError;
use super::types::{TransferId, WarehouseStockKey};

/// Journaled operation kind, one decision per (transfer, kind)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpType {
    Decrement,
    Credit,
}

impl OpType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OpType::Decrement => "DECREMENT",
            OpType::Credit => "CREDIT",
        }
    }
}

/// Why a decrement was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refusal {
    /// Stock row exists but holds less than requested
    Insufficient { available: i64 },
    /// No stock row for the pair
    Missing,
}

impl fmt::Display for Refusal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Refusal::Insufficient { available } => write!(f, "insufficient (available {})", available),
            Refusal::Missing => write!(f, "missing"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecrementOutcome {
    /// Debited now
    Applied { remaining: i64 },
    /// Debited by an earlier delivery of the same transfer
    AlreadyApplied,
    /// Refused now; stock untouched
    Refused(Refusal),
    /// Refused by an earlier delivery of the same transfer
    AlreadyRefused(Refusal),
}

impl DecrementOutcome {
    pub fn refusal(&self) -> Option<Refusal> {
        match self {
            DecrementOutcome::Refused(r) | DecrementOutcome::AlreadyRefused(r) => Some(*r),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreditOutcome {
    Applied { balance: i64 },
    AlreadyApplied,
}

/// Journal result column values
pub(crate) mod journal {
    pub const PENDING: &str = "PENDING";
    pub const APPLIED: &str = "APPLIED";
    pub const INSUFFICIENT: &str = "INSUFFICIENT";
    pub const MISSING: &str = "MISSING";
}

/// Stock ledger port
///
/// `Err` is reserved for I/O problems; business outcomes are `Ok`.
#[async_trait]
pub trait StockLedger: Send + Sync {
    /// Current stock for the pair, `None` when no row exists
    async fn balance(&self, key: WarehouseStockKey) -> Result<Option<i64>, TransferError>;

    async fn decrement(
        &self,
        transfer_id: TransferId,
        key: WarehouseStockKey,
        quantity: i64,
    ) -> Result<DecrementOutcome, TransferError>;

    async fn credit(
        &self,
        transfer_id: TransferId,
        key: WarehouseStockKey,
        quantity: i64,
    ) -> Result<CreditOutcome, TransferError>;
}
