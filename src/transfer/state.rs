//! Transfer status definitions
//!
//! Status IDs are stored as SMALLINT in `transfer_products_tb`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Transfer lifecycle status
///
/// Terminal states: COMPLETED (20), REVERTED (-10)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(i16)]
pub enum TransferStatus {
    /// Built in memory, not yet committed. Never persisted.
    Created = 0,

    /// Shop-product stock reserved and intent published
    InTransit = 10,

    /// Terminal: source warehouse debited, destination credited
    Completed = 20,

    /// Terminal: source could not cover the quantity, reservation restored
    Reverted = -10,
}

impl TransferStatus {
    /// Check if this is a terminal state (no more transitions possible)
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransferStatus::Completed | TransferStatus::Reverted)
    }

    /// Persisted and still waiting for the consumer
    #[inline]
    pub fn is_pending(&self) -> bool {
        matches!(self, TransferStatus::InTransit)
    }

    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(TransferStatus::Created),
            10 => Some(TransferStatus::InTransit),
            20 => Some(TransferStatus::Completed),
            -10 => Some(TransferStatus::Reverted),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::Created => "CREATED",
            TransferStatus::InTransit => "IN_TRANSIT",
            TransferStatus::Completed => "COMPLETED",
            TransferStatus::Reverted => "REVERTED",
        }
    }

    /// Allowed edges: CREATED → IN_TRANSIT → {COMPLETED, REVERTED}
    pub fn can_transition_to(&self, next: TransferStatus) -> bool {
        matches!(
            (self, next),
            (TransferStatus::Created, TransferStatus::InTransit)
                | (TransferStatus::InTransit, TransferStatus::Completed)
                | (TransferStatus::InTransit, TransferStatus::Reverted)
        )
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<i16> for TransferStatus {
    type Error = ();

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        TransferStatus::from_id(value).ok_or(())
    }
}
