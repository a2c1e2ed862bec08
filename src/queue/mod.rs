//! Queue Channel
//!
//! Named, at-least-once message channel between the transfer producer and a
//! single logical consumer group.
//!
//! # Contract
//!
//! - `publish` serializes and enqueues synchronously; a failure is returned to
//!   the caller. A message whose idempotency key is still pending is not
//!   enqueued a second time.
//! - `subscribe` registers exactly one handler. Each delivery must be
//!   explicitly acknowledged; `Nack`, a handler panic, or a handler timeout
//!   puts the message back for redelivery.
//! - `close` stops new deliveries, gives an in-flight handler a bounded grace
//!   period, aborts it afterwards and releases the channel.
//!
//! Ordering is FIFO per queue on a best-effort basis only; redelivered
//! messages go to the back.

pub mod consumer;
pub mod memory;
pub mod postgres;

pub use consumer::ConsumerConfig;
pub use memory::MemoryQueue;
pub use postgres::PgQueue;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum QueueError {
    #[error("Queue {0} is closed")]
    Closed(String),

    #[error("Queue {0} already has a subscriber")]
    AlreadySubscribed(String),

    #[error("Payload serialization failed: {0}")]
    Serialization(String),

    #[error("Queue storage error: {0}")]
    Storage(String),

    #[error("Queue operation timed out after {0:?}")]
    Timeout(Duration),
}

impl From<sqlx::Error> for QueueError {
    fn from(e: sqlx::Error) -> Self {
        QueueError::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(e: serde_json::Error) -> Self {
        QueueError::Serialization(e.to_string())
    }
}

/// A message handed to a subscriber
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Broker-assigned id, unique per queue
    pub delivery_id: i64,
    pub idempotency_key: String,
    pub payload: Vec<u8>,
    /// 1 on first delivery, incremented on each redelivery
    pub attempt: u32,
}

impl Delivery {
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.payload)
    }

    pub fn is_redelivery(&self) -> bool {
        self.attempt > 1
    }
}

/// Handler verdict for one delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Processed (successfully or with a terminal business outcome); drop it
    Ack,
    /// Not processed; redeliver
    Nack,
}

#[async_trait]
pub trait DeliveryHandler: Send + Sync + 'static {
    async fn handle(&self, delivery: &Delivery) -> Disposition;
}

#[async_trait]
pub trait QueueChannel: Send + Sync {
    fn name(&self) -> &str;

    /// Whether published messages survive a restart of the process
    fn is_durable(&self) -> bool;

    async fn publish_bytes(&self, idempotency_key: &str, payload: Vec<u8>)
    -> Result<(), QueueError>;

    async fn subscribe(&self, handler: Arc<dyn DeliveryHandler>) -> Result<(), QueueError>;

    /// Stop deliveries and release the channel. Returns false when an
    /// in-flight handler had to be aborted.
    async fn close(&self, grace: Duration) -> Result<bool, QueueError>;
}

/// Serialize `payload` as JSON and publish it, bounded by `limit`
pub async fn publish_json<T: Serialize + ?Sized>(
    queue: &dyn QueueChannel,
    idempotency_key: &str,
    payload: &T,
    limit: Duration,
) -> Result<(), QueueError> {
    let body = serde_json::to_vec(payload)?;
    tokio::time::timeout(limit, queue.publish_bytes(idempotency_key, body))
        .await
        .map_err(|_| QueueError::Timeout(limit))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Ping {
        seq: u32,
    }

    #[test]
    fn test_delivery_decode() {
        let delivery = Delivery {
            delivery_id: 1,
            idempotency_key: "k".to_string(),
            payload: br#"{"seq":7}"#.to_vec(),
            attempt: 1,
        };
        assert_eq!(delivery.decode::<Ping>().unwrap(), Ping { seq: 7 });
        assert!(!delivery.is_redelivery());
    }

    #[test]
    fn test_delivery_decode_garbage() {
        let delivery = Delivery {
            delivery_id: 1,
            idempotency_key: "k".to_string(),
            payload: b"not json".to_vec(),
            attempt: 2,
        };
        assert!(delivery.decode::<Ping>().is_err());
        assert!(delivery.is_redelivery());
    }

    #[tokio::test]
    async fn test_publish_json_roundtrip() {
        let queue = MemoryQueue::new("ping", ConsumerConfig::default());
        publish_json(&queue, "a", &Ping { seq: 1 }, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(queue.pending_len().await, 1);
    }

    #[tokio::test]
    async fn test_publish_json_on_closed_queue() {
        let queue = MemoryQueue::new("ping", ConsumerConfig::default());
        queue.close(Duration::from_millis(10)).await.unwrap();
        let result = publish_json(&queue, "a", &Ping { seq: 1 }, Duration::from_secs(1)).await;
        assert!(matches!(result, Err(QueueError::Closed(_))));
    }
}
