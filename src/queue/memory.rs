//! In-process queue
//!
//! Same delivery contract as [`PgQueue`](super::PgQueue) minus durability:
//! everything is lost when the process exits. Used by tests and by the
//! `memory` queue backend.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info};

use super::consumer::{ConsumerConfig, ConsumerTask, DeliverySource};
use super::{Delivery, DeliveryHandler, QueueChannel, QueueError};

#[derive(Default)]
struct Broker {
    pending: VecDeque<Delivery>,
    in_flight: HashMap<i64, Delivery>,
    /// Keys of pending or in-flight messages, for publish de-duplication
    live_keys: HashSet<String>,
    next_id: i64,
    acked: u64,
    closed: bool,
}

struct MemorySource {
    broker: Arc<Mutex<Broker>>,
    notify: Arc<Notify>,
}

#[async_trait]
impl DeliverySource for MemorySource {
    async fn next(&self) -> Result<Option<Delivery>, QueueError> {
        let mut broker = self.broker.lock().await;
        let Some(mut delivery) = broker.pending.pop_front() else {
            return Ok(None);
        };
        delivery.attempt += 1;
        broker.in_flight.insert(delivery.delivery_id, delivery.clone());
        Ok(Some(delivery))
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let mut broker = self.broker.lock().await;
        if let Some(done) = broker.in_flight.remove(&delivery.delivery_id) {
            broker.live_keys.remove(&done.idempotency_key);
            broker.acked += 1;
        }
        Ok(())
    }

    async fn nack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let mut broker = self.broker.lock().await;
        if let Some(returned) = broker.in_flight.remove(&delivery.delivery_id) {
            broker.pending.push_back(returned);
            drop(broker);
            self.notify.notify_one();
        }
        Ok(())
    }

    async fn wait(&self, idle: Duration) {
        let _ = tokio::time::timeout(idle, self.notify.notified()).await;
    }
}

pub struct MemoryQueue {
    name: String,
    broker: Arc<Mutex<Broker>>,
    notify: Arc<Notify>,
    consumer: Mutex<Option<ConsumerTask>>,
    config: ConsumerConfig,
}

impl MemoryQueue {
    pub fn new(name: impl Into<String>, config: ConsumerConfig) -> Self {
        Self {
            name: name.into(),
            broker: Arc::new(Mutex::new(Broker::default())),
            notify: Arc::new(Notify::new()),
            consumer: Mutex::new(None),
            config,
        }
    }

    /// Messages waiting for delivery
    pub async fn pending_len(&self) -> usize {
        self.broker.lock().await.pending.len()
    }

    /// Messages delivered but not yet settled
    pub async fn in_flight_len(&self) -> usize {
        self.broker.lock().await.in_flight.len()
    }

    pub async fn acked_count(&self) -> u64 {
        self.broker.lock().await.acked
    }

    /// Remove and return all pending payloads without delivering them.
    ///
    /// Lets a test play the consumer by hand, including duplicate delivery.
    pub async fn drain_pending(&self) -> Vec<Delivery> {
        let mut broker = self.broker.lock().await;
        let drained: Vec<Delivery> = broker.pending.drain(..).collect();
        for delivery in &drained {
            broker.live_keys.remove(&delivery.idempotency_key);
        }
        drained
    }

    /// Wait until nothing is pending or in flight, polling every few millis
    pub async fn wait_idle(&self, limit: Duration) -> bool {
        let poll = async {
            loop {
                {
                    let broker = self.broker.lock().await;
                    if broker.pending.is_empty() && broker.in_flight.is_empty() {
                        return;
                    }
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        };
        tokio::time::timeout(limit, poll).await.is_ok()
    }
}

#[async_trait]
impl QueueChannel for MemoryQueue {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_durable(&self) -> bool {
        false
    }

    async fn publish_bytes(
        &self,
        idempotency_key: &str,
        payload: Vec<u8>,
    ) -> Result<(), QueueError> {
        let mut broker = self.broker.lock().await;
        if broker.closed {
            return Err(QueueError::Closed(self.name.clone()));
        }
        if !broker.live_keys.insert(idempotency_key.to_string()) {
            debug!(queue = %self.name, key = %idempotency_key, "Message with key already pending, skipped");
            return Ok(());
        }

        broker.next_id += 1;
        let delivery = Delivery {
            delivery_id: broker.next_id,
            idempotency_key: idempotency_key.to_string(),
            payload,
            attempt: 0,
        };
        broker.pending.push_back(delivery);
        drop(broker);

        self.notify.notify_one();
        Ok(())
    }

    async fn subscribe(&self, handler: Arc<dyn DeliveryHandler>) -> Result<(), QueueError> {
        if self.broker.lock().await.closed {
            return Err(QueueError::Closed(self.name.clone()));
        }

        let mut consumer = self.consumer.lock().await;
        if consumer.is_some() {
            return Err(QueueError::AlreadySubscribed(self.name.clone()));
        }

        let source = Arc::new(MemorySource {
            broker: self.broker.clone(),
            notify: self.notify.clone(),
        });
        *consumer = Some(ConsumerTask::spawn(
            self.name.clone(),
            source,
            handler,
            self.config.clone(),
        ));
        Ok(())
    }

    async fn close(&self, grace: Duration) -> Result<bool, QueueError> {
        self.broker.lock().await.closed = true;

        let clean = match self.consumer.lock().await.take() {
            Some(task) => task.stop(grace).await,
            None => true,
        };

        // An aborted handler never settled its delivery; hand it back like a
        // broker would on connection loss
        let mut broker = self.broker.lock().await;
        let orphaned: Vec<i64> = broker.in_flight.keys().copied().collect();
        for id in orphaned {
            if let Some(delivery) = broker.in_flight.remove(&id) {
                broker.pending.push_front(delivery);
            }
        }

        info!(queue = %self.name, clean, pending = broker.pending.len(), "Queue closed");
        Ok(clean)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::Disposition;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast_config() -> ConsumerConfig {
        ConsumerConfig {
            poll_interval: Duration::from_millis(10),
            handler_timeout: Duration::from_millis(200),
        }
    }

    /// Records payloads; nacks the first `fail_first` invocations
    struct Recorder {
        seen: std::sync::Mutex<Vec<(String, u32)>>,
        calls: AtomicUsize,
        fail_first: usize,
    }

    impl Recorder {
        fn new(fail_first: usize) -> Arc<Self> {
            Arc::new(Self {
                seen: std::sync::Mutex::new(Vec::new()),
                calls: AtomicUsize::new(0),
                fail_first,
            })
        }
    }

    #[async_trait]
    impl DeliveryHandler for Recorder {
        async fn handle(&self, delivery: &Delivery) -> Disposition {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen
                .lock()
                .unwrap()
                .push((delivery.idempotency_key.clone(), delivery.attempt));
            if n < self.fail_first {
                Disposition::Nack
            } else {
                Disposition::Ack
            }
        }
    }

    struct Panicker;

    #[async_trait]
    impl DeliveryHandler for Panicker {
        async fn handle(&self, delivery: &Delivery) -> Disposition {
            if delivery.attempt == 1 {
                panic!("boom");
            }
            Disposition::Ack
        }
    }

    struct Sleeper(Duration);

    #[async_trait]
    impl DeliveryHandler for Sleeper {
        async fn handle(&self, _delivery: &Delivery) -> Disposition {
            tokio::time::sleep(self.0).await;
            Disposition::Ack
        }
    }

    #[tokio::test]
    async fn test_deliver_and_ack() {
        let queue = MemoryQueue::new("q", fast_config());
        let recorder = Recorder::new(0);
        queue.subscribe(recorder.clone()).await.unwrap();

        queue.publish_bytes("a", b"1".to_vec()).await.unwrap();
        queue.publish_bytes("b", b"2".to_vec()).await.unwrap();

        assert!(queue.wait_idle(Duration::from_secs(2)).await);
        assert_eq!(queue.acked_count().await, 2);
        let seen = recorder.seen.lock().unwrap().clone();
        assert_eq!(seen, vec![("a".to_string(), 1), ("b".to_string(), 1)]);

        assert!(queue.close(Duration::from_millis(100)).await.unwrap());
    }

    #[tokio::test]
    async fn test_nack_redelivers() {
        let queue = MemoryQueue::new("q", fast_config());
        let recorder = Recorder::new(2);
        queue.subscribe(recorder.clone()).await.unwrap();

        queue.publish_bytes("a", b"1".to_vec()).await.unwrap();

        assert!(queue.wait_idle(Duration::from_secs(2)).await);
        let attempts: Vec<u32> = recorder.seen.lock().unwrap().iter().map(|s| s.1).collect();
        assert_eq!(attempts, vec![1, 2, 3]);
        assert_eq!(queue.acked_count().await, 1);
    }

    #[tokio::test]
    async fn test_panicking_handler_redelivers() {
        let queue = MemoryQueue::new("q", fast_config());
        queue.subscribe(Arc::new(Panicker)).await.unwrap();

        queue.publish_bytes("a", b"1".to_vec()).await.unwrap();

        assert!(queue.wait_idle(Duration::from_secs(2)).await);
        assert_eq!(queue.acked_count().await, 1);
    }

    #[tokio::test]
    async fn test_duplicate_pending_key_skipped() {
        let queue = MemoryQueue::new("q", fast_config());
        queue.publish_bytes("a", b"1".to_vec()).await.unwrap();
        queue.publish_bytes("a", b"1".to_vec()).await.unwrap();
        assert_eq!(queue.pending_len().await, 1);

        // Once drained the key may be published again
        assert_eq!(queue.drain_pending().await.len(), 1);
        queue.publish_bytes("a", b"1".to_vec()).await.unwrap();
        assert_eq!(queue.pending_len().await, 1);
    }

    #[tokio::test]
    async fn test_single_subscriber() {
        let queue = MemoryQueue::new("q", fast_config());
        queue.subscribe(Recorder::new(0)).await.unwrap();
        let second = queue.subscribe(Recorder::new(0)).await;
        assert!(matches!(second, Err(QueueError::AlreadySubscribed(_))));
    }

    #[tokio::test]
    async fn test_close_aborts_slow_handler_and_requeues() {
        let queue = MemoryQueue::new(
            "q",
            ConsumerConfig {
                poll_interval: Duration::from_millis(10),
                handler_timeout: Duration::from_secs(30),
            },
        );
        queue
            .subscribe(Arc::new(Sleeper(Duration::from_secs(10))))
            .await
            .unwrap();
        queue.publish_bytes("a", b"1".to_vec()).await.unwrap();

        // Let the consumer pick it up
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(queue.in_flight_len().await, 1);

        let clean = queue.close(Duration::from_millis(50)).await.unwrap();
        assert!(!clean);
        assert_eq!(queue.in_flight_len().await, 0);
        assert_eq!(queue.pending_len().await, 1);

        let after = queue.publish_bytes("b", b"2".to_vec()).await;
        assert!(matches!(after, Err(QueueError::Closed(_))));
    }

    #[tokio::test]
    async fn test_close_waits_for_in_flight_handler() {
        let queue = MemoryQueue::new("q", fast_config());
        queue
            .subscribe(Arc::new(Sleeper(Duration::from_millis(50))))
            .await
            .unwrap();
        queue.publish_bytes("a", b"1".to_vec()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let clean = queue.close(Duration::from_secs(2)).await.unwrap();
        assert!(clean);
        assert_eq!(queue.acked_count().await, 1);
    }
}
