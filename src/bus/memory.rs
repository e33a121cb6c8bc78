//! In-process broker for single-process runs and tests.
//!
//! Keeps an append-only log per topic (log driver: per-consumer committed
//! offsets, redelivery of uncommitted records) and a delivery queue per topic
//! (queue driver: competing consumers, redelivery on nack). Network broker
//! clients are external collaborators plugged in behind the same
//! [`LogBroker`]/[`QueueBroker`] seams.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::time::Instant;

use crate::bus::batch::{BatchConsumer, QueueBroker, QueueDelivery};
use crate::bus::log::{LogBroker, LogConsumer, LogRecord};
use crate::bus::{BusDriver, Consumer, Message, MessageBus};
use crate::error::BusError;

const POLL_INTERVAL: Duration = Duration::from_millis(5);

#[derive(Default)]
struct TopicState {
    /// Append-only record log: (key, payload).
    log: Vec<(Vec<String>, Vec<u8>)>,
    /// Pending queue deliveries (wire envelopes).
    queue: VecDeque<QueueDelivery>,
    next_delivery_id: u64,
    acked: u64,
}

type Topics = Arc<Mutex<HashMap<String, TopicState>>>;

/// Single-process [`MessageBus`] serving either driver.
pub struct MemoryBus {
    driver: BusDriver,
    topics: Topics,
}

impl MemoryBus {
    pub fn new(driver: BusDriver) -> Self {
        Self {
            driver,
            topics: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Number of records appended to a topic's log.
    pub fn log_len(&self, topic: &str) -> usize {
        self.topics
            .lock()
            .unwrap()
            .get(topic)
            .map_or(0, |t| t.log.len())
    }

    /// Number of queue deliveries acked on a topic.
    pub fn acked(&self, topic: &str) -> u64 {
        self.topics
            .lock()
            .unwrap()
            .get(topic)
            .map_or(0, |t| t.acked)
    }
}

#[async_trait]
impl MessageBus for MemoryBus {
    fn consumer(&self, topic: &str) -> Result<Box<dyn Consumer>, BusError> {
        match self.driver {
            BusDriver::Log => {
                let broker = MemoryLogBroker {
                    topics: Arc::clone(&self.topics),
                    topic: topic.to_string(),
                    committed: 0,
                };
                Ok(Box::new(LogConsumer::new(broker, topic)))
            }
            BusDriver::Queue => {
                let broker = MemoryQueueBroker {
                    topics: Arc::clone(&self.topics),
                    topic: topic.to_string(),
                };
                Ok(Box::new(BatchConsumer::new(Arc::new(broker), topic)))
            }
        }
    }

    async fn publish(
        &self,
        topic: &str,
        key: Vec<String>,
        payload: Vec<u8>,
    ) -> Result<(), BusError> {
        let value: serde_json::Value =
            serde_json::from_slice(&payload).map_err(|e| BusError::Publish {
                topic: topic.to_string(),
                reason: format!("payload is not JSON: {e}"),
            })?;
        let envelope = serde_json::to_vec(&json!({
            "Key": key,
            "Topic": topic,
            "Value": value,
        }))
        .map_err(|e| BusError::Publish {
            topic: topic.to_string(),
            reason: e.to_string(),
        })?;

        let mut topics = self.topics.lock().unwrap();
        let state = topics.entry(topic.to_string()).or_default();
        state.log.push((key, payload));
        let id = state.next_delivery_id;
        state.next_delivery_id += 1;
        state.queue.push_back(QueueDelivery {
            id,
            payload: envelope,
        });
        Ok(())
    }
}

/// Log driver: reads at this consumer's committed offset, so an uncommitted
/// record is fetched again.
struct MemoryLogBroker {
    topics: Topics,
    topic: String,
    committed: u64,
}

#[async_trait]
impl LogBroker for MemoryLogBroker {
    async fn fetch(&mut self, timeout: Duration) -> Result<Option<LogRecord>, BusError> {
        let deadline = Instant::now() + timeout;
        loop {
            {
                let topics = self.topics.lock().unwrap();
                if let Some(state) = topics.get(&self.topic) {
                    if let Some((key, payload)) = state.log.get(self.committed as usize) {
                        return Ok(Some(LogRecord {
                            message: Message {
                                topic: self.topic.clone(),
                                key: key.clone(),
                                payload: payload.clone(),
                            },
                            partition: 0,
                            offset: self.committed,
                        }));
                    }
                }
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn commit(&mut self, record: &LogRecord) -> Result<(), BusError> {
        self.committed = record.offset + 1;
        Ok(())
    }
}

/// Queue driver: competing consumers pop from the shared topic queue; a nack
/// requeues the delivery.
struct MemoryQueueBroker {
    topics: Topics,
    topic: String,
}

#[async_trait]
impl QueueBroker for MemoryQueueBroker {
    async fn recv(&self) -> Result<Option<QueueDelivery>, BusError> {
        loop {
            let popped = {
                let mut topics = self.topics.lock().unwrap();
                topics
                    .get_mut(&self.topic)
                    .and_then(|state| state.queue.pop_front())
            };
            if let Some(delivery) = popped {
                return Ok(Some(delivery));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn ack(&self, _delivery: &QueueDelivery) -> Result<(), BusError> {
        let mut topics = self.topics.lock().unwrap();
        if let Some(state) = topics.get_mut(&self.topic) {
            state.acked += 1;
        }
        Ok(())
    }

    async fn nack(&self, delivery: &QueueDelivery) {
        let mut topics = self.topics.lock().unwrap();
        if let Some(state) = topics.get_mut(&self.topic) {
            state.queue.push_back(delivery.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};

    use super::*;
    use crate::bus::{MessageHandler, Shutdown};
    use crate::error::AgentError;

    struct Collector {
        handled: AtomicU64,
    }

    #[async_trait]
    impl MessageHandler for Collector {
        async fn handle(&self, msg: Message) -> Result<(), AgentError> {
            let value: serde_json::Value =
                serde_json::from_slice(&msg.payload).map_err(|e| AgentError::Decode {
                    event: "test",
                    reason: e.to_string(),
                })?;
            assert!(value.get("n").is_some());
            self.handled.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    async fn publish_n(bus: &MemoryBus, topic: &str, n: u64) {
        for i in 0..n {
            bus.publish(
                topic,
                vec![i.to_string()],
                format!(r#"{{"n":{i}}}"#).into_bytes(),
            )
            .await
            .unwrap();
        }
    }

    #[tokio::test]
    async fn log_driver_delivers_published_messages_in_order() {
        let bus = MemoryBus::new(BusDriver::Log);
        publish_n(&bus, "purchases", 5).await;

        let handler = Arc::new(Collector {
            handled: AtomicU64::new(0),
        });
        let consumer = bus.consumer("purchases").unwrap();

        let (signal, shutdown) = Shutdown::new();
        let h = Arc::clone(&handler);
        let task = tokio::spawn(consumer.run(shutdown, h));

        tokio::time::timeout(Duration::from_secs(5), async {
            while handler.handled.load(Ordering::SeqCst) < 5 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("messages not delivered");
        signal.cancel();
        task.await.unwrap();

        assert_eq!(bus.log_len("purchases"), 5);
    }

    #[tokio::test]
    async fn queue_driver_acks_processed_messages() {
        let bus = MemoryBus::new(BusDriver::Queue);
        publish_n(&bus, "purchases", 8).await;

        let handler = Arc::new(Collector {
            handled: AtomicU64::new(0),
        });
        let consumer = bus.consumer("purchases").unwrap();

        let (signal, shutdown) = Shutdown::new();
        let h = Arc::clone(&handler);
        let task = tokio::spawn(consumer.run(shutdown, h));

        tokio::time::timeout(Duration::from_secs(5), async {
            while bus.acked("purchases") < 8 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("messages not acked");
        signal.cancel();
        task.await.unwrap();

        assert_eq!(handler.handled.load(Ordering::SeqCst), 8);
    }

    #[tokio::test]
    async fn non_json_payload_is_rejected_at_publish() {
        let bus = MemoryBus::new(BusDriver::Queue);
        let err = bus
            .publish("purchases", vec![], b"not json".to_vec())
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::Publish { .. }));
    }
}
