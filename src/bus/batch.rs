//! Queue-style backend: batched intake feeding a bounded worker pool.
//!
//! Three roles coordinate through bounded channels:
//! 1. intake — a single reader receives deliveries from the push subscription
//!    into an in-memory batch;
//! 2. batcher — flushes the batch to the work channel when it reaches
//!    [`BATCH_SIZE`], when the flush timer ticks and the batch is non-empty,
//!    or on shutdown (final drain before closing the work channel);
//! 3. worker pool — [`WORKERS`] tasks drain the work channel; each decodes,
//!    runs the handler, then acks on success or nacks on failure (including
//!    decode failure), driving broker redelivery.
//!
//! No ordering guarantee once messages enter the pool. `run` returns only
//! after the final drain and after every worker has been joined, so no
//! message is silently dropped mid-shutdown.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::bus::{Consumer, Message, MessageHandler, Shutdown};
use crate::error::{AgentError, BusError};

/// Flush the batch once it holds this many deliveries.
pub const BATCH_SIZE: usize = 50;

/// Flush a non-empty batch at least this often.
pub const FLUSH_INTERVAL: Duration = Duration::from_millis(100);

/// Fixed worker pool size.
pub const WORKERS: usize = 4;

/// Upper bound on a single message's handling time.
const HANDLE_TIMEOUT: Duration = Duration::from_secs(10);

/// A raw delivery from the push subscription. The payload is the JSON
/// encoding of a wire message envelope.
#[derive(Debug, Clone)]
pub struct QueueDelivery {
    pub id: u64,
    pub payload: Vec<u8>,
}

/// Client for a push/ack-style queue broker.
#[async_trait]
pub trait QueueBroker: Send + Sync {
    /// Receive the next delivery. `Ok(None)` means the subscription closed.
    /// Must be cancel-safe: dropping the future must not lose a delivery.
    async fn recv(&self) -> Result<Option<QueueDelivery>, BusError>;

    /// Positively acknowledge a processed delivery.
    async fn ack(&self, delivery: &QueueDelivery) -> Result<(), BusError>;

    /// Negatively acknowledge: the broker redelivers with its backoff policy.
    async fn nack(&self, delivery: &QueueDelivery);
}

/// Batching, multi-worker consumer over a [`QueueBroker`].
pub struct BatchConsumer<B> {
    broker: Arc<B>,
    topic: String,
    batch_size: usize,
    flush_interval: Duration,
    workers: usize,
}

impl<B: QueueBroker + 'static> BatchConsumer<B> {
    pub fn new(broker: Arc<B>, topic: impl Into<String>) -> Self {
        Self {
            broker,
            topic: topic.into(),
            batch_size: BATCH_SIZE,
            flush_interval: FLUSH_INTERVAL,
            workers: WORKERS,
        }
    }

    /// Override the flush thresholds and pool size (tests, tuning).
    pub fn with_limits(mut self, batch_size: usize, flush_interval: Duration, workers: usize) -> Self {
        self.batch_size = batch_size;
        self.flush_interval = flush_interval;
        self.workers = workers;
        self
    }

    /// Intake/batch/dispatch until shutdown, then drain and join the pool.
    pub async fn run(self, shutdown: Shutdown, handler: Arc<dyn MessageHandler>) {
        let (work_tx, work_rx) = flume::bounded::<QueueDelivery>(self.workers * 10);

        let mut pool = Vec::with_capacity(self.workers);
        for id in 0..self.workers {
            pool.push(tokio::spawn(worker(
                id,
                self.topic.clone(),
                Arc::clone(&self.broker),
                work_rx.clone(),
                Arc::clone(&handler),
            )));
        }
        drop(work_rx);

        let mut batch: Vec<QueueDelivery> = Vec::with_capacity(self.batch_size);
        let mut flush_tick = tokio::time::interval(self.flush_interval);
        flush_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!(topic = %self.topic, "consumer shutting down");
                    break;
                }

                received = self.broker.recv() => match received {
                    Ok(Some(delivery)) => {
                        batch.push(delivery);
                        // Flush on batch full.
                        if batch.len() >= self.batch_size {
                            flush(&work_tx, &mut batch).await;
                        }
                    }
                    Ok(None) => {
                        info!(topic = %self.topic, "subscription closed");
                        break;
                    }
                    Err(e) => {
                        warn!(topic = %self.topic, error = %e, "error receiving message");
                    }
                },

                // Flush on timer tick.
                _ = flush_tick.tick() => {
                    if !batch.is_empty() {
                        flush(&work_tx, &mut batch).await;
                    }
                }
            }
        }

        // Final drain: whatever accumulated is pushed before the work channel
        // closes, then the pool is joined. In-flight deliveries may still be
        // redelivered after a restart; none are dropped here.
        flush(&work_tx, &mut batch).await;
        drop(work_tx);
        join_all(pool).await;

        debug!(topic = %self.topic, "batch consumer stopped");
    }
}

#[async_trait]
impl<B: QueueBroker + 'static> Consumer for BatchConsumer<B> {
    async fn run(self: Box<Self>, shutdown: Shutdown, handler: Arc<dyn MessageHandler>) {
        BatchConsumer::run(*self, shutdown, handler).await;
    }
}

/// Push the whole batch to the work channel and clear it. A batch is never
/// partially flushed.
async fn flush(work_tx: &flume::Sender<QueueDelivery>, batch: &mut Vec<QueueDelivery>) {
    for delivery in batch.drain(..) {
        if work_tx.send_async(delivery).await.is_err() {
            // Workers are gone; nothing was acked, the broker redelivers.
            return;
        }
    }
}

async fn worker<B: QueueBroker>(
    id: usize,
    topic: String,
    broker: Arc<B>,
    work_rx: flume::Receiver<QueueDelivery>,
    handler: Arc<dyn MessageHandler>,
) {
    debug!(worker = id, topic = %topic, "worker started");

    while let Ok(delivery) = work_rx.recv_async().await {
        if let Err(e) = handle_delivery(&*broker, &delivery, &*handler).await {
            warn!(worker = id, topic = %topic, error = %e, "error processing message");
        }
    }

    debug!(worker = id, topic = %topic, "worker stopped");
}

/// Decode, handle, then ack or nack one delivery.
async fn handle_delivery<B: QueueBroker>(
    broker: &B,
    delivery: &QueueDelivery,
    handler: &dyn MessageHandler,
) -> Result<(), AgentError> {
    let msg = match decode_wire(&delivery.payload) {
        Ok(msg) => msg,
        Err(e) => {
            broker.nack(delivery).await;
            return Err(e);
        }
    };

    match tokio::time::timeout(HANDLE_TIMEOUT, handler.handle(msg)).await {
        Ok(Ok(())) => {
            if let Err(e) = broker.ack(delivery).await {
                broker.nack(delivery).await;
                return Err(AgentError::Bus(e));
            }
            Ok(())
        }
        Ok(Err(e)) => {
            broker.nack(delivery).await;
            Err(e)
        }
        Err(_) => {
            broker.nack(delivery).await;
            Err(AgentError::Timeout(HANDLE_TIMEOUT))
        }
    }
}

/// Wire envelope carried by queue deliveries.
#[derive(Deserialize)]
struct WireMessage {
    #[serde(rename = "Key", default)]
    key: Vec<String>,
    #[serde(rename = "Topic", default)]
    topic: String,
    #[serde(rename = "Value")]
    value: serde_json::Value,
}

fn decode_wire(payload: &[u8]) -> Result<Message, AgentError> {
    let wire: WireMessage = serde_json::from_slice(payload).map_err(|e| AgentError::Decode {
        event: "wire message",
        reason: e.to_string(),
    })?;

    Ok(Message {
        topic: wire.topic,
        key: wire.key,
        payload: serde_json::to_vec(&wire.value).unwrap_or_default(),
    })
}
