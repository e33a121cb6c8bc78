//! Log-style backend: single-threaded fetch/process/commit loop.
//!
//! Strict per-partition ordering, sequential handling, at-least-once via
//! delayed commit: the offset advances only after the handler succeeds, so a
//! failed message is redelivered after a crash/restart. Downstream logic must
//! tolerate duplicates.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::bus::{Consumer, Message, MessageHandler, Shutdown};
use crate::error::BusError;

/// How long a single fetch blocks before retrying. A timeout is not an error.
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// A record fetched from a log partition, with the position to commit.
#[derive(Debug, Clone)]
pub struct LogRecord {
    pub message: Message,
    pub partition: i32,
    pub offset: u64,
}

/// Client for an offset-committing, partitioned log broker.
#[async_trait]
pub trait LogBroker: Send {
    /// Fetch the next uncommitted record, blocking up to `timeout`.
    /// `Ok(None)` means the timeout elapsed with nothing to deliver.
    /// Must be cancel-safe: dropping the future must not lose a record.
    async fn fetch(&mut self, timeout: Duration) -> Result<Option<LogRecord>, BusError>;

    /// Durably advance the committed offset past `record`.
    async fn commit(&mut self, record: &LogRecord) -> Result<(), BusError>;
}

/// Sequential consumer over a [`LogBroker`].
pub struct LogConsumer<B> {
    broker: B,
    topic: String,
}

impl<B: LogBroker> LogConsumer<B> {
    pub fn new(broker: B, topic: impl Into<String>) -> Self {
        Self {
            broker,
            topic: topic.into(),
        }
    }

    /// Fetch/handle/commit until shutdown.
    ///
    /// Shutdown is only observed between messages: a handler that has started
    /// runs to completion and commits, it is never abandoned mid-flight.
    pub async fn run(mut self, shutdown: Shutdown, handler: Arc<dyn MessageHandler>) {
        debug!(topic = %self.topic, "log consumer started");

        while !shutdown.is_cancelled() {
            let record = tokio::select! {
                _ = shutdown.cancelled() => break,
                fetched = self.broker.fetch(FETCH_TIMEOUT) => match fetched {
                    Ok(Some(record)) => record,
                    // Fetch timeout: nothing to deliver, retry.
                    Ok(None) => continue,
                    Err(e) => {
                        warn!(topic = %self.topic, error = %e, "error fetching message");
                        continue;
                    }
                },
            };

            if let Err(e) = handler.handle(record.message.clone()).await {
                // Offset stays put: the record is redelivered on the next fetch.
                warn!(
                    topic = %self.topic,
                    partition = record.partition,
                    offset = record.offset,
                    error = %e,
                    "error handling message; offset not committed"
                );
                continue;
            }

            if let Err(e) = self.broker.commit(&record).await {
                // At-least-once: the handled record may come around again.
                warn!(
                    topic = %self.topic,
                    partition = record.partition,
                    offset = record.offset,
                    error = %e,
                    "error committing message"
                );
            }
        }

        debug!(topic = %self.topic, "log consumer stopped");
    }
}

#[async_trait]
impl<B: LogBroker + 'static> Consumer for LogConsumer<B> {
    async fn run(self: Box<Self>, shutdown: Shutdown, handler: Arc<dyn MessageHandler>) {
        LogConsumer::run(*self, shutdown, handler).await;
    }
}
