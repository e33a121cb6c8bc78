//! Message-bus abstraction with two interchangeable delivery backends.
//!
//! A [`MessageBus`] hands out a [`Consumer`] bound to a topic; nothing above
//! this boundary branches on the backend. The log-style backend
//! ([`log::LogConsumer`]) processes strictly in fetch order and commits
//! offsets after the handler succeeds. The queue-style backend
//! ([`batch::BatchConsumer`]) batches intake and fans out to a bounded worker
//! pool with per-message ack/nack. Both give at-least-once delivery:
//! a failed message is redelivered, never silently dropped.

pub mod batch;
pub mod log;
pub mod memory;

pub use batch::BatchConsumer;
pub use log::LogConsumer;
pub use memory::MemoryBus;

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::error::{AgentError, BusError, ConfigError};

/// The unit of transport: a topic, an opaque key, and a byte payload.
///
/// The payload is opaque to the bus; decoding it into a typed event is the
/// handler's responsibility.
#[derive(Debug, Clone)]
pub struct Message {
    pub topic: String,
    pub key: Vec<String>,
    pub payload: Vec<u8>,
}

/// Per-message work supplied by an agent.
///
/// An error return is contained by the consumer: it is logged and the message
/// follows the backend's redelivery policy (offset not committed / nacked).
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, msg: Message) -> Result<(), AgentError>;
}

/// A consumer bound to a single topic.
#[async_trait]
pub trait Consumer: Send {
    /// Consume until shutdown, invoking the handler once per delivered
    /// message. Returns only after all resources opened by the consumer are
    /// released and, for the batch backend, all workers have exited.
    async fn run(self: Box<Self>, shutdown: Shutdown, handler: Arc<dyn MessageHandler>);
}

/// Factory for consumers plus the publish side agents emit through.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Create a consumer for `topic` using the configured backend.
    fn consumer(&self, topic: &str) -> Result<Box<dyn Consumer>, BusError>;

    /// Publish a payload to `topic`.
    async fn publish(&self, topic: &str, key: Vec<String>, payload: Vec<u8>)
    -> Result<(), BusError>;
}

/// Which delivery backend the bus hands out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusDriver {
    /// Offset-committing, partitioned log. Ordered, sequential, commit-after-success.
    Log,
    /// Push/ack queue. Unordered, batched, bounded-concurrency worker pool.
    Queue,
}

impl FromStr for BusDriver {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "log" | "kafka" => Ok(Self::Log),
            "queue" | "pulsar" => Ok(Self::Queue),
            other => Err(ConfigError::InvalidValue {
                key: "BUS_DRIVER".to_string(),
                message: format!("unknown driver {other:?} (expected \"log\" or \"queue\")"),
            }),
        }
    }
}

/// Cancellation signal threaded through every blocking call.
///
/// Cloned freely; all clones observe the same cancellation. The sending side
/// is [`ShutdownSignal`], held by the process bootstrap.
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

/// The sending side of a [`Shutdown`].
#[derive(Debug)]
pub struct ShutdownSignal {
    tx: watch::Sender<bool>,
}

impl Shutdown {
    /// Create a connected signal/handle pair.
    pub fn new() -> (ShutdownSignal, Shutdown) {
        let (tx, rx) = watch::channel(false);
        (ShutdownSignal { tx }, Shutdown { rx })
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait until cancellation is requested. Cancel-safe.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow() {
                return;
            }
            // A closed sender counts as cancellation: the bootstrap is gone.
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

impl ShutdownSignal {
    /// Request cancellation. All [`Shutdown`] clones observe it.
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}
