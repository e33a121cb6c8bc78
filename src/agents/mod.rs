//! The pipeline stages: three agents behind one contract.
//!
//! An agent binds to an input topic through the bus, decodes messages into
//! its typed event, performs its domain work through the collaborator traits,
//! and optionally emits a downstream event. The concrete agent is selected by
//! a configuration-driven factory at startup; nothing else branches on the
//! agent type.

pub mod anomaly;
pub mod notification;
pub mod reasoning;

pub use anomaly::AnomalyDetectionAgent;
pub use notification::NotificationAgent;
pub use reasoning::ReasoningAgent;

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info};

use crate::bus::{MessageBus, MessageHandler, Shutdown};
use crate::error::ConfigError;
use crate::llm::CompletionProvider;
use crate::notify::Notifier;
use crate::store::FraudStore;

/// Which pipeline stage a process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentKind {
    AnomalyDetection,
    Reasoning,
    Notification,
}

impl FromStr for AgentKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "anomaly_detection" => Ok(Self::AnomalyDetection),
            "reasoning" => Ok(Self::Reasoning),
            "notification" => Ok(Self::Notification),
            other => Err(ConfigError::InvalidValue {
                key: "AGENT_TYPE".to_string(),
                message: format!("unknown agent type {other:?}"),
            }),
        }
    }
}

/// Shared dependencies handed to every agent.
///
/// The store and LLM handles are shared, read-mostly-configured resources;
/// agents never hold a lock across a call into them.
#[derive(Clone)]
pub struct AgentDeps {
    pub bus: Arc<dyn MessageBus>,
    pub store: Arc<dyn FraudStore>,
    pub llm: Arc<dyn CompletionProvider>,
    pub notifier: Arc<dyn Notifier>,
    /// Input topic this agent consumes.
    pub topic: String,
    /// Downstream topic this agent emits to, if any.
    pub output_topic: Option<String>,
}

/// A named unit of work bound to an input topic.
///
/// Per-message work lives in the [`MessageHandler`] impl; `run` owns the
/// consumer loop and any background state for the agent's lifetime.
#[async_trait]
pub trait Agent: MessageHandler {
    fn name(&self) -> &'static str;

    /// Consume the input topic until shutdown. Blocks.
    async fn run(self: Arc<Self>, shutdown: Shutdown);
}

/// Configuration-driven agent factory.
pub fn create_agent(kind: AgentKind, deps: AgentDeps) -> Arc<dyn Agent> {
    match kind {
        AgentKind::AnomalyDetection => Arc::new(AnomalyDetectionAgent::new(deps)),
        AgentKind::Reasoning => Arc::new(ReasoningAgent::new(deps)),
        AgentKind::Notification => Arc::new(NotificationAgent::new(deps)),
    }
}

/// Bind a consumer to the agent's input topic and run it to completion.
pub(crate) async fn consume(
    deps: &AgentDeps,
    name: &'static str,
    shutdown: Shutdown,
    handler: Arc<dyn MessageHandler>,
) {
    let consumer = match deps.bus.consumer(&deps.topic) {
        Ok(consumer) => consumer,
        Err(e) => {
            error!(agent = name, topic = %deps.topic, error = %e, "failed to create consumer");
            return;
        }
    };

    info!(agent = name, topic = %deps.topic, "agent running");
    consumer.run(shutdown, handler).await;
    info!(agent = name, "agent stopped");
}
