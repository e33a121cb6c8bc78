//! Error types for fraud-sentinel.

use std::time::Duration;

/// Top-level error type for the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Bus error: {0}")]
    Bus(#[from] BusError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Notify error: {0}")]
    Notify(#[from] NotifyError),

    #[error("Agent error: {0}")]
    Agent(#[from] AgentError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Message-bus errors.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Failed to connect to broker {broker}: {reason}")]
    Connect { broker: String, reason: String },

    #[error("Fetch from topic {topic} failed: {reason}")]
    Fetch { topic: String, reason: String },

    #[error("Commit on topic {topic} failed: {reason}")]
    Commit { topic: String, reason: String },

    #[error("Publish to topic {topic} failed: {reason}")]
    Publish { topic: String, reason: String },

    #[error("Acknowledgement failed: {0}")]
    Ack(String),

    #[error("Subscription closed")]
    Closed,
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider returned an empty completion")]
    EmptyCompletion,
}

/// Notification dispatch errors.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Unknown notification channel: {0}")]
    UnknownChannel(String),

    #[error("Dispatch via {channel} to {target} failed: {reason}")]
    SendFailed {
        channel: String,
        target: String,
        reason: String,
    },
}

/// Per-message handling errors raised inside an agent.
///
/// These are contained at the agent boundary: the consumer logs them and the
/// message follows the backend's redelivery policy. They never crash the loop.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("Decoding {event} payload failed: {reason}")]
    Decode { event: &'static str, reason: String },

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Notify error: {0}")]
    Notify(#[from] NotifyError),

    #[error("Bus error: {0}")]
    Bus(#[from] BusError),

    #[error("Handler timed out after {0:?}")]
    Timeout(Duration),
}

/// Result type alias for the pipeline.
pub type Result<T> = std::result::Result<T, Error>;
