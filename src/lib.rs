//! Event-driven purchase fraud pipeline.
//!
//! Three single-purpose agents connected by a message bus: detection scores
//! incoming purchases against the customer's history, reasoning asks an LLM
//! to explain flagged ones, and notification delivers the explanation. Each
//! process runs exactly one agent, selected by configuration; the bus can be
//! driven log-style (sequential, commit-after-handle) or queue-style
//! (batched, acked, worker pool) without the agents noticing.

pub mod agents;
pub mod bus;
pub mod config;
pub mod error;
pub mod events;
pub mod llm;
pub mod metrics;
pub mod notify;
pub mod store;

pub use config::Config;
pub use error::{Error, Result};
