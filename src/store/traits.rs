//! The `FraudStore` trait — the pipeline's only view of persistence.
//!
//! Scoring, breakdown and contact lookup are database-side functions; the
//! pipeline treats them as black boxes reached through this interface.

use async_trait::async_trait;

use crate::error::DatabaseError;

/// One dimension's share of an anomaly decision.
#[derive(Debug, Clone, PartialEq)]
pub struct Contribution {
    pub dimension: String,
    pub pct: f64,
}

/// Where and how to reach a customer about a purchase.
#[derive(Debug, Clone)]
pub struct NotificationContext {
    pub channel: String,
    pub target: String,
    pub message: String,
}

/// Backend-agnostic persistence trait for the pipeline.
///
/// The handle is shared concurrently by workers and agents; implementations
/// must be safe for concurrent use without callers taking locks.
#[async_trait]
pub trait FraudStore: Send + Sync {
    /// Distance of a purchase from the customer's average. Higher = more
    /// anomalous. Deterministic for unchanged stored data.
    async fn distance_from_average(
        &self,
        purchase_id: &str,
        customer_id: &str,
    ) -> Result<f64, DatabaseError>;

    /// Per-dimension contribution percentages for a scored purchase.
    async fn distance_breakdown(
        &self,
        purchase_id: &str,
        customer_id: &str,
    ) -> Result<Vec<Contribution>, DatabaseError>;

    /// Resolve delivery channel, target and message for a notification.
    async fn notification_context(
        &self,
        purchase_id: &str,
        customer_id: &str,
    ) -> Result<NotificationContext, DatabaseError>;

    /// Record an anomaly finding.
    async fn insert_anomaly(
        &self,
        purchase_id: &str,
        customer_id: &str,
        score: f64,
    ) -> Result<(), DatabaseError>;

    /// Record the reasoning text produced for an anomaly.
    async fn insert_notification(
        &self,
        purchase_id: &str,
        customer_id: &str,
        reasoning: &str,
    ) -> Result<(), DatabaseError>;
}
