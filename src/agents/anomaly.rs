//! Stage 1 — scores purchases and flags anomalies.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use crate::agents::{Agent, AgentDeps, consume};
use crate::bus::{Message, MessageHandler, Shutdown};
use crate::error::AgentError;
use crate::events::{self, AnomalyEvent, PurchaseEvent};
use crate::metrics::{DelayFlush, DelayReporter, REPORT_INTERVAL};

/// Purchases scoring strictly above this distance are anomalous. Fixed
/// policy constant; the boundary itself is not anomalous.
pub const ANOMALY_THRESHOLD: f64 = 0.3;

pub struct AnomalyDetectionAgent {
    deps: AgentDeps,
    delays: DelayReporter,
    // Taken once by `run`, which owns the flush task for the agent's lifetime.
    flush: Mutex<Option<DelayFlush>>,
}

impl AnomalyDetectionAgent {
    pub fn new(deps: AgentDeps) -> Self {
        let (delays, flush) = DelayReporter::new(REPORT_INTERVAL);
        Self {
            deps,
            delays,
            flush: Mutex::new(Some(flush)),
        }
    }
}

#[async_trait]
impl MessageHandler for AnomalyDetectionAgent {
    async fn handle(&self, msg: Message) -> Result<(), AgentError> {
        let purchase: PurchaseEvent = events::decode("purchase", &msg)?;

        // Delay between purchase creation and this delivery; metrics only.
        let delay = (Utc::now() - purchase.timestamp).to_std().unwrap_or_default();
        self.delays.record(delay);

        let distance = self
            .deps
            .store
            .distance_from_average(&purchase.id, &purchase.customer_id)
            .await?;

        if distance <= ANOMALY_THRESHOLD {
            return Ok(());
        }

        info!(purchase_id = %purchase.id, score = distance, "anomalous purchase");

        self.deps
            .store
            .insert_anomaly(&purchase.id, &purchase.customer_id, distance)
            .await?;

        if let Some(topic) = &self.deps.output_topic {
            let event = AnomalyEvent {
                id: Uuid::new_v4().to_string(),
                purchase_id: purchase.id.clone(),
                customer_id: purchase.customer_id.clone(),
                score: distance,
                status: "detected".to_string(),
                timestamp: Utc::now(),
            };
            self.deps
                .bus
                .publish(topic, vec![purchase.id.clone()], events::encode(&event))
                .await?;
        }

        Ok(())
    }
}

#[async_trait]
impl Agent for AnomalyDetectionAgent {
    fn name(&self) -> &'static str {
        "agent.anomaly-detection"
    }

    async fn run(self: Arc<Self>, shutdown: Shutdown) {
        let flush = self.flush.lock().unwrap().take();
        let flush_task = flush.map(|f| tokio::spawn(f.run(shutdown.clone())));

        let handler = Arc::clone(&self) as Arc<dyn MessageHandler>;
        consume(&self.deps, self.name(), shutdown, handler).await;

        if let Some(task) = flush_task {
            let _ = task.await;
        }
    }
}
