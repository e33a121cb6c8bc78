//! Stage 2 — explains an anomaly to the customer via the LLM.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::info;

use crate::agents::{Agent, AgentDeps, consume};
use crate::bus::{Message, MessageHandler, Shutdown};
use crate::error::{AgentError, LlmError};
use crate::events::{self, AnomalyEvent, NotificationIntent};
use crate::store::Contribution;

pub struct ReasoningAgent {
    deps: AgentDeps,
}

impl ReasoningAgent {
    pub fn new(deps: AgentDeps) -> Self {
        Self { deps }
    }
}

/// The contribution figures the prompt cares about. Dimensions the store
/// reports but the prompt does not name are ignored.
struct PromptContext {
    purchase_id: String,
    amount: f64,
    hour_of_day: f64,
    location: f64,
}

impl PromptContext {
    fn new(purchase_id: &str, breakdown: &[Contribution]) -> Self {
        let mut ctx = Self {
            purchase_id: purchase_id.to_string(),
            amount: 0.0,
            hour_of_day: 0.0,
            location: 0.0,
        };
        for contribution in breakdown {
            match contribution.dimension.as_str() {
                "amount" => ctx.amount = contribution.pct,
                "hour_of_day" => ctx.hour_of_day = contribution.pct,
                "location" => ctx.location = contribution.pct,
                _ => {}
            }
        }
        ctx
    }
}

impl fmt::Display for PromptContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "A customer purchase (id: {}) has been deemed to be anomalous.\n\n\
             Compose a very brief message to them explaining why their purchase \
             has been flagged, sharing just the primary reason for the flagging \
             (in a clear and human way; nothing too formal and don't use \
             business or technical lingo):\n\n\
             For context, here are the things that contributed to the detection:\n\n\
             - Purchase amount contributed {:.4} to the detection\n\
             - Time of day contributed {:.4} to the detection\n\
             - Location contributed {:.4} to the detection\n\n\
             Our company name is \"ACME Corp.\"\n\
             Don't use a placeholder for their name.",
            self.purchase_id, self.amount, self.hour_of_day, self.location
        )
    }
}

#[async_trait]
impl MessageHandler for ReasoningAgent {
    async fn handle(&self, msg: Message) -> Result<(), AgentError> {
        let anomaly: AnomalyEvent = events::decode("anomaly", &msg)?;

        let breakdown = self
            .deps
            .store
            .distance_breakdown(&anomaly.purchase_id, &anomaly.customer_id)
            .await?;

        let prompt = PromptContext::new(&anomaly.purchase_id, &breakdown).to_string();
        let reasoning = self.deps.llm.complete(&prompt).await?;
        // Providers may succeed with nothing to say; without a message there
        // is nothing to notify about, so fail and let the bus redeliver.
        if reasoning.trim().is_empty() {
            return Err(AgentError::Llm(LlmError::EmptyCompletion));
        }

        self.deps
            .store
            .insert_notification(&anomaly.purchase_id, &anomaly.customer_id, &reasoning)
            .await?;

        info!(purchase_id = %anomaly.purchase_id, "reasoning recorded");

        if let Some(topic) = &self.deps.output_topic {
            let intent = NotificationIntent {
                purchase_id: anomaly.purchase_id.clone(),
                customer_id: anomaly.customer_id.clone(),
                status: "pending".to_string(),
                timestamp: Utc::now(),
            };
            self.deps
                .bus
                .publish(
                    topic,
                    vec![anomaly.purchase_id.clone()],
                    events::encode(&intent),
                )
                .await?;
        }

        Ok(())
    }
}

#[async_trait]
impl Agent for ReasoningAgent {
    fn name(&self) -> &'static str {
        "agent.reasoning"
    }

    async fn run(self: Arc<Self>, shutdown: Shutdown) {
        let handler = Arc::clone(&self) as Arc<dyn MessageHandler>;
        consume(&self.deps, self.name(), shutdown, handler).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::testutil::{MockBus, MockLlm, MockNotifier, MockStore, deps, message};

    fn anomaly_payload(purchase_id: &str, customer_id: &str) -> Vec<u8> {
        serde_json::to_vec(&serde_json::json!({
            "id": "a1",
            "purchase_id": purchase_id,
            "customer_id": customer_id,
            "score": 0.8,
            "status": "detected",
            "ts": Utc::now().to_rfc3339(),
        }))
        .unwrap()
    }

    fn breakdown() -> Vec<Contribution> {
        vec![
            Contribution {
                dimension: "amount".to_string(),
                pct: 0.7123,
            },
            Contribution {
                dimension: "hour_of_day".to_string(),
                pct: 0.1877,
            },
            Contribution {
                dimension: "location".to_string(),
                pct: 0.1,
            },
        ]
    }

    fn agent_with_llm(llm: MockLlm) -> (ReasoningAgent, Arc<MockBus>, Arc<MockStore>, Arc<MockLlm>) {
        let bus = Arc::new(MockBus::default());
        let mut store = MockStore::with_distance(0.0);
        store.breakdown = breakdown();
        let store = Arc::new(store);
        let llm = Arc::new(llm);
        let agent = ReasoningAgent::new(deps(
            Arc::clone(&bus),
            Arc::clone(&store),
            Arc::clone(&llm),
            Arc::new(MockNotifier::default()),
        ));
        (agent, bus, store, llm)
    }

    #[tokio::test]
    async fn records_reasoning_and_emits_intent() {
        let (agent, bus, store, llm) =
            agent_with_llm(MockLlm::returning("Hi, your purchase looked unusual."));

        agent
            .handle(message("anomalies", anomaly_payload("p1", "c1")))
            .await
            .unwrap();

        let notifications = store.notifications.lock().unwrap().clone();
        assert_eq!(
            notifications,
            vec![(
                "p1".to_string(),
                "c1".to_string(),
                "Hi, your purchase looked unusual.".to_string()
            )]
        );

        let published = bus.published.lock().unwrap().clone();
        assert_eq!(published.len(), 1);
        let intent: NotificationIntent = serde_json::from_slice(&published[0].1).unwrap();
        assert_eq!(intent.purchase_id, "p1");
        assert_eq!(intent.status, "pending");

        // The prompt carries each dimension's figure to four decimal places.
        let prompts = llm.prompts.lock().unwrap().clone();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("id: p1"));
        assert!(prompts[0].contains("amount contributed 0.7123"));
        assert!(prompts[0].contains("Time of day contributed 0.1877"));
        assert!(prompts[0].contains("Location contributed 0.1000"));
    }

    #[tokio::test]
    async fn empty_completion_records_nothing() {
        let (agent, bus, store, _llm) = agent_with_llm(MockLlm::returning(""));

        let err = agent
            .handle(message("anomalies", anomaly_payload("p1", "c1")))
            .await
            .unwrap_err();

        assert!(matches!(err, AgentError::Llm(LlmError::EmptyCompletion)));
        assert!(store.notifications.lock().unwrap().is_empty());
        assert!(bus.published.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unrecognized_dimensions_are_ignored() {
        let ctx = PromptContext::new(
            "p9",
            &[
                Contribution {
                    dimension: "amount".to_string(),
                    pct: 1.0,
                },
                Contribution {
                    dimension: "phase_of_moon".to_string(),
                    pct: 0.5,
                },
            ],
        );
        assert_eq!(ctx.amount, 1.0);
        assert_eq!(ctx.hour_of_day, 0.0);
        assert_eq!(ctx.location, 0.0);
    }

    #[tokio::test]
    async fn malformed_payload_fails_the_message() {
        let (agent, _bus, store, _llm) = agent_with_llm(MockLlm::returning("msg"));

        let err = agent
            .handle(message("anomalies", b"not json".to_vec()))
            .await
            .unwrap_err();

        assert!(matches!(err, AgentError::Decode { .. }));
        assert!(store.notifications.lock().unwrap().is_empty());
    }
}
