//! Stage 3 — delivers the composed message to the customer.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::agents::{Agent, AgentDeps, consume};
use crate::bus::{Message, MessageHandler, Shutdown};
use crate::error::AgentError;
use crate::events::{self, NotificationIntent};
use crate::notify::NotifyChannel;

pub struct NotificationAgent {
    deps: AgentDeps,
}

impl NotificationAgent {
    pub fn new(deps: AgentDeps) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl MessageHandler for NotificationAgent {
    async fn handle(&self, msg: Message) -> Result<(), AgentError> {
        let intent: NotificationIntent = events::decode("notification intent", &msg)?;

        let ctx = self
            .deps
            .store
            .notification_context(&intent.purchase_id, &intent.customer_id)
            .await?;

        let channel: NotifyChannel = ctx.channel.parse().map_err(AgentError::Notify)?;
        self.deps
            .notifier
            .send(channel, &ctx.target, &ctx.message)
            .await?;

        info!(
            purchase_id = %intent.purchase_id,
            channel = channel.as_str(),
            "notification delivered"
        );
        Ok(())
    }
}

#[async_trait]
impl Agent for NotificationAgent {
    fn name(&self) -> &'static str {
        "agent.notification"
    }

    async fn run(self: Arc<Self>, shutdown: Shutdown) {
        let handler = Arc::clone(&self) as Arc<dyn MessageHandler>;
        consume(&self.deps, self.name(), shutdown, handler).await;
    }
}
