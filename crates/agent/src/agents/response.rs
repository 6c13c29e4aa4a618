use async_trait::async_trait;
use deskroute_core::{Capability, CapabilityError, Payload};
use serde_json::json;
use tera::Context;
use tracing::info;

use super::{append_trace, format_json, string_field, AgentContext};
use crate::prompts::AgentPrompt;
use crate::structured::ResponseAgentResult;

pub const AGENT_ID: &str = "response_agent.v1";

/// Writes the customer-facing reply from whatever earlier agents produced.
pub struct ResponseAgent {
    ctx: AgentContext,
}

impl ResponseAgent {
    pub fn new(ctx: AgentContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Capability for ResponseAgent {
    async fn invoke(&self, mut payload: Payload) -> Result<Payload, CapabilityError> {
        let mut context = Context::new();
        context.insert("user_query", string_field(&payload, "query").unwrap_or_default());
        context.insert("order_agent_result", &format_json(payload.get("order_agent_result")));
        context.insert("refund_agent_result", &format_json(payload.get("refund_agent_result")));

        let result: ResponseAgentResult = self.ctx.ask(AgentPrompt::Response, &context).await?;
        info!(
            event_name = "agent.response.written",
            chars = result.message.chars().count(),
            "customer response written"
        );

        payload.insert("response".to_string(), json!(result.message));
        append_trace(&mut payload, json!({"node": AGENT_ID}));
        Ok(payload)
    }
}
