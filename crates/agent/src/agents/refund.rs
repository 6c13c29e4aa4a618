use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use deskroute_core::{Capability, CapabilityError, Payload};
use serde_json::json;
use tera::Context;
use tracing::info;

use super::{append_trace, format_json, store_error, string_field, AgentContext};
use crate::prompts::AgentPrompt;
use crate::structured::RefundAgentResult;

pub const AGENT_ID: &str = "refund_agent.v1";

/// Decides approve/deny for an order the order agent already assessed, and
/// records the decision in the refund store keyed by order id.
pub struct RefundAgent {
    ctx: AgentContext,
}

impl RefundAgent {
    pub fn new(ctx: AgentContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Capability for RefundAgent {
    async fn invoke(&self, mut payload: Payload) -> Result<Payload, CapabilityError> {
        let order_id = string_field(&payload, "order_id")
            .map(str::to_string)
            .ok_or_else(|| CapabilityError::InvalidInput("order_id missing in payload".into()))?;
        let order_result = payload
            .get("order_agent_result")
            .filter(|value| !value.is_null())
            .cloned()
            .ok_or_else(|| CapabilityError::InvalidInput("order agent result missing".into()))?;

        let existing = self.ctx.refunds.get(&order_id).await.map_err(store_error)?;

        let mut context = Context::new();
        context.insert("user_query", string_field(&payload, "query").unwrap_or_default());
        context.insert("order_agent_result", &format_json(Some(&order_result)));
        context.insert("refund_record", &format_json(existing.as_ref()));

        let mut result: RefundAgentResult = self.ctx.ask(AgentPrompt::Refund, &context).await?;
        let refund_id = match result.usable_refund_id() {
            Some(id) => id.to_string(),
            None => self.ctx.refunds.generate_id().await.map_err(store_error)?,
        };
        result.refund_id = Some(refund_id.clone());

        let record = json!({
            "action": result.refund_action.as_str(),
            "notes": result.notes,
            "updated_at": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        });
        self.ctx.refunds.upsert(&order_id, record).await.map_err(store_error)?;

        info!(
            event_name = "agent.refund.decided",
            order_id = %order_id,
            refund_id = %refund_id,
            action = result.refund_action.as_str(),
            "refund decision recorded"
        );

        let decision = json!(result);
        payload.insert("refund".to_string(), json!({"order_id": order_id, "result": decision}));
        payload.insert("refund_agent_result".to_string(), decision);
        append_trace(
            &mut payload,
            json!({
                "node": AGENT_ID,
                "action": result.refund_action.as_str(),
                "refund_id": refund_id,
            }),
        );
        Ok(payload)
    }
}
