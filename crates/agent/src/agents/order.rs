use async_trait::async_trait;
use deskroute_core::{Capability, CapabilityError, Payload};
use serde_json::{json, Value};
use tera::Context;
use tracing::info;

use super::{append_trace, format_json, store_error, string_field, AgentContext};
use crate::prompts::AgentPrompt;
use crate::structured::OrderAgentResult;

pub const AGENT_ID: &str = "order_agent.v1";

/// Looks up the order (and any refund already on file) and asks the model
/// for a status assessment.
pub struct OrderAgent {
    ctx: AgentContext,
}

impl OrderAgent {
    pub fn new(ctx: AgentContext) -> Self {
        Self { ctx }
    }
}

fn resolve_order_id(payload: &Payload) -> Option<String> {
    string_field(payload, "order_id")
        .or_else(|| {
            payload
                .get("slots")
                .and_then(|slots| slots.get("order_id"))
                .and_then(Value::as_str)
                .filter(|id| !id.trim().is_empty())
        })
        .map(str::to_string)
}

#[async_trait]
impl Capability for OrderAgent {
    async fn invoke(&self, mut payload: Payload) -> Result<Payload, CapabilityError> {
        let order_id = resolve_order_id(&payload);

        let (order_record, refund_record) = match &order_id {
            Some(id) => (
                self.ctx.orders.get(id).await.map_err(store_error)?,
                self.ctx.refunds.get(id).await.map_err(store_error)?,
            ),
            None => (None, None),
        };

        let mut context = Context::new();
        context.insert("user_query", string_field(&payload, "query").unwrap_or_default());
        context.insert("order_id", order_id.as_deref().unwrap_or("UNKNOWN"));
        context.insert("order_record", &format_json(order_record.as_ref()));
        context.insert("refund_record", &format_json(refund_record.as_ref()));

        let result: OrderAgentResult = self.ctx.ask(AgentPrompt::Order, &context).await?;
        info!(
            event_name = "agent.order.assessed",
            order_id = order_id.as_deref().unwrap_or("unknown"),
            order_status = %result.order_status,
            refund_eligible = result.refund_eligible,
            "order assessed"
        );

        let analysis = json!(result);
        payload.insert("order_id".to_string(), json!(order_id));
        payload.insert(
            "order".to_string(),
            json!({
                "order_id": order_id,
                "record": order_record,
                "analysis": analysis,
            }),
        );
        payload.insert("order_agent_result".to_string(), analysis);
        append_trace(&mut payload, json!({"node": AGENT_ID, "status": result.order_status}));
        Ok(payload)
    }
}
