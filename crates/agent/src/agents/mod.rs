use std::sync::Arc;

use deskroute_core::{CapabilityError, Payload};
use deskroute_db::{RecordStore, StoreError};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tera::Context;

use crate::llm::LlmClient;
use crate::prompts::{AgentPrompt, PromptBook};
use crate::structured::parse_structured;

pub mod order;
pub mod refund;
pub mod response;

pub use order::OrderAgent;
pub use refund::RefundAgent;
pub use response::ResponseAgent;

/// Collaborators shared by the reference agents. Built once and cloned into
/// each capability.
#[derive(Clone)]
pub struct AgentContext {
    pub orders: Arc<dyn RecordStore>,
    pub refunds: Arc<dyn RecordStore>,
    pub llm: Arc<dyn LlmClient>,
    pub prompts: Arc<PromptBook>,
}

impl AgentContext {
    pub(crate) async fn ask<T>(
        &self,
        prompt: AgentPrompt,
        context: &Context,
    ) -> Result<T, CapabilityError>
    where
        T: DeserializeOwned,
    {
        let request = self.prompts.render(prompt, context)?;
        let text = self
            .llm
            .complete(request)
            .await
            .map_err(|error| CapabilityError::Upstream(format!("{error:#}")))?;
        parse_structured(&text)
    }
}

pub(crate) fn store_error(error: StoreError) -> CapabilityError {
    CapabilityError::Store(error.to_string())
}

/// Pretty JSON for prompts; absent or empty values render as `{}`.
pub(crate) fn format_json(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => "{}".to_string(),
        Some(Value::Object(map)) if map.is_empty() => "{}".to_string(),
        Some(value) => serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string()),
    }
}

pub(crate) fn string_field<'a>(payload: &'a Payload, key: &str) -> Option<&'a str> {
    payload.get(key).and_then(Value::as_str).filter(|value| !value.trim().is_empty())
}

/// Appends to `payload.trace`, replacing a non-array value if one is there.
pub(crate) fn append_trace(payload: &mut Payload, entry: Value) {
    let trace = payload.entry("trace").or_insert_with(|| json!([]));
    if !trace.is_array() {
        *trace = json!([]);
    }
    if let Value::Array(entries) = trace {
        entries.push(entry);
    }
}


#[cfg(test)]
mod tests {
    use deskroute_core::Payload;
    use serde_json::json;

    use super::{append_trace, format_json};

    #[test]
    fn trace_is_created_then_appended() {
        let mut payload = Payload::new();
        append_trace(&mut payload, json!({"node": "a"}));
        append_trace(&mut payload, json!({"node": "b"}));
        assert_eq!(payload["trace"], json!([{"node": "a"}, {"node": "b"}]));

        payload.insert("trace".to_string(), json!("corrupt"));
        append_trace(&mut payload, json!({"node": "c"}));
        assert_eq!(payload["trace"], json!([{"node": "c"}]));
    }

    #[test]
    fn empty_values_format_as_empty_object() {
        assert_eq!(format_json(None), "{}");
        assert_eq!(format_json(Some(&json!(null))), "{}");
        assert_eq!(format_json(Some(&json!({}))), "{}");
        assert!(format_json(Some(&json!({"a": 1}))).contains("\"a\": 1"));
    }
}
