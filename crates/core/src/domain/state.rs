use serde::Serialize;

use crate::domain::intent::IntentPayload;
use crate::domain::plan::Plan;
use crate::domain::Payload;
use crate::transcript::Transcript;

/// Everything one `route` call produced. Owned by a single invocation and
/// never shared or reused across requests.
#[derive(Clone, Debug, Serialize)]
pub struct RouterState {
    pub raw_input: String,
    pub masked_input: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intent: Option<IntentPayload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<Plan>,
    pub payload: Payload,
    pub transcript: Transcript,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RouterState {
    pub fn new(raw_input: impl Into<String>) -> Self {
        let raw_input = raw_input.into();
        Self {
            masked_input: raw_input.clone(),
            raw_input,
            intent: None,
            plan: None,
            payload: Payload::new(),
            transcript: Transcript::default(),
            error: None,
        }
    }

    pub fn response(&self) -> Option<&str> {
        self.payload.get("response").and_then(|value| value.as_str())
    }

    pub fn is_policy_violation(&self) -> bool {
        self.error.is_some()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::RouterState;

    #[test]
    fn fresh_state_starts_with_unmasked_copy_and_empty_payload() {
        let state = RouterState::new("hello");
        assert_eq!(state.raw_input, "hello");
        assert_eq!(state.masked_input, "hello");
        assert!(state.payload.is_empty());
        assert!(state.transcript.is_empty());
        assert!(state.error.is_none());
    }

    #[test]
    fn serialized_shape_omits_unset_optionals() {
        let mut state = RouterState::new("hello");
        state.payload.insert("response".to_string(), json!("hi"));

        let value = serde_json::to_value(&state).expect("serialize state");
        assert_eq!(value["raw_input"], "hello");
        assert_eq!(value["payload"]["response"], "hi");
        assert!(value.get("intent").is_none());
        assert!(value.get("error").is_none());
        assert!(value["transcript"].as_array().is_some());
        assert_eq!(state.response(), Some("hi"));
    }
}
