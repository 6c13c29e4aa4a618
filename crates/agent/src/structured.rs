//! Typed results the reference agents ask the model for, and the lenient
//! text-to-JSON step in front of them.

use deskroute_core::CapabilityError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderAgentResult {
    pub order_status: String,
    pub refund_eligible: bool,
    #[serde(default)]
    pub notes: Vec<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefundAction {
    Approve,
    Deny,
}

impl RefundAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Deny => "deny",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundAgentResult {
    pub refund_action: RefundAction,
    #[serde(default)]
    pub refund_id: Option<String>,
    #[serde(default)]
    pub notes: Vec<String>,
}

impl RefundAgentResult {
    /// The model's refund id unless it is missing or a placeholder.
    pub fn usable_refund_id(&self) -> Option<&str> {
        self.refund_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .filter(|id| !matches!(id.to_ascii_lowercase().as_str(), "none" | "n/a"))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseAgentResult {
    pub message: String,
}

/// Removes a surrounding Markdown code fence and an optional `json` tag.
pub fn strip_code_fence(text: &str) -> &str {
    let text = text.trim();
    if !text.starts_with("```") {
        return text;
    }

    let inner = text.trim_matches(|c: char| c == '`' || c.is_whitespace());
    match inner.get(..4) {
        Some(tag) if tag.eq_ignore_ascii_case("json") => inner[4..].trim_start(),
        _ => inner,
    }
}

/// Decodes model output into `T`. Output that is not JSON and JSON that does
/// not fit `T` are both reported as [`CapabilityError::Decode`].
pub fn parse_structured<T>(text: &str) -> Result<T, CapabilityError>
where
    T: DeserializeOwned,
{
    let body = strip_code_fence(text);
    let value: Value = serde_json::from_str(body).map_err(|error| {
        CapabilityError::Decode(format!("output is not JSON ({error}): {body}"))
    })?;
    serde_json::from_value(value.clone()).map_err(|error| {
        CapabilityError::Decode(format!("output does not match schema ({error}): {value}"))
    })
}
