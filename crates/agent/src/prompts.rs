use anyhow::{Context as _, Result};
use deskroute_core::CapabilityError;
use tera::{Context, Tera};

use crate::llm::LlmRequest;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AgentPrompt {
    Order,
    Refund,
    Response,
}

impl AgentPrompt {
    fn system_template(&self) -> &'static str {
        match self {
            Self::Order => "order_agent.system",
            Self::Refund => "refund_agent.system",
            Self::Response => "response_agent.system",
        }
    }

    fn user_template(&self) -> &'static str {
        match self {
            Self::Order => "order_agent.user",
            Self::Refund => "refund_agent.user",
            Self::Response => "response_agent.user",
        }
    }
}

const TEMPLATES: &[(&str, &str)] = &[
    (
        "order_agent.system",
        "You are the order desk of a Korean online store. Read the order record and any \
         refund record and assess the order. Reply with JSON only, shaped as \
         {\"order_status\": string, \"refund_eligible\": boolean, \"notes\": [string]}.",
    ),
    (
        "order_agent.user",
        "Customer query: {{ user_query }}\nOrder id: {{ order_id }}\n\
         Order record:\n{{ order_record }}\nRefund record:\n{{ refund_record }}",
    ),
    (
        "refund_agent.system",
        "You decide refunds. Approve only when the order analysis says the order is refund \
         eligible. Reply with JSON only, shaped as {\"refund_action\": \"approve\" | \"deny\", \
         \"refund_id\": string, \"notes\": [string]}. Use \"none\" as refund_id when you have \
         no id to report.",
    ),
    (
        "refund_agent.user",
        "Customer query: {{ user_query }}\nOrder analysis:\n{{ order_agent_result }}\n\
         Existing refund record:\n{{ refund_record }}",
    ),
    (
        "response_agent.system",
        "You write the final customer reply in polite Korean. Never reveal internal notes or \
         personal data. Reply with JSON only, shaped as {\"message\": string}.",
    ),
    (
        "response_agent.user",
        "Customer query: {{ user_query }}\nOrder analysis:\n{{ order_agent_result }}\n\
         Refund decision:\n{{ refund_agent_result }}",
    ),
];

/// Compiled system/user templates for the three reference agents.
#[derive(Debug)]
pub struct PromptBook {
    tera: Tera,
}

impl PromptBook {
    pub fn new() -> Result<Self> {
        let mut tera = Tera::default();
        tera.add_raw_templates(TEMPLATES.iter().copied())
            .context("failed to compile agent prompt templates")?;
        Ok(Self { tera })
    }

    pub fn render(
        &self,
        prompt: AgentPrompt,
        context: &Context,
    ) -> Result<LlmRequest, CapabilityError> {
        Ok(LlmRequest {
            system: self.render_one(prompt.system_template(), context)?,
            user: self.render_one(prompt.user_template(), context)?,
        })
    }

    fn render_one(&self, name: &str, context: &Context) -> Result<String, CapabilityError> {
        self.tera.render(name, context).map_err(|error| {
            CapabilityError::InvalidInput(format!("prompt `{name}` failed to render: {error}"))
        })
    }
}
