//! Reference capabilities for the deskroute router.
//!
//! Three agents share one model client and two record stores:
//! - `order_agent.v1` loads the order and asks the model for a status assessment.
//! - `refund_agent.v1` turns that assessment into an approve/deny decision and persists it.
//! - `response_agent.v1` writes the customer reply that the policy gate inspects.
//!
//! The model only ever fills typed JSON results; ids, persistence and payload
//! layout stay deterministic.

pub mod agents;
pub mod bootstrap;
pub mod gemini;
pub mod llm;
pub mod prompts;
pub mod registry;
pub mod structured;

pub use agents::{AgentContext, OrderAgent, RefundAgent, ResponseAgent};
pub use bootstrap::{bootstrap, bootstrap_with_llm, Application, BootstrapError};
pub use gemini::GeminiClient;
pub use llm::{LlmClient, LlmRequest};
pub use registry::{default_registry, AgentStores};
