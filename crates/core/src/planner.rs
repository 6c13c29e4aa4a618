use crate::config::PlannerConfig;
use crate::domain::intent::IntentPayload;
use crate::domain::plan::{Plan, PlannerNode};
use crate::errors::ValidationError;

#[derive(Clone, Debug)]
pub struct PlanBuilder {
    config: PlannerConfig,
}

impl Default for PlanBuilder {
    fn default() -> Self {
        Self::new(PlannerConfig::default())
    }
}

impl PlanBuilder {
    pub fn new(config: PlannerConfig) -> Self {
        Self { config }
    }

    /// Expands the intent's primary route candidate into a linear plan.
    /// Lower-ranked candidates are ignored.
    pub fn build(&self, intent: &IntentPayload) -> Result<Plan, ValidationError> {
        let candidate = intent.primary_candidate();
        let nodes = candidate
            .agents
            .iter()
            .enumerate()
            .map(|(index, agent)| {
                PlannerNode::new(
                    format!("step_{}", index + 1),
                    agent.as_str(),
                    self.timeout_for(agent),
                    self.config.max_retries,
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        Plan::new(
            candidate.plan_hint.as_str(),
            format!("Execute {} for intent {}", candidate.plan_hint, intent.intent()),
            nodes,
        )
    }

    fn timeout_for(&self, agent: &str) -> u64 {
        if agent.contains("response_agent") {
            self.config.response_timeout_ms
        } else if agent.contains("refund_agent") {
            self.config.refund_timeout_ms
        } else {
            self.config.default_timeout_ms
        }
    }
}
