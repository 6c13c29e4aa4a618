use std::collections::HashSet;

use serde::Serialize;

use crate::errors::ValidationError;

pub const DEFAULT_PAYLOAD_KEY: &str = "payload";
pub const MIN_TIMEOUT_MS: u64 = 50;
pub const MAX_TIMEOUT_MS: u64 = 60_000;
pub const MAX_NODE_RETRIES: u32 = 5;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PlannerNode {
    pub id: String,
    pub agent: String,
    pub input_key: String,
    pub output_key: String,
    pub timeout_ms: u64,
    pub max_retries: u32,
}

impl PlannerNode {
    pub fn new(
        id: impl Into<String>,
        agent: impl Into<String>,
        timeout_ms: u64,
        max_retries: u32,
    ) -> Result<Self, ValidationError> {
        let node = Self {
            id: id.into(),
            agent: agent.into(),
            input_key: DEFAULT_PAYLOAD_KEY.to_string(),
            output_key: DEFAULT_PAYLOAD_KEY.to_string(),
            timeout_ms,
            max_retries,
        };
        node.validate()?;
        Ok(node)
    }

    pub fn with_keys(mut self, input_key: impl Into<String>, output_key: impl Into<String>) -> Self {
        self.input_key = input_key.into();
        self.output_key = output_key.into();
        self
    }

    /// Upper bound on invocations for this node, including the first one.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }

    fn validate(&self) -> Result<(), ValidationError> {
        if self.agent.trim().is_empty() {
            return Err(ValidationError::EmptyAgentId { node_id: self.id.clone() });
        }
        if !(MIN_TIMEOUT_MS..=MAX_TIMEOUT_MS).contains(&self.timeout_ms) {
            return Err(ValidationError::TimeoutOutOfRange {
                node_id: self.id.clone(),
                timeout_ms: self.timeout_ms,
            });
        }
        if self.max_retries > MAX_NODE_RETRIES {
            return Err(ValidationError::RetriesOutOfRange {
                node_id: self.id.clone(),
                max_retries: self.max_retries,
            });
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Plan {
    plan_id: String,
    description: String,
    nodes: Vec<PlannerNode>,
    terminal_key: String,
}

impl Plan {
    /// Validates that `nodes` form a non-empty linear chain with unique ids,
    /// where every node reads the key its predecessor wrote.
    pub fn new(
        plan_id: impl Into<String>,
        description: impl Into<String>,
        nodes: Vec<PlannerNode>,
    ) -> Result<Self, ValidationError> {
        if nodes.is_empty() {
            return Err(ValidationError::EmptyPlan);
        }

        let mut seen = HashSet::with_capacity(nodes.len());
        for node in &nodes {
            node.validate()?;
            if !seen.insert(node.id.as_str()) {
                return Err(ValidationError::DuplicateNodeId(node.id.clone()));
            }
        }

        for pair in nodes.windows(2) {
            let (previous, next) = (&pair[0], &pair[1]);
            if previous.output_key != next.input_key {
                return Err(ValidationError::BrokenChain {
                    node_id: next.id.clone(),
                    expected: previous.output_key.clone(),
                    found: next.input_key.clone(),
                });
            }
        }

        let terminal_key =
            nodes.last().map(|node| node.output_key.clone()).unwrap_or_default();

        Ok(Self { plan_id: plan_id.into(), description: description.into(), nodes, terminal_key })
    }

    pub fn plan_id(&self) -> &str {
        &self.plan_id
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn nodes(&self) -> &[PlannerNode] {
        &self.nodes
    }

    pub fn terminal_key(&self) -> &str {
        &self.terminal_key
    }

    pub fn agents(&self) -> Vec<&str> {
        self.nodes.iter().map(|node| node.agent.as_str()).collect()
    }

    /// Renders the plan as an ASCII tree, one line per node.
    pub fn render_tree(&self) -> String {
        let mut lines = vec![format!("plan_id={}", self.plan_id)];
        let last = self.nodes.len().saturating_sub(1);
        for (index, node) in self.nodes.iter().enumerate() {
            let prefix = if index < last { "|-" } else { "\\-" };
            lines.push(format!("{prefix} {}: {}", node.id, node.agent));
        }
        lines.join("\n")
    }
}
