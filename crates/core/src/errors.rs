use thiserror::Error;

use crate::executor::ExecutorError;

#[derive(Clone, Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("confidence {0} is outside [0, 1]")]
    ConfidenceOutOfRange(f64),
    #[error("unknown intent label `{0}`")]
    UnknownIntent(String),
    #[error("intent carries no route candidates")]
    MissingRouteCandidates,
    #[error("plan must contain at least one node")]
    EmptyPlan,
    #[error("duplicate node id `{0}`")]
    DuplicateNodeId(String),
    #[error("node `{node_id}` has an empty agent id")]
    EmptyAgentId { node_id: String },
    #[error("node `{node_id}` timeout {timeout_ms}ms is outside 50..=60000")]
    TimeoutOutOfRange { node_id: String, timeout_ms: u64 },
    #[error("node `{node_id}` max_retries {max_retries} is outside 0..=5")]
    RetriesOutOfRange { node_id: String, max_retries: u32 },
    #[error("node `{node_id}` reads `{found}` but its predecessor writes `{expected}`")]
    BrokenChain { node_id: String, expected: String, found: String },
}

/// Terminal failure of one `route` invocation. Policy violations are not
/// errors; they surface on `RouterState::error`.
#[derive(Debug, Error)]
pub enum RouterError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Executor(#[from] ExecutorError),
}

impl RouterError {
    pub fn category(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Executor(ExecutorError::UnknownAgent { .. }) => "unknown_agent",
            Self::Executor(ExecutorError::Exhausted { .. }) => "execution",
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::errors::{RouterError, ValidationError};
    use crate::executor::{ExecutionError, ExecutorError};

    #[test]
    fn categories_follow_the_error_taxonomy() {
        assert_eq!(RouterError::from(ValidationError::EmptyPlan).category(), "validation");
        assert_eq!(
            RouterError::from(ExecutorError::UnknownAgent {
                node_id: "step_1".to_string(),
                agent: "ghost.v1".to_string(),
            })
            .category(),
            "unknown_agent"
        );
        assert_eq!(
            RouterError::from(ExecutorError::Exhausted {
                node_id: "step_1".to_string(),
                agent: "order_agent.v1".to_string(),
                attempts: 3,
                source: ExecutionError::TimedOut { timeout_ms: 50 },
            })
            .category(),
            "execution"
        );
    }

    #[test]
    fn validation_messages_name_the_offending_node() {
        let message = ValidationError::TimeoutOutOfRange {
            node_id: "step_2".to_string(),
            timeout_ms: 10,
        }
        .to_string();
        assert!(message.contains("step_2"));
        assert!(message.contains("10ms"));
    }
}
