use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::Payload;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CapabilityError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("upstream failure: {0}")]
    Upstream(String),
    #[error("could not decode output: {0}")]
    Decode(String),
    #[error("store failure: {0}")]
    Store(String),
}

/// Externally supplied unit of work run for one plan node. Receives the
/// current payload and returns the payload the next node will see.
#[async_trait]
pub trait Capability: Send + Sync {
    async fn invoke(&self, payload: Payload) -> Result<Payload, CapabilityError>;
}

#[derive(Clone)]
pub struct NodeSpec {
    pub agent_id: String,
    pub capability: Arc<dyn Capability>,
}

impl fmt::Debug for NodeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeSpec").field("agent_id", &self.agent_id).finish_non_exhaustive()
    }
}

/// Agent id → capability table, built once at startup and handed to the
/// executor.
#[derive(Clone, Debug, Default)]
pub struct NodeRegistry {
    nodes: HashMap<String, NodeSpec>,
}

impl NodeRegistry {
    pub fn register<C>(&mut self, agent_id: impl Into<String>, capability: C)
    where
        C: Capability + 'static,
    {
        self.register_shared(agent_id, Arc::new(capability));
    }

    pub fn register_shared(&mut self, agent_id: impl Into<String>, capability: Arc<dyn Capability>) {
        let agent_id = agent_id.into();
        self.nodes.insert(agent_id.clone(), NodeSpec { agent_id, capability });
    }

    pub fn with<C>(mut self, agent_id: impl Into<String>, capability: C) -> Self
    where
        C: Capability + 'static,
    {
        self.register(agent_id, capability);
        self
    }

    pub fn resolve(&self, agent_id: &str) -> Option<&NodeSpec> {
        self.nodes.get(agent_id)
    }

    pub fn contains(&self, agent_id: &str) -> bool {
        self.nodes.contains_key(agent_id)
    }

    pub fn agent_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.nodes.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
