pub mod intent;
pub mod plan;
pub mod state;

/// Shared key-value object threaded through every plan node.
pub type Payload = serde_json::Map<String, serde_json::Value>;
