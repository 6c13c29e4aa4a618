use anyhow::Result;
use async_trait::async_trait;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LlmRequest {
    pub system: String,
    pub user: String,
}

/// Text completion seam. Implementations own model selection, credentials
/// and transport; callers only see the returned text.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: LlmRequest) -> Result<String>;
}
