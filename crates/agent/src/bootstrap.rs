use std::sync::Arc;

use deskroute_core::config::{ConfigError, LoadOptions, RouterConfig};
use deskroute_core::telemetry::init_logging;
use deskroute_core::Router;
use deskroute_db::StoreError;
use thiserror::Error;
use tracing::info;

use crate::gemini::GeminiClient;
use crate::llm::LlmClient;
use crate::registry::{default_registry, AgentStores};

pub struct Application {
    pub config: RouterConfig,
    pub router: Router,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("record store setup failed: {0}")]
    Store(#[from] StoreError),
    #[error(transparent)]
    Agents(#[from] anyhow::Error),
}

/// Loads configuration, installs logging and wires the Gemini-backed
/// reference agents into a router.
pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = RouterConfig::load(options)?;
    init_logging(&config.logging);
    info!(event_name = "system.bootstrap.start", "starting deskroute bootstrap");

    let llm = GeminiClient::from_config(&config.llm).map_err(BootstrapError::Agents)?;
    info!(
        event_name = "system.bootstrap.llm_ready",
        model = llm.model(),
        api_key_configured = config.llm.api_key.is_some(),
        "llm client constructed"
    );

    bootstrap_with_llm(config, Arc::new(llm)).await
}

/// Same wiring as [`bootstrap`] with a caller-supplied model client and an
/// already loaded config. Logging is left to the caller.
pub async fn bootstrap_with_llm(
    config: RouterConfig,
    llm: Arc<dyn LlmClient>,
) -> Result<Application, BootstrapError> {
    let stores = AgentStores::from_config(&config.store).await?;
    let registry = default_registry(stores, llm).map_err(BootstrapError::Agents)?;
    let router = Router::from_config(&config, Arc::new(registry))?;

    info!(
        event_name = "system.bootstrap.ready",
        agents = ?router.registry().agent_ids(),
        "router ready"
    );
    Ok(Application { config, router })
}
