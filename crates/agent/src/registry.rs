use std::sync::Arc;

use anyhow::Result;
use deskroute_core::config::StoreConfig;
use deskroute_core::NodeRegistry;
use deskroute_db::{connect, JsonFileRecordStore, RecordStore, SqliteRecordStore, StoreError};

use crate::agents::{order, refund, response};
use crate::agents::{AgentContext, OrderAgent, RefundAgent, ResponseAgent};
use crate::llm::LlmClient;
use crate::prompts::PromptBook;

pub const ORDER_ID_PREFIX: &str = "ORD";
pub const REFUND_ID_PREFIX: &str = "REF";

#[derive(Clone)]
pub struct AgentStores {
    pub orders: Arc<dyn RecordStore>,
    pub refunds: Arc<dyn RecordStore>,
}

impl AgentStores {
    /// SQLite when `database_url` is set, otherwise the two JSON files.
    /// Both are keyed by order id.
    pub async fn from_config(config: &StoreConfig) -> Result<Self, StoreError> {
        if let Some(url) = &config.database_url {
            let pool = connect(url).await?;
            return Ok(Self {
                orders: Arc::new(SqliteRecordStore::new(pool.clone(), "orders", ORDER_ID_PREFIX)),
                refunds: Arc::new(SqliteRecordStore::new(pool, "refunds", REFUND_ID_PREFIX)),
            });
        }

        Ok(Self {
            orders: Arc::new(
                JsonFileRecordStore::new(&config.orders_path, ORDER_ID_PREFIX)
                    .with_id_field("order_id"),
            ),
            refunds: Arc::new(
                JsonFileRecordStore::new(&config.refunds_path, REFUND_ID_PREFIX)
                    .with_id_field("order_id"),
            ),
        })
    }
}

/// Registers `order_agent.v1`, `refund_agent.v1` and `response_agent.v1`.
pub fn default_registry(stores: AgentStores, llm: Arc<dyn LlmClient>) -> Result<NodeRegistry> {
    let ctx = AgentContext {
        orders: stores.orders,
        refunds: stores.refunds,
        llm,
        prompts: Arc::new(PromptBook::new()?),
    };

    Ok(NodeRegistry::default()
        .with(order::AGENT_ID, OrderAgent::new(ctx.clone()))
        .with(refund::AGENT_ID, RefundAgent::new(ctx.clone()))
        .with(response::AGENT_ID, ResponseAgent::new(ctx)))
}
