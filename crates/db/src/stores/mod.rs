use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

pub mod json_file;
pub mod memory;
pub mod sqlite;

pub use json_file::JsonFileRecordStore;
pub use memory::InMemoryRecordStore;
pub use sqlite::SqliteRecordStore;

/// Opaque JSON document. Stores never interpret its contents.
pub type Record = Value;

const MAX_ID_ATTEMPTS: usize = 8;

#[derive(Clone, Debug, PartialEq)]
pub struct StoredRecord {
    pub id: String,
    pub record: Record,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("could not access `{path}`: {source}")]
    Io { path: PathBuf, source: std::io::Error },
    #[error("decode error: {0}")]
    Decode(String),
    #[error("could not allocate a free `{prefix}` id")]
    IdsExhausted { prefix: String },
}

/// Keyed document storage for orders and refunds. Consistency across
/// concurrent writers is the backing store's concern.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<Record>, StoreError>;

    /// All records ordered by id.
    async fn list(&self) -> Result<Vec<StoredRecord>, StoreError>;

    /// Inserts or fully replaces the record stored under `id`.
    async fn upsert(&self, id: &str, record: Record) -> Result<(), StoreError>;

    /// Prefix of ids minted by [`RecordStore::generate_id`], e.g. `REF`.
    fn id_prefix(&self) -> &str;

    /// Mints `<PREFIX>-XXXXXXXX` (eight uppercase hex digits) not yet in use.
    async fn generate_id(&self) -> Result<String, StoreError> {
        for _ in 0..MAX_ID_ATTEMPTS {
            let id = mint_id(self.id_prefix());
            if self.get(&id).await?.is_none() {
                return Ok(id);
            }
        }
        Err(StoreError::IdsExhausted { prefix: self.id_prefix().to_string() })
    }
}

pub(crate) fn mint_id(prefix: &str) -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("{prefix}-{}", hex[..8].to_ascii_uppercase())
}
