use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{Record, RecordStore, StoreError, StoredRecord};

pub struct InMemoryRecordStore {
    id_prefix: String,
    records: RwLock<BTreeMap<String, Record>>,
}

impl InMemoryRecordStore {
    pub fn new(id_prefix: impl Into<String>) -> Self {
        Self { id_prefix: id_prefix.into(), records: RwLock::default() }
    }

    pub fn with_records<I, K>(id_prefix: impl Into<String>, records: I) -> Self
    where
        I: IntoIterator<Item = (K, Record)>,
        K: Into<String>,
    {
        let records = records.into_iter().map(|(id, record)| (id.into(), record)).collect();
        Self { id_prefix: id_prefix.into(), records: RwLock::new(records) }
    }
}

impl Default for InMemoryRecordStore {
    fn default() -> Self {
        Self::new("REC")
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn get(&self, id: &str) -> Result<Option<Record>, StoreError> {
        let records = self.records.read().await;
        Ok(records.get(id).cloned())
    }

    async fn list(&self) -> Result<Vec<StoredRecord>, StoreError> {
        let records = self.records.read().await;
        Ok(records
            .iter()
            .map(|(id, record)| StoredRecord { id: id.clone(), record: record.clone() })
            .collect())
    }

    async fn upsert(&self, id: &str, record: Record) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        records.insert(id.to_string(), record);
        Ok(())
    }

    fn id_prefix(&self) -> &str {
        &self.id_prefix
    }
}
