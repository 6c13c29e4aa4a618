use async_trait::async_trait;
use chrono::Utc;
use sqlx::Row;

use super::{Record, RecordStore, StoreError, StoredRecord};
use crate::DbPool;

/// One logical collection (`orders`, `refunds`, ...) inside the shared
/// `record` table.
pub struct SqliteRecordStore {
    pool: DbPool,
    collection: String,
    id_prefix: String,
}

impl SqliteRecordStore {
    pub fn new(pool: DbPool, collection: impl Into<String>, id_prefix: impl Into<String>) -> Self {
        Self { pool, collection: collection.into(), id_prefix: id_prefix.into() }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }
}

fn decode_body(id: &str, body: &str) -> Result<Record, StoreError> {
    serde_json::from_str(body)
        .map_err(|e| StoreError::Decode(format!("record `{id}` holds invalid JSON: {e}")))
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn get(&self, id: &str) -> Result<Option<Record>, StoreError> {
        let row = sqlx::query("SELECT body FROM record WHERE collection = ? AND id = ?")
            .bind(&self.collection)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let body: String =
                    row.try_get("body").map_err(|e| StoreError::Decode(e.to_string()))?;
                decode_body(id, &body).map(Some)
            }
            None => Ok(None),
        }
    }

    async fn list(&self) -> Result<Vec<StoredRecord>, StoreError> {
        let rows = sqlx::query("SELECT id, body FROM record WHERE collection = ? ORDER BY id")
            .bind(&self.collection)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| {
                let id: String = row.try_get("id").map_err(|e| StoreError::Decode(e.to_string()))?;
                let body: String =
                    row.try_get("body").map_err(|e| StoreError::Decode(e.to_string()))?;
                let record = decode_body(&id, &body)?;
                Ok(StoredRecord { id, record })
            })
            .collect()
    }

    async fn upsert(&self, id: &str, record: Record) -> Result<(), StoreError> {
        let body = serde_json::to_string(&record).map_err(|e| StoreError::Decode(e.to_string()))?;

        sqlx::query(
            "INSERT INTO record (collection, id, body, updated_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(collection, id) DO UPDATE SET
                body = excluded.body,
                updated_at = excluded.updated_at",
        )
        .bind(&self.collection)
        .bind(id)
        .bind(body)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn id_prefix(&self) -> &str {
        &self.id_prefix
    }
}
