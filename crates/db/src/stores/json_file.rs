use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::debug;

use super::{Record, RecordStore, StoreError, StoredRecord};

const DEFAULT_ID_FIELD: &str = "id";

/// Store backed by one JSON file, re-read on every call so edits made by
/// other processes are picked up.
///
/// Two encodings are accepted on read: an object keyed by id, or an array of
/// objects that each carry the id under `id_field`. Writes always produce
/// the keyed object form.
pub struct JsonFileRecordStore {
    path: PathBuf,
    id_prefix: String,
    id_field: String,
    write_lock: Mutex<()>,
}

impl JsonFileRecordStore {
    pub fn new(path: impl Into<PathBuf>, id_prefix: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            id_prefix: id_prefix.into(),
            id_field: DEFAULT_ID_FIELD.to_string(),
            write_lock: Mutex::new(()),
        }
    }

    /// Field that names the id when the file holds a list of records.
    pub fn with_id_field(mut self, id_field: impl Into<String>) -> Self {
        self.id_field = id_field.into();
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<BTreeMap<String, Record>, StoreError> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(error) if error.kind() == ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(source) => return Err(StoreError::Io { path: self.path.clone(), source }),
        };
        if raw.trim().is_empty() {
            return Ok(BTreeMap::new());
        }

        let value: Value = serde_json::from_str(&raw).map_err(|error| {
            StoreError::Decode(format!("{}: {error}", self.path.display()))
        })?;
        self.decode(value)
    }

    fn decode(&self, value: Value) -> Result<BTreeMap<String, Record>, StoreError> {
        match value {
            Value::Object(keyed) => Ok(keyed.into_iter().collect()),
            Value::Array(items) => items
                .into_iter()
                .map(|item| {
                    let id = item
                        .get(&self.id_field)
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .ok_or_else(|| {
                            StoreError::Decode(format!(
                                "{}: list entry is missing string field `{}`",
                                self.path.display(),
                                self.id_field
                            ))
                        })?;
                    Ok((id, item))
                })
                .collect(),
            other => Err(StoreError::Decode(format!(
                "{}: expected an object or an array, found {}",
                self.path.display(),
                kind_of(&other)
            ))),
        }
    }

    async fn save(&self, records: BTreeMap<String, Record>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| StoreError::Io { path: parent.to_path_buf(), source })?;
        }

        let keyed: Map<String, Value> = records.into_iter().collect();
        let encoded = serde_json::to_string_pretty(&Value::Object(keyed))
            .map_err(|error| StoreError::Decode(error.to_string()))?;
        tokio::fs::write(&self.path, encoded)
            .await
            .map_err(|source| StoreError::Io { path: self.path.clone(), source })
    }
}

#[async_trait]
impl RecordStore for JsonFileRecordStore {
    async fn get(&self, id: &str) -> Result<Option<Record>, StoreError> {
        let mut records = self.load().await?;
        Ok(records.remove(id))
    }

    async fn list(&self) -> Result<Vec<StoredRecord>, StoreError> {
        let records = self.load().await?;
        Ok(records.into_iter().map(|(id, record)| StoredRecord { id, record }).collect())
    }

    async fn upsert(&self, id: &str, record: Record) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut records = self.load().await?;
        records.insert(id.to_string(), record);
        self.save(records).await?;
        debug!(
            event_name = "store.json_file.upserted",
            path = %self.path.display(),
            record_id = id,
            "record written"
        );
        Ok(())
    }

    fn id_prefix(&self) -> &str {
        &self.id_prefix
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
