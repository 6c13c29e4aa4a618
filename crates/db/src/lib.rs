pub mod connection;
pub mod stores;

pub use connection::{connect, connect_with_settings, DbPool};
pub use stores::{
    InMemoryRecordStore, JsonFileRecordStore, Record, RecordStore, SqliteRecordStore, StoreError,
    StoredRecord,
};
