use spendlog_core::{Record, StoreError};

/// Settings key holding the opaque application settings blob.
pub const APP_SETTINGS_KEY: &str = "app_settings";
/// Settings key holding the serialized automatic backup policy.
pub const SCHEDULE_POLICY_KEY: &str = "backup_schedule";

/// Persistence of spending records, implemented by the SQLite and in-memory backends.
#[async_trait::async_trait]
pub trait RecordStore: Send + Sync {
    /// Create the schema if absent. Idempotent and safe to call concurrently.
    async fn init(&self) -> Result<(), StoreError>;

    /// All records ordered by date DESC.
    async fn list(&self) -> Result<Vec<Record>, StoreError>;

    /// Insert a record and return its id.
    ///
    /// An identical amount + details pair inserted within the last five
    /// minutes is treated as a duplicate and its id is returned instead.
    async fn add(&self, amount: f64, details: &str, date: &str) -> Result<i64, StoreError>;

    async fn update(&self, id: i64, amount: f64, details: &str, date: &str) -> Result<(), StoreError>;

    async fn delete(&self, id: i64) -> Result<(), StoreError>;

    /// Remove every record.
    async fn clear(&self) -> Result<(), StoreError>;

    /// Insert a record keeping its id, as restore does.
    async fn insert_with_id(&self, record: &Record) -> Result<(), StoreError>;

    async fn count(&self) -> Result<usize, StoreError>;

    /// Atomically replace all records with `records`.
    ///
    /// Stores without a transactional primitive return
    /// [`StoreError::TransactionsUnsupported`] and callers fall back to
    /// record-by-record replacement.
    async fn replace_all(&self, _records: &[Record]) -> Result<usize, StoreError> {
        Err(StoreError::TransactionsUnsupported)
    }
}

/// String key-value storage for settings and the backup policy.
#[async_trait::async_trait]
pub trait SettingsStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
}
