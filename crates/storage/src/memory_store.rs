use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use spendlog_core::{Clock, NewRecord, Record, StoreError, SystemClock};

use crate::store::{RecordStore, SettingsStore};

/// Process-local record store without a transactional primitive.
///
/// Used when the database cannot be opened at startup, and by tests that
/// exercise record-by-record restore.
pub struct MemoryRecordStore {
    clock: Arc<dyn Clock>,
    inner: Mutex<MemoryRecords>,
}

#[derive(Default)]
struct MemoryRecords {
    rows: Vec<(Record, DateTime<Utc>)>,
    next_id: i64,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            inner: Mutex::new(MemoryRecords {
                rows: Vec::new(),
                next_id: 1,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MemoryRecords> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for MemoryRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl RecordStore for MemoryRecordStore {
    async fn init(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Record>, StoreError> {
        let mut records: Vec<Record> = self.lock().rows.iter().map(|(r, _)| r.clone()).collect();
        records.sort_by(|a, b| b.date.cmp(&a.date).then(b.id.cmp(&a.id)));
        Ok(records)
    }

    async fn add(&self, amount: f64, details: &str, date: &str) -> Result<i64, StoreError> {
        let entry = NewRecord::new(amount, details, date)?;
        let now = self.clock.now();
        let cutoff = now - Duration::minutes(5);
        let mut inner = self.lock();
        if let Some((existing, _)) = inner
            .rows
            .iter()
            .rev()
            .find(|(r, at)| *at >= cutoff && r.amount == entry.amount && r.details == entry.details)
        {
            return Ok(existing.id);
        }
        let id = inner.next_id;
        inner.next_id += 1;
        inner.rows.push((entry.with_id(id), now));
        Ok(id)
    }

    async fn update(&self, id: i64, amount: f64, details: &str, date: &str) -> Result<(), StoreError> {
        let entry = NewRecord::new(amount, details, date)?;
        let mut inner = self.lock();
        let (record, _) = inner
            .rows
            .iter_mut()
            .find(|(r, _)| r.id == id)
            .ok_or(StoreError::NotFound(id))?;
        *record = entry.with_id(id);
        Ok(())
    }

    async fn delete(&self, id: i64) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let before = inner.rows.len();
        inner.rows.retain(|(r, _)| r.id != id);
        if inner.rows.len() == before {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.lock().rows.clear();
        Ok(())
    }

    async fn insert_with_id(&self, record: &Record) -> Result<(), StoreError> {
        let next = record
            .id
            .checked_add(1)
            .ok_or_else(|| StoreError::InvalidRecord(format!("record id {} is out of range", record.id)))?;
        let mut inner = self.lock();
        if inner.rows.iter().any(|(r, _)| r.id == record.id) {
            return Err(StoreError::InvalidRecord(format!("duplicate record id {}", record.id)));
        }
        inner.next_id = inner.next_id.max(next);
        // Restored rows sit outside the dedup window.
        inner.rows.push((record.clone(), DateTime::<Utc>::MIN_UTC));
        Ok(())
    }

    async fn count(&self) -> Result<usize, StoreError> {
        Ok(self.lock().rows.len())
    }
}

#[derive(Default)]
pub struct MemorySettingsStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl SettingsStore for MemorySettingsStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.values.lock().unwrap_or_else(|e| e.into_inner()).get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.values
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_owned(), value.to_owned());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spendlog_core::ManualClock;

    #[tokio::test]
    async fn dedup_window_matches_sqlite_store() {
        let start = DateTime::parse_from_rfc3339("2024-01-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let clock = Arc::new(ManualClock::new(start));
        let store = MemoryRecordStore::with_clock(clock.clone());

        let a = store.add(12.5, "Coffee", "2024-01-01").await.unwrap();
        clock.advance(Duration::minutes(5));
        let b = store.add(12.5, "Coffee", "2024-01-01").await.unwrap();
        assert_eq!(a, b);

        clock.advance(Duration::minutes(6));
        let c = store.add(12.5, "Coffee", "2024-01-01").await.unwrap();
        assert_ne!(a, c);
        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn has_no_transactions() {
        let store = MemoryRecordStore::new();
        assert!(matches!(
            store.replace_all(&[]).await,
            Err(StoreError::TransactionsUnsupported)
        ));
    }

    #[tokio::test]
    async fn restored_ids_advance_the_sequence() {
        let store = MemoryRecordStore::new();
        store
            .insert_with_id(&Record {
                id: 10,
                amount: 1.0,
                details: "a".into(),
                date: "2024-01-01".into(),
            })
            .await
            .unwrap();
        let next = store.add(2.0, "b", "2024-01-02").await.unwrap();
        assert_eq!(next, 11);
    }

    #[tokio::test]
    async fn max_id_is_rejected_without_panicking() {
        let store = MemoryRecordStore::new();
        let err = store
            .insert_with_id(&Record {
                id: i64::MAX,
                amount: 1.0,
                details: "edge".into(),
                date: "2024-01-01".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidRecord(_)));
        assert_eq!(store.count().await.unwrap(), 0);
        assert_eq!(store.add(2.0, "b", "2024-01-02").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn restored_records_do_not_swallow_new_entries() {
        let store = MemoryRecordStore::new();
        store
            .insert_with_id(&Record {
                id: 3,
                amount: 4.5,
                details: "Coffee".into(),
                date: "2024-03-01".into(),
            })
            .await
            .unwrap();
        let fresh = store.add(4.5, "Coffee", "2024-03-01").await.unwrap();
        assert_eq!(fresh, 4);
        assert_eq!(store.count().await.unwrap(), 2);
    }
}
