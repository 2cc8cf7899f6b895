use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Duration;
use rusqlite::{params, Connection, OptionalExtension};
use spendlog_core::codec::format_timestamp;
use spendlog_core::{Clock, NewRecord, Record, StoreError, SystemClock};
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::store::{RecordStore, SettingsStore};

const DEDUP_WINDOW_MINUTES: i64 = 5;
/// `created_at` for restored rows, older than any dedup cutoff.
const RESTORED_CREATED_AT: &str = "1970-01-01T00:00:00.000Z";

/// SQLite-backed record store.
///
/// Every call opens its connection through [`SqliteRecordStore::with_connection`]
/// on the blocking pool; the schema is created once per instance.
pub struct SqliteRecordStore {
    db_path: PathBuf,
    clock: Arc<dyn Clock>,
    schema: OnceCell<()>,
}

impl SqliteRecordStore {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self::with_clock(db_path, Arc::new(SystemClock))
    }

    pub fn with_clock(db_path: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Self {
        Self {
            db_path: db_path.into(),
            clock,
            schema: OnceCell::new(),
        }
    }

    async fn with_connection<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = open_connection(&db_path)?;
            op(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }

    async fn create_schema(&self) -> Result<(), StoreError> {
        self.with_connection(|conn| {
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS records (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    amount REAL NOT NULL,
                    details TEXT NOT NULL,
                    date TEXT NOT NULL,
                    created_at TEXT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS records_recent ON records (created_at);",
            )
            .map_err(sql_err)
        })
        .await?;
        debug!(db = %self.db_path.display(), "record schema ready");
        Ok(())
    }
}

#[async_trait::async_trait]
impl RecordStore for SqliteRecordStore {
    async fn init(&self) -> Result<(), StoreError> {
        self.schema
            .get_or_try_init(|| self.create_schema())
            .await
            .map(|_| ())
    }

    async fn list(&self) -> Result<Vec<Record>, StoreError> {
        self.init().await?;
        self.with_connection(|conn| {
            let mut stmt = conn
                .prepare("SELECT id, amount, details, date FROM records ORDER BY date DESC, id DESC")
                .map_err(sql_err)?;
            let rows = stmt.query_map([], row_to_record).map_err(sql_err)?;
            rows.collect::<rusqlite::Result<Vec<_>>>().map_err(sql_err)
        })
        .await
    }

    async fn add(&self, amount: f64, details: &str, date: &str) -> Result<i64, StoreError> {
        let entry = NewRecord::new(amount, details, date)?;
        self.init().await?;
        let now = self.clock.now();
        let created_at = format_timestamp(now);
        let cutoff = format_timestamp(now - Duration::minutes(DEDUP_WINDOW_MINUTES));
        self.with_connection(move |conn| {
            match find_recent_duplicate(conn, &entry, &cutoff) {
                Ok(Some(existing)) => {
                    debug!(id = existing, "duplicate record within dedup window, keeping existing");
                    return Ok(existing);
                }
                Ok(None) => {}
                Err(e) => warn!(error = %e, "duplicate check failed, inserting anyway"),
            }
            conn.execute(
                "INSERT INTO records (amount, details, date, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![entry.amount, entry.details, entry.date, created_at],
            )
            .map_err(sql_err)?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    async fn update(&self, id: i64, amount: f64, details: &str, date: &str) -> Result<(), StoreError> {
        let entry = NewRecord::new(amount, details, date)?;
        self.init().await?;
        self.with_connection(move |conn| {
            let changed = conn
                .execute(
                    "UPDATE records SET amount = ?1, details = ?2, date = ?3 WHERE id = ?4",
                    params![entry.amount, entry.details, entry.date, id],
                )
                .map_err(sql_err)?;
            if changed == 0 {
                return Err(StoreError::NotFound(id));
            }
            Ok(())
        })
        .await
    }

    async fn delete(&self, id: i64) -> Result<(), StoreError> {
        self.init().await?;
        self.with_connection(move |conn| {
            let changed = conn
                .execute("DELETE FROM records WHERE id = ?1", [id])
                .map_err(sql_err)?;
            if changed == 0 {
                return Err(StoreError::NotFound(id));
            }
            Ok(())
        })
        .await
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.init().await?;
        self.with_connection(|conn| {
            conn.execute("DELETE FROM records", []).map_err(sql_err)?;
            Ok(())
        })
        .await
    }

    async fn insert_with_id(&self, record: &Record) -> Result<(), StoreError> {
        self.init().await?;
        let record = record.clone();
        self.with_connection(move |conn| {
            insert_record(conn, &record, RESTORED_CREATED_AT).map_err(sql_err)?;
            Ok(())
        })
        .await
    }

    async fn count(&self) -> Result<usize, StoreError> {
        self.init().await?;
        self.with_connection(|conn| {
            let n: i64 = conn
                .query_row("SELECT COUNT(*) FROM records", [], |row| row.get(0))
                .map_err(sql_err)?;
            Ok(n as usize)
        })
        .await
    }

    async fn replace_all(&self, records: &[Record]) -> Result<usize, StoreError> {
        self.init().await?;
        let records = records.to_vec();
        self.with_connection(move |conn| {
            // Dropping the transaction without commit rolls it back.
            let tx = conn.transaction().map_err(sql_err)?;
            tx.execute("DELETE FROM records", []).map_err(sql_err)?;
            for record in &records {
                insert_record(&tx, record, RESTORED_CREATED_AT).map_err(sql_err)?;
            }
            tx.commit().map_err(sql_err)?;
            Ok(records.len())
        })
        .await
    }
}

/// Key-value settings stored in the same database file as the records.
pub struct SqliteSettingsStore {
    db_path: PathBuf,
    schema: OnceCell<()>,
}

impl SqliteSettingsStore {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            schema: OnceCell::new(),
        }
    }

    async fn ready(&self) -> Result<(), StoreError> {
        self.schema
            .get_or_try_init(|| async {
                let db_path = self.db_path.clone();
                tokio::task::spawn_blocking(move || {
                    let conn = open_connection(&db_path)?;
                    conn.execute_batch(
                        "CREATE TABLE IF NOT EXISTS settings (
                            key TEXT PRIMARY KEY,
                            value TEXT NOT NULL
                        );",
                    )
                    .map_err(sql_err)
                })
                .await
                .map_err(|e| StoreError::Task(e.to_string()))?
            })
            .await
            .map(|_| ())
    }
}

#[async_trait::async_trait]
impl SettingsStore for SqliteSettingsStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.ready().await?;
        let db_path = self.db_path.clone();
        let key = key.to_owned();
        tokio::task::spawn_blocking(move || {
            let conn = open_connection(&db_path)?;
            conn.query_row("SELECT value FROM settings WHERE key = ?1", [key], |row| {
                row.get::<_, String>(0)
            })
            .optional()
            .map_err(sql_err)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.ready().await?;
        let db_path = self.db_path.clone();
        let key = key.to_owned();
        let value = value.to_owned();
        tokio::task::spawn_blocking(move || {
            let conn = open_connection(&db_path)?;
            conn.execute(
                "INSERT INTO settings (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )
            .map_err(sql_err)?;
            Ok(())
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

fn open_connection(db_path: &Path) -> Result<Connection, StoreError> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let conn = Connection::open(db_path).map_err(sql_err)?;
    // The scheduled task and the foreground may touch the file back to back.
    conn.busy_timeout(StdDuration::from_secs(5)).map_err(sql_err)?;
    Ok(conn)
}

fn find_recent_duplicate(conn: &Connection, entry: &NewRecord, cutoff: &str) -> rusqlite::Result<Option<i64>> {
    conn.query_row(
        "SELECT id FROM records WHERE amount = ?1 AND details = ?2 AND created_at >= ?3
         ORDER BY id DESC LIMIT 1",
        params![entry.amount, entry.details, cutoff],
        |row| row.get(0),
    )
    .optional()
}

fn insert_record(conn: &Connection, record: &Record, created_at: &str) -> rusqlite::Result<usize> {
    conn.execute(
        "INSERT INTO records (id, amount, details, date, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![record.id, record.amount, record.details, record.date, created_at],
    )
}

fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<Record> {
    Ok(Record {
        id: row.get(0)?,
        amount: row.get(1)?,
        details: row.get(2)?,
        date: row.get(3)?,
    })
}

fn sql_err(e: rusqlite::Error) -> StoreError {
    StoreError::Sqlite(e.to_string())
}
