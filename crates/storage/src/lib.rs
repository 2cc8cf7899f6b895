pub mod memory_store;
mod repository;
mod restore;
pub mod share;
pub mod sqlite_store;
pub mod store;

pub use memory_store::{MemoryRecordStore, MemorySettingsStore};
pub use repository::{backup_id_from_filename, BackupRepository, BACKUP_FILE_PREFIX, DEFAULT_RETENTION};
pub use restore::{RestoreEngine, RestoreReport};
pub use share::ShareFacility;
pub use sqlite_store::{SqliteRecordStore, SqliteSettingsStore};
pub use store::{RecordStore, SettingsStore, APP_SETTINGS_KEY, SCHEDULE_POLICY_KEY};
