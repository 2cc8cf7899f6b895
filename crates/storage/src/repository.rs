use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use spendlog_core::codec::{self, format_timestamp, sanitize_timestamp};
use spendlog_core::{BackupError, BackupInfo, BackupResult, BackupStats, Clock, SystemClock};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::share::ShareFacility;
use crate::store::{RecordStore, SettingsStore, APP_SETTINGS_KEY};

pub const BACKUP_FILE_PREFIX: &str = "budget_backup_";
pub const IMPORTED_ID_PREFIX: &str = "imported_";
pub const DEFAULT_RETENTION: usize = 10;

/// Owns the directory of snapshot files.
///
/// Cheap to clone; clones share the same stores and clock.
#[derive(Clone)]
pub struct BackupRepository {
    backups_dir: PathBuf,
    exports_dir: PathBuf,
    records: Arc<dyn RecordStore>,
    settings: Arc<dyn SettingsStore>,
    clock: Arc<dyn Clock>,
    retention: usize,
}

impl BackupRepository {
    /// Prepares `<root>/backups` and `<root>/exports`.
    pub async fn init(
        root: impl Into<PathBuf>,
        records: Arc<dyn RecordStore>,
        settings: Arc<dyn SettingsStore>,
    ) -> BackupResult<Self> {
        let root = root.into();
        let backups_dir = root.join("backups");
        let exports_dir = root.join("exports");
        fs::create_dir_all(&backups_dir).await?;
        fs::create_dir_all(&exports_dir).await?;
        Ok(Self {
            backups_dir,
            exports_dir,
            records,
            settings,
            clock: Arc::new(SystemClock),
            retention: DEFAULT_RETENTION,
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Maximum number of snapshots kept after a create. At least one is always kept.
    pub fn with_retention(mut self, max_backups: usize) -> Self {
        self.retention = max_backups.max(1);
        self
    }

    pub fn backups_dir(&self) -> &Path {
        &self.backups_dir
    }

    pub fn records(&self) -> &Arc<dyn RecordStore> {
        &self.records
    }

    pub fn settings(&self) -> &Arc<dyn SettingsStore> {
        &self.settings
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Snapshots the current records and settings into a new file, then
    /// applies retention.
    pub async fn create(&self) -> BackupResult<BackupInfo> {
        let records = match self.records.list().await {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, "reading records failed, backing up an empty record set");
                Vec::new()
            }
        };
        let settings = self.load_settings().await;

        let (created_at, path) = self.free_slot(self.clock.now(), "").await;
        let snapshot = codec::serialize(records, settings, created_at);
        let json = codec::to_json(&snapshot)?;
        write_durably(&path, json.as_bytes()).await?;

        let filename = file_name_of(&path);
        let backup = BackupInfo {
            id: sanitize_timestamp(&snapshot.timestamp),
            filename,
            timestamp: snapshot.timestamp.clone(),
            size_bytes: json.len() as u64,
            record_count: snapshot.metadata.total_records,
            total_amount: snapshot.metadata.total_amount,
            is_verified: true,
        };
        info!(
            backup_id = %backup.id,
            records = backup.record_count,
            size_bytes = backup.size_bytes,
            "backup created"
        );

        match self.prune().await {
            Ok(removed) if !removed.is_empty() => {
                info!(removed = removed.len(), cap = self.retention, "retention pruning removed old backups")
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "retention pruning failed"),
        }
        Ok(backup)
    }

    /// All readable snapshots, newest first. Unreadable files are skipped.
    pub async fn list(&self) -> Vec<BackupInfo> {
        let mut entries = match fs::read_dir(&self.backups_dir).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, dir = %self.backups_dir.display(), "cannot read backups directory");
                return Vec::new();
            }
        };

        let mut backups = Vec::new();
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "stopped reading backups directory early");
                    break;
                }
            };
            let filename = entry.file_name().to_string_lossy().into_owned();
            let Some(id) = backup_id_from_filename(&filename) else {
                continue;
            };
            match describe(&entry.path(), id.to_owned(), filename.clone()).await {
                Ok(backup) => backups.push(backup),
                Err(e) => warn!(file = %filename, error = %e, "skipping unreadable backup"),
            }
        }

        backups.sort_by(|a, b| timestamp_key(&b.timestamp).cmp(&timestamp_key(&a.timestamp)));
        backups
    }

    pub async fn delete(&self, id: &str) -> BackupResult<()> {
        let path = self.require_backup_file(id).await?;
        fs::remove_file(&path).await?;
        info!(backup_id = id, "backup deleted");
        Ok(())
    }

    /// Copies a snapshot into the exports directory and returns the copy's path.
    pub async fn export(&self, id: &str) -> BackupResult<PathBuf> {
        let source = self.require_backup_file(id).await?;
        fs::create_dir_all(&self.exports_dir).await?;
        let target = self.exports_dir.join(file_name_of(&source));
        fs::copy(&source, &target).await?;
        info!(backup_id = id, path = %target.display(), "backup exported");
        Ok(target)
    }

    /// Exports a snapshot and hands it to the sharing facility.
    pub async fn share(&self, id: &str, facility: &dyn ShareFacility) -> BackupResult<PathBuf> {
        if !facility.is_available() {
            return Err(BackupError::SharingUnavailable);
        }
        let path = self.export(id).await?;
        facility.share(&path).await?;
        Ok(path)
    }

    /// Verifies an external snapshot file and copies it in under a fresh id.
    ///
    /// Nothing is written when the source fails to parse or verify.
    pub async fn import(&self, source: &Path) -> BackupResult<BackupInfo> {
        let text = fs::read_to_string(source)
            .await
            .map_err(|e| BackupError::CorruptBackup(format!("read {}: {e}", source.display())))?;
        let doc = codec::decode(&text)?;
        if let Some(reason) = codec::verification_failure(&doc) {
            warn!(source = %source.display(), reason = %reason, "rejected import");
            return Err(BackupError::InvalidBackup(reason));
        }

        let (_, path) = self.free_slot(self.clock.now(), IMPORTED_ID_PREFIX).await;
        write_durably(&path, text.as_bytes()).await?;

        let filename = file_name_of(&path);
        let id = backup_id_from_filename(&filename).unwrap_or_default().to_owned();
        info!(backup_id = %id, source = %source.display(), "backup imported");
        Ok(codec::summarize(id, filename, text.len() as u64, &doc))
    }

    pub async fn stats(&self) -> BackupStats {
        BackupStats::from_backups(&self.list().await)
    }

    /// Deletes the oldest snapshots beyond the retention cap; returns their ids.
    pub async fn prune(&self) -> BackupResult<Vec<String>> {
        let mut backups = self.list().await;
        if backups.len() <= self.retention {
            return Ok(Vec::new());
        }
        let excess = backups.split_off(self.retention);
        let mut removed = Vec::with_capacity(excess.len());
        for backup in excess.into_iter().rev() {
            fs::remove_file(self.backups_dir.join(&backup.filename)).await?;
            debug!(backup_id = %backup.id, "pruned backup");
            removed.push(backup.id);
        }
        Ok(removed)
    }

    /// Reads and decodes a stored snapshot without verifying it.
    pub async fn read_document(&self, id: &str) -> BackupResult<Value> {
        let path = self.require_backup_file(id).await?;
        let text = fs::read_to_string(&path)
            .await
            .map_err(|e| BackupError::CorruptBackup(format!("read {}: {e}", path.display())))?;
        codec::decode(&text)
    }

    async fn find_backup_file(&self, id: &str) -> Option<PathBuf> {
        if id.is_empty() || id.contains(['/', '\\']) || id.contains("..") {
            return None;
        }
        let path = self.backup_path(id);
        match fs::try_exists(&path).await {
            Ok(true) => Some(path),
            _ => None,
        }
    }

    async fn require_backup_file(&self, id: &str) -> BackupResult<PathBuf> {
        self.find_backup_file(id)
            .await
            .ok_or_else(|| BackupError::NotFound(id.to_owned()))
    }

    fn backup_path(&self, id: &str) -> PathBuf {
        self.backups_dir.join(format!("{BACKUP_FILE_PREFIX}{id}.json"))
    }

    /// First unused file name at or after `at`, bumping by a millisecond on collision.
    async fn free_slot(&self, mut at: DateTime<Utc>, id_prefix: &str) -> (DateTime<Utc>, PathBuf) {
        loop {
            let id = format!("{id_prefix}{}", sanitize_timestamp(&format_timestamp(at)));
            let path = self.backup_path(&id);
            if !fs::try_exists(&path).await.unwrap_or(false) {
                return (at, path);
            }
            at += Duration::milliseconds(1);
        }
    }

    async fn load_settings(&self) -> Option<Value> {
        match self.settings.get(APP_SETTINGS_KEY).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!(error = %e, "app settings are not valid JSON, leaving them out of the backup");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "reading app settings failed, leaving them out of the backup");
                None
            }
        }
    }
}

/// Backup id encoded in a snapshot filename, if it is one.
pub fn backup_id_from_filename(filename: &str) -> Option<&str> {
    filename
        .strip_prefix(BACKUP_FILE_PREFIX)?
        .strip_suffix(".json")
        .filter(|id| !id.is_empty())
}

async fn describe(path: &Path, id: String, filename: String) -> BackupResult<BackupInfo> {
    let text = fs::read_to_string(path).await?;
    let size = fs::metadata(path).await?.len();
    let doc = codec::decode(&text)?;
    Ok(codec::summarize(id, filename, size, &doc))
}

// Write to a sibling temp file, flush to disk, then rename into place so a
// crash never leaves a truncated snapshot under a listed name.
async fn write_durably(path: &Path, bytes: &[u8]) -> BackupResult<()> {
    let tmp = path.with_extension("json.tmp");
    let mut file = fs::File::create(&tmp).await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    drop(file);
    fs::rename(&tmp, path).await?;
    Ok(())
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn timestamp_key(raw: &str) -> (Option<DateTime<Utc>>, String) {
    let parsed = DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc));
    (parsed, raw.to_owned())
}
