use serde::Serialize;
use spendlog_core::codec;
use spendlog_core::{BackupError, BackupResult, Record, StoreError};
use tracing::{info, warn};

use crate::repository::BackupRepository;
use crate::store::APP_SETTINGS_KEY;

/// Outcome of a completed restore.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreReport {
    pub backup_id: String,
    pub expected: usize,
    pub restored: usize,
    pub skipped: usize,
    pub transactional: bool,
}

/// Replaces the live record store with the contents of a stored snapshot.
#[derive(Clone)]
pub struct RestoreEngine {
    repo: BackupRepository,
}

impl RestoreEngine {
    pub fn new(repo: BackupRepository) -> Self {
        Self { repo }
    }

    /// Destructively restores snapshot `id`.
    ///
    /// Uses the store's transaction when it has one, so a failure leaves the
    /// previous records in place. Otherwise records are replaced one by one and
    /// individual failures are skipped.
    pub async fn restore(&self, id: &str) -> BackupResult<RestoreReport> {
        let doc = self.repo.read_document(id).await?;
        if let Some(reason) = codec::verification_failure(&doc) {
            return Err(BackupError::InvalidBackup(reason));
        }
        let snapshot = codec::into_snapshot(doc)?;
        let expected = snapshot.records.len();

        let store = self.repo.records();
        store.init().await?;
        let (transactional, skipped) = match store.replace_all(&snapshot.records).await {
            Ok(_) => (true, 0),
            Err(StoreError::TransactionsUnsupported) => {
                warn!(backup_id = id, "store has no transactions, restoring record by record");
                (false, self.replace_record_by_record(&snapshot.records).await?)
            }
            Err(e) => return Err(e.into()),
        };

        let restored = store.count().await?;
        if expected > 0 && restored == 0 {
            return Err(BackupError::RestoreVerification { expected, restored });
        }

        if let Some(settings) = snapshot.settings.as_ref().filter(|s| !s.is_null()) {
            let raw = serde_json::to_string(settings)
                .map_err(|e| BackupError::InvalidBackup(format!("settings: {e}")))?;
            self.repo.settings().set(APP_SETTINGS_KEY, &raw).await?;
        }

        info!(backup_id = id, expected, restored, skipped, transactional, "restore completed");
        Ok(RestoreReport {
            backup_id: id.to_owned(),
            expected,
            restored,
            skipped,
            transactional,
        })
    }

    async fn replace_record_by_record(&self, records: &[Record]) -> BackupResult<usize> {
        let store = self.repo.records();
        store.clear().await?;
        let mut skipped = 0;
        for record in records {
            if let Err(e) = store.insert_with_id(record).await {
                warn!(record_id = record.id, error = %e, "skipping record that could not be restored");
                skipped += 1;
            }
        }
        Ok(skipped)
    }
}
