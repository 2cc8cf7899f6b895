use thiserror::Error;

/// Failures of the record and settings persistence layer.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store error: sqlite: {0}")]
    Sqlite(String),
    #[error("store error: io: {0}")]
    Io(String),
    #[error("store error: invalid record: {0}")]
    InvalidRecord(String),
    #[error("store error: record {0} not found")]
    NotFound(i64),
    #[error("store error: transactions are not supported by this store")]
    TransactionsUnsupported,
    #[error("store error: background task failed: {0}")]
    Task(String),
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io(err.to_string())
    }
}

/// Errors surfaced by the backup, restore and scheduling operations.
///
/// `Display` combines the error kind with the underlying message so callers
/// can show it to the user verbatim.
#[derive(Debug, Error)]
pub enum BackupError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("corrupt backup: {0}")]
    CorruptBackup(String),
    #[error("invalid backup: {0}")]
    InvalidBackup(String),
    #[error("not found: backup {0} does not exist")]
    NotFound(String),
    #[error("scheduling unavailable: {0}")]
    SchedulingUnavailable(String),
    #[error("restore verification failed: expected {expected} records, {restored} restored")]
    RestoreVerification { expected: usize, restored: usize },
    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),
    #[error("sharing unavailable on this device")]
    SharingUnavailable,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl BackupError {
    /// Stable machine-readable kind, used by API error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            BackupError::Store(_) => "StoreError",
            BackupError::CorruptBackup(_) => "CorruptBackupError",
            BackupError::InvalidBackup(_) => "InvalidBackupError",
            BackupError::NotFound(_) => "NotFoundError",
            BackupError::SchedulingUnavailable(_) => "SchedulingUnavailableError",
            BackupError::RestoreVerification { .. } => "RestoreVerificationError",
            BackupError::InvalidSchedule(_) => "InvalidScheduleError",
            BackupError::SharingUnavailable => "SharingUnavailableError",
            BackupError::Io(_) => "IoError",
        }
    }
}

pub type BackupResult<T> = Result<T, BackupError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_carries_kind_and_detail() {
        let err = BackupError::CorruptBackup("expected value at line 1".into());
        assert_eq!(err.kind(), "CorruptBackupError");
        assert_eq!(err.to_string(), "corrupt backup: expected value at line 1");
    }

    #[test]
    fn store_errors_convert_transparently() {
        let err: BackupError = StoreError::NotFound(7).into();
        assert_eq!(err.kind(), "StoreError");
        assert!(err.to_string().contains("record 7 not found"));
    }
}
