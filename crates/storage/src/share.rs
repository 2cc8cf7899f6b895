use std::path::Path;

use spendlog_core::BackupResult;

/// Hands an exported snapshot file to whatever the host uses for sharing.
#[async_trait::async_trait]
pub trait ShareFacility: Send + Sync {
    fn is_available(&self) -> bool;

    async fn share(&self, path: &Path) -> BackupResult<()>;
}
