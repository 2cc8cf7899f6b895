use std::path::Path;
use std::process::Command;

use spendlog_core::{BackupError, BackupResult};
use spendlog_storage::ShareFacility;
use tracing::info;

/// Shares exported files by running a configured shell command.
///
/// The command runs under `sh -lc` with `SPENDLOG_SHARE_PATH` pointing at the
/// exported file. Without a command, sharing is unavailable.
#[derive(Debug, Clone, Default)]
pub struct CommandShare {
    command: Option<String>,
}

impl CommandShare {
    pub fn new(command: Option<String>) -> Self {
        Self {
            command: command.filter(|c| !c.trim().is_empty()),
        }
    }
}

#[async_trait::async_trait]
impl ShareFacility for CommandShare {
    fn is_available(&self) -> bool {
        self.command.is_some()
    }

    async fn share(&self, path: &Path) -> BackupResult<()> {
        let cmd = self.command.clone().ok_or(BackupError::SharingUnavailable)?;
        let path = path.to_path_buf();
        let out = tokio::task::spawn_blocking(move || {
            Command::new("sh")
                .arg("-lc")
                .arg(&cmd)
                .env("SPENDLOG_SHARE_PATH", &path)
                .output()
        })
        .await
        .map_err(|e| BackupError::Io(std::io::Error::other(e.to_string())))??;

        if !out.status.success() {
            return Err(BackupError::Io(std::io::Error::other(format!(
                "share command failed ({}): {}",
                out.status,
                String::from_utf8_lossy(&out.stderr)
            ))));
        }
        info!("backup handed to share command");
        Ok(())
    }
}
