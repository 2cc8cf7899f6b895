use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::FixedOffset;
use spendlog_scheduler::{BackupScheduler, ScheduledBackupTask, TokioTaskFacility, BACKUP_TASK_ID};
use spendlog_storage::{
    BackupRepository, MemoryRecordStore, MemorySettingsStore, RecordStore, RestoreEngine, SettingsStore,
    SqliteRecordStore, SqliteSettingsStore, DEFAULT_RETENTION,
};
use tracing::{error, info, warn};

use crate::share::CommandShare;

/// Ceiling on the whole startup sequence before falling back to a degraded app.
pub const INIT_TIMEOUT: Duration = Duration::from_secs(30);

const DEFAULT_GRANULARITY: Duration = Duration::from_secs(5 * 60);

/// Resolved runtime options (config file merged with environment).
#[derive(Debug, Clone)]
pub struct AppOptions {
    pub root: PathBuf,
    pub retention: usize,
    pub granularity: Duration,
    pub utc_offset: Option<FixedOffset>,
    pub share_command: Option<String>,
}

impl AppOptions {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            retention: DEFAULT_RETENTION,
            granularity: DEFAULT_GRANULARITY,
            utc_offset: None,
            share_command: None,
        }
    }

    pub fn database_path(&self) -> PathBuf {
        self.root.join("data").join("spendlog.db")
    }
}

/// Explicitly wired application components.
#[derive(Clone)]
pub struct App {
    pub repo: BackupRepository,
    pub restore: RestoreEngine,
    pub scheduler: Arc<BackupScheduler>,
    pub facility: Arc<TokioTaskFacility>,
    pub share: Arc<CommandShare>,
    pub degraded: bool,
}

impl App {
    /// SQLite-backed app rooted at `opts.root`.
    pub async fn open(opts: &AppOptions) -> Result<Self> {
        let db = opts.database_path();
        let records = Arc::new(SqliteRecordStore::new(&db));
        records.init().await.context("initialize record store")?;
        let settings = Arc::new(SqliteSettingsStore::new(&db));
        Self::assemble(opts, &opts.root, records, settings, false).await
    }

    /// In-memory records and settings; backups still go to disk when possible.
    pub async fn degraded(opts: &AppOptions) -> Result<Self> {
        let records: Arc<dyn RecordStore> = Arc::new(MemoryRecordStore::new());
        let settings: Arc<dyn SettingsStore> = Arc::new(MemorySettingsStore::new());
        match Self::assemble(opts, &opts.root, records.clone(), settings.clone(), true).await {
            Ok(app) => Ok(app),
            Err(e) => {
                let fallback = std::env::temp_dir().join("spendlog-degraded");
                warn!(error = %e, root = %fallback.display(), "backup root unusable, using temp dir");
                Self::assemble(opts, &fallback, records, settings, true).await
            }
        }
    }

    async fn assemble(
        opts: &AppOptions,
        root: &Path,
        records: Arc<dyn RecordStore>,
        settings: Arc<dyn SettingsStore>,
        degraded: bool,
    ) -> Result<Self> {
        let repo = BackupRepository::init(root, records, settings)
            .await
            .with_context(|| format!("prepare backup directories under {}", root.display()))?
            .with_retention(opts.retention);

        let facility = Arc::new(TokioTaskFacility::new(opts.granularity));
        let mut scheduler = BackupScheduler::new(repo.clone(), facility.clone());
        if let Some(offset) = opts.utc_offset {
            scheduler = scheduler.with_utc_offset(offset);
        }
        let scheduler = Arc::new(scheduler);
        facility.define_task(BACKUP_TASK_ID, Arc::new(ScheduledBackupTask::new(&scheduler)));

        Ok(Self {
            restore: RestoreEngine::new(repo.clone()),
            repo,
            scheduler,
            facility,
            share: Arc::new(CommandShare::new(opts.share_command.clone())),
            degraded,
        })
    }
}

/// Full startup: stores, directories and re-registration of an enabled schedule.
async fn startup(opts: &AppOptions) -> Result<App> {
    let app = App::open(opts).await?;
    if let Err(e) = app.scheduler.resume().await {
        warn!(error = %e, "automatic backups could not be resumed and were disabled");
    }
    Ok(app)
}

/// Starts the app within `limit`; on failure or timeout returns a degraded app.
pub async fn start_within(opts: &AppOptions, limit: Duration) -> Result<App> {
    match tokio::time::timeout(limit, startup(opts)).await {
        Ok(Ok(app)) => {
            info!(root = %opts.root.display(), "spendlog ready");
            Ok(app)
        }
        Ok(Err(e)) => {
            error!(error = %format!("{e:#}"), "startup failed, continuing with in-memory data");
            App::degraded(opts).await
        }
        Err(_) => {
            error!(limit_secs = limit.as_secs(), "startup timed out, continuing with in-memory data");
            App::degraded(opts).await
        }
    }
}

pub async fn start(opts: &AppOptions) -> Result<App> {
    start_within(opts, INIT_TIMEOUT).await
}
