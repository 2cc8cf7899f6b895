use std::sync::{Arc, Weak};

use tracing::{debug, error, info};

use crate::facility::BackgroundTask;
use crate::scheduler::BackupScheduler;

/// The work bound to the recurring backup task: one scheduler tick per wake-up.
pub struct ScheduledBackupTask {
    scheduler: Weak<BackupScheduler>,
}

impl ScheduledBackupTask {
    pub fn new(scheduler: &Arc<BackupScheduler>) -> Self {
        Self {
            scheduler: Arc::downgrade(scheduler),
        }
    }
}

#[async_trait::async_trait]
impl BackgroundTask for ScheduledBackupTask {
    async fn run(&self) {
        let Some(scheduler) = self.scheduler.upgrade() else {
            debug!("scheduler is gone, skipping wake-up");
            return;
        };
        match scheduler.tick().await {
            Ok(true) => info!("scheduled backup created"),
            Ok(false) => debug!("scheduled backup not due"),
            Err(e) => error!(error = %e, kind = e.kind(), "scheduled backup failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::{DateTime, FixedOffset, Utc};
    use spendlog_core::{ManualClock, SchedulePolicy};
    use spendlog_storage::{BackupRepository, MemoryRecordStore, MemorySettingsStore};

    use super::*;
    use crate::facility::{RecurringTaskFacility, TokioTaskFacility};
    use crate::scheduler::BACKUP_TASK_ID;

    #[tokio::test(start_paused = true)]
    async fn facility_wake_ups_drive_gated_backups() {
        let tmp = tempfile::tempdir().unwrap();
        let start = DateTime::parse_from_rfc3339("2024-03-10T02:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let clock = Arc::new(ManualClock::new(start));
        let repo = BackupRepository::init(
            tmp.path(),
            Arc::new(MemoryRecordStore::new()),
            Arc::new(MemorySettingsStore::new()),
        )
        .await
        .unwrap()
        .with_clock(clock.clone());

        let facility = Arc::new(TokioTaskFacility::new(Duration::from_secs(60)));
        let scheduler = Arc::new(
            BackupScheduler::new(repo.clone(), facility.clone()).with_utc_offset(FixedOffset::east_opt(0).unwrap()),
        );
        facility.define_task(BACKUP_TASK_ID, Arc::new(ScheduledBackupTask::new(&scheduler)));

        let policy: SchedulePolicy = scheduler.enable().await.unwrap();
        assert!(policy.enabled);
        assert!(facility.is_registered(BACKUP_TASK_ID).await);

        // Several wake-ups inside the window produce exactly one backup.
        tokio::time::sleep(Duration::from_secs(60 * 4 + 1)).await;
        assert_eq!(repo.list().await.len(), 1);

        scheduler.disable().await.unwrap();
        assert!(!facility.is_registered(BACKUP_TASK_ID).await);
    }

    #[tokio::test]
    async fn dropped_scheduler_is_ignored() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = BackupRepository::init(
            tmp.path(),
            Arc::new(MemoryRecordStore::new()),
            Arc::new(MemorySettingsStore::new()),
        )
        .await
        .unwrap();
        let facility = Arc::new(TokioTaskFacility::new(Duration::from_secs(60)));
        let scheduler = Arc::new(BackupScheduler::new(repo, facility));
        let task = ScheduledBackupTask::new(&scheduler);
        drop(scheduler);
        task.run().await;
    }
}
