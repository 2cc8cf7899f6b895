use std::sync::Arc;

use chrono::{DateTime, Duration, FixedOffset, Local, NaiveDateTime, TimeZone, Timelike, Utc};
use spendlog_core::policy::parse_time_of_day;
use spendlog_core::{BackupError, BackupInfo, BackupResult, Frequency, SchedulePolicy};
use spendlog_storage::{BackupRepository, SCHEDULE_POLICY_KEY};
use tracing::{debug, info, warn};

use crate::facility::{FacilityError, FacilityStatus, RecurringTaskFacility};

pub const BACKUP_TASK_ID: &str = "spendlog-auto-backup";
pub const DEFAULT_TOLERANCE_MINUTES: i64 = 5;

const SECONDS_PER_DAY: i64 = 24 * 60 * 60;

/// Decides when automatic backups run and keeps the recurring task
/// registration in line with the persisted [`SchedulePolicy`].
///
/// The facility may wake the task far more often than the configured cadence;
/// [`BackupScheduler::tick`] only backs up when a backup is both due and the
/// wall clock is near the configured time of day.
pub struct BackupScheduler {
    repo: BackupRepository,
    facility: Arc<dyn RecurringTaskFacility>,
    /// Fixed offset for reading `HH:MM`; the host's local time zone when unset.
    offset: Option<FixedOffset>,
    tolerance: Duration,
}

impl BackupScheduler {
    /// Interprets the policy time in the host's local time zone, resolved
    /// per call so daylight saving changes are followed.
    pub fn new(repo: BackupRepository, facility: Arc<dyn RecurringTaskFacility>) -> Self {
        Self {
            repo,
            facility,
            offset: None,
            tolerance: Duration::minutes(DEFAULT_TOLERANCE_MINUTES),
        }
    }

    pub fn with_utc_offset(mut self, offset: FixedOffset) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn repository(&self) -> &BackupRepository {
        &self.repo
    }

    /// Stored policy, or the default when it is missing or unreadable.
    pub async fn policy(&self) -> SchedulePolicy {
        match self.repo.settings().get(SCHEDULE_POLICY_KEY).await {
            Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!(error = %e, "stored backup schedule is unreadable, using defaults");
                SchedulePolicy::default()
            }),
            Ok(None) => SchedulePolicy::default(),
            Err(e) => {
                warn!(error = %e, "reading backup schedule failed, using defaults");
                SchedulePolicy::default()
            }
        }
    }

    async fn save_policy(&self, policy: &SchedulePolicy) -> BackupResult<()> {
        let raw = serde_json::to_string(policy)
            .map_err(|e| BackupError::InvalidSchedule(e.to_string()))?;
        self.repo.settings().set(SCHEDULE_POLICY_KEY, &raw).await?;
        Ok(())
    }

    /// Turns automatic backups on and registers the recurring task.
    ///
    /// If the facility refuses, the stored policy is left disabled.
    pub async fn enable(&self) -> BackupResult<SchedulePolicy> {
        let mut policy = self.policy().await;
        if let Err(e) = self.register(policy.frequency).await {
            self.fall_back_to_disabled(policy).await;
            return Err(e);
        }
        policy.enabled = true;
        if let Err(e) = self.save_policy(&policy).await {
            self.unregister_quietly().await;
            return Err(e);
        }
        info!(frequency = %policy.frequency, time = %policy.time, "automatic backups enabled");
        Ok(policy)
    }

    /// Turns automatic backups off. A task that is already gone counts as success.
    pub async fn disable(&self) -> BackupResult<SchedulePolicy> {
        match self.facility.unregister(BACKUP_TASK_ID).await {
            Ok(()) | Err(FacilityError::NotRegistered(_)) => {}
            Err(e) => return Err(BackupError::SchedulingUnavailable(e.to_string())),
        }
        let mut policy = self.policy().await;
        policy.enabled = false;
        self.save_policy(&policy).await?;
        info!("automatic backups disabled");
        Ok(policy)
    }

    /// Changes cadence and/or time of day, re-registering when enabled.
    pub async fn update(&self, frequency: Option<Frequency>, time: Option<&str>) -> BackupResult<SchedulePolicy> {
        let mut policy = self.policy().await;
        if let Some(raw) = time {
            let parsed = parse_time_of_day(raw)
                .ok_or_else(|| BackupError::InvalidSchedule(format!("time must be HH:MM, got {raw:?}")))?;
            policy.time = parsed.format("%H:%M").to_string();
        }
        let frequency_changed = frequency.is_some_and(|f| f != policy.frequency);
        if let Some(frequency) = frequency {
            policy.frequency = frequency;
        }

        if policy.enabled && frequency_changed {
            if let Err(e) = self.register(policy.frequency).await {
                self.fall_back_to_disabled(policy).await;
                return Err(e);
            }
        }
        self.save_policy(&policy).await?;
        Ok(policy)
    }

    /// Re-registers the task for a policy that was enabled before a restart.
    pub async fn resume(&self) -> BackupResult<SchedulePolicy> {
        let policy = self.policy().await;
        if !policy.enabled {
            return Ok(policy);
        }
        if let Err(e) = self.register(policy.frequency).await {
            self.fall_back_to_disabled(policy).await;
            return Err(e);
        }
        Ok(policy)
    }

    /// One wake-up of the recurring task. Returns whether a backup was made.
    pub async fn tick(&self) -> BackupResult<bool> {
        let mut policy = self.policy().await;
        if !policy.enabled {
            debug!("automatic backups disabled, ignoring wake-up");
            return Ok(false);
        }
        let now = self.repo.clock().now();
        if !is_backup_due(&policy, now) || !self.is_backup_time(&policy, now) {
            return Ok(false);
        }

        let backup = self.repo.create().await?;
        policy.last_backup = Some(now);
        self.save_policy(&policy).await?;
        info!(backup_id = %backup.id, "automatic backup completed");
        Ok(true)
    }

    /// Whether `now` falls within the tolerance window around the policy's time of day.
    pub fn is_backup_time(&self, policy: &SchedulePolicy, now: DateTime<Utc>) -> bool {
        let local = self.wall_clock(now).time();
        let target = policy.time_of_day();
        let diff = (i64::from(local.num_seconds_from_midnight())
            - i64::from(target.num_seconds_from_midnight()))
        .abs();
        let diff = diff.min(SECONDS_PER_DAY - diff);
        diff <= self.tolerance.num_seconds()
    }

    /// `lastBackup + interval`, moved to the configured time of day.
    ///
    /// `None` when automatic backups are disabled or have never run.
    pub fn next_backup_time(&self, policy: &SchedulePolicy) -> Option<DateTime<Utc>> {
        if !policy.enabled {
            return None;
        }
        let due = policy.last_backup? + policy.frequency.interval();
        let day = self.wall_clock(due).date();
        self.resolve_wall_clock(day.and_time(policy.time_of_day()))
    }

    fn wall_clock(&self, at: DateTime<Utc>) -> NaiveDateTime {
        match self.offset {
            Some(offset) => at.with_timezone(&offset).naive_local(),
            None => at.with_timezone(&Local).naive_local(),
        }
    }

    /// Earliest instant showing `local` on the wall clock. A time skipped by
    /// a daylight saving jump resolves an hour later.
    fn resolve_wall_clock(&self, local: NaiveDateTime) -> Option<DateTime<Utc>> {
        match self.offset {
            Some(offset) => offset.from_local_datetime(&local).single().map(|at| at.with_timezone(&Utc)),
            None => Local
                .from_local_datetime(&local)
                .earliest()
                .or_else(|| Local.from_local_datetime(&(local + Duration::hours(1))).earliest())
                .map(|at| at.with_timezone(&Utc)),
        }
    }

    /// Backs up immediately, ignoring the schedule.
    pub async fn test_backup(&self) -> BackupResult<BackupInfo> {
        info!("manual test backup requested");
        self.repo.create().await
    }

    async fn register(&self, frequency: Frequency) -> BackupResult<()> {
        if self.facility.status().await == FacilityStatus::Unavailable {
            return Err(BackupError::SchedulingUnavailable(
                "background task facility reports unavailable".into(),
            ));
        }
        let interval = frequency
            .interval()
            .to_std()
            .map_err(|e| BackupError::InvalidSchedule(e.to_string()))?;
        self.facility
            .register(BACKUP_TASK_ID, interval)
            .await
            .map_err(|e| BackupError::SchedulingUnavailable(e.to_string()))
    }

    async fn unregister_quietly(&self) {
        if let Err(e) = self.facility.unregister(BACKUP_TASK_ID).await {
            debug!(error = %e, "unregister after failed enable");
        }
    }

    async fn fall_back_to_disabled(&self, mut policy: SchedulePolicy) {
        policy.enabled = false;
        self.unregister_quietly().await;
        if let Err(e) = self.save_policy(&policy).await {
            warn!(error = %e, "could not persist disabled backup schedule");
        }
    }
}

/// `lastBackup` is unset, or at least one interval has elapsed since it.
pub fn is_backup_due(policy: &SchedulePolicy, now: DateTime<Utc>) -> bool {
    match policy.last_backup {
        None => true,
        Some(last) => now - last >= policy.frequency.interval(),
    }
}
