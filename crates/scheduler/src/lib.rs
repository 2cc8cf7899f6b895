pub mod facility;
pub mod scheduler;
mod task;

pub use facility::{BackgroundTask, FacilityError, FacilityStatus, RecurringTaskFacility, TokioTaskFacility};
pub use scheduler::{is_backup_due, BackupScheduler, BACKUP_TASK_ID, DEFAULT_TOLERANCE_MINUTES};
pub use task::ScheduledBackupTask;
