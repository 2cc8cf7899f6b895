pub mod clock;
pub mod codec;
pub mod error;
pub mod hash;
pub mod policy;
pub mod record;
pub mod snapshot;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{BackupError, BackupResult, StoreError};
pub use hash::content_hash;
pub use policy::{Frequency, SchedulePolicy};
pub use record::{NewRecord, Record};
pub use snapshot::{BackupInfo, BackupStats, Snapshot, SnapshotMetadata, FORMAT_VERSION};
