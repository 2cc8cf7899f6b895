use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FacilityStatus {
    Available,
    Unavailable,
}

#[derive(Debug, Error)]
pub enum FacilityError {
    #[error("recurring task facility is unavailable: {0}")]
    Unavailable(String),
    #[error("task {0} is not registered")]
    NotRegistered(String),
    #[error("no task is defined under {0}")]
    Undefined(String),
}

/// Work the facility runs on each wake-up.
#[async_trait::async_trait]
pub trait BackgroundTask: Send + Sync {
    async fn run(&self);
}

/// Host primitive that wakes a task roughly every `min_interval`.
///
/// Wake-ups are inexact: implementations may fire early, late or more often,
/// and callers must gate the actual work themselves.
#[async_trait::async_trait]
pub trait RecurringTaskFacility: Send + Sync {
    async fn status(&self) -> FacilityStatus;

    async fn register(&self, task_id: &str, min_interval: Duration) -> Result<(), FacilityError>;

    async fn unregister(&self, task_id: &str) -> Result<(), FacilityError>;

    async fn is_registered(&self, task_id: &str) -> bool;
}

/// Recurring tasks driven by tokio timers inside the current runtime.
///
/// The timer wakes at the smaller of the requested interval and the
/// configured granularity. Each registered task runs one execution at a time.
pub struct TokioTaskFacility {
    granularity: Duration,
    definitions: Mutex<HashMap<String, Arc<dyn BackgroundTask>>>,
    running: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl TokioTaskFacility {
    pub fn new(granularity: Duration) -> Self {
        Self {
            granularity: granularity.max(Duration::from_millis(1)),
            definitions: Mutex::new(HashMap::new()),
            running: Mutex::new(HashMap::new()),
        }
    }

    /// Binds the work to run for `task_id`. Must happen before registration.
    pub fn define_task(&self, task_id: &str, task: Arc<dyn BackgroundTask>) {
        self.definitions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(task_id.to_owned(), task);
    }
}

#[async_trait::async_trait]
impl RecurringTaskFacility for TokioTaskFacility {
    async fn status(&self) -> FacilityStatus {
        match tokio::runtime::Handle::try_current() {
            Ok(_) => FacilityStatus::Available,
            Err(_) => FacilityStatus::Unavailable,
        }
    }

    async fn register(&self, task_id: &str, min_interval: Duration) -> Result<(), FacilityError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| FacilityError::Unavailable(e.to_string()))?;
        let task = self
            .definitions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(task_id)
            .cloned()
            .ok_or_else(|| FacilityError::Undefined(task_id.to_owned()))?;

        let period = min_interval.min(self.granularity).max(Duration::from_millis(1));
        let name = task_id.to_owned();
        let handle = runtime.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; registration is not a wake-up.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                debug!(task_id = %name, "recurring task woke up");
                task.run().await;
            }
        });

        let previous = self
            .running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(task_id.to_owned(), handle);
        if let Some(previous) = previous {
            previous.abort();
        }
        info!(task_id, period_secs = period.as_secs(), "recurring task registered");
        Ok(())
    }

    async fn unregister(&self, task_id: &str) -> Result<(), FacilityError> {
        let handle = self
            .running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(task_id)
            .ok_or_else(|| FacilityError::NotRegistered(task_id.to_owned()))?;
        handle.abort();
        info!(task_id, "recurring task unregistered");
        Ok(())
    }

    async fn is_registered(&self, task_id: &str) -> bool {
        self.running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(task_id)
    }
}

impl Drop for TokioTaskFacility {
    fn drop(&mut self) {
        let running = self.running.get_mut().unwrap_or_else(|e| e.into_inner());
        for (_, handle) in running.drain() {
            handle.abort();
        }
    }
}
