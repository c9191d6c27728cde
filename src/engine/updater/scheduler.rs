//! Job Scheduler
//!
//! Periodic trigger for the update job. `TokioScheduler` runs each
//! registered job on a tokio interval; stopping a job halts future ticks
//! but lets a run that is already in progress finish.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::BoxFuture;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// A job body. Invoked once per tick.
pub type JobCallback = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("No async runtime available to schedule {0}")]
    NoRuntime(String),
    #[error("Invalid interval for {0}: must be non-zero")]
    InvalidInterval(String),
}

/// External scheduler boundary
pub trait JobScheduler: Send + Sync {
    /// Register `job` under `name`, replacing any previous registration.
    fn register(&self, name: &str, interval: Duration, job: JobCallback) -> Result<(), SchedulerError>;
    /// Stop future invocations of `name`. Returns whether it was registered.
    fn deregister(&self, name: &str) -> bool;
    fn is_registered(&self, name: &str) -> bool;
}

struct Registration {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Interval scheduler backed by tokio tasks
#[derive(Default)]
pub struct TokioScheduler {
    jobs: Mutex<HashMap<String, Registration>>,
}

impl TokioScheduler {
    pub fn new() -> Self {
        Self::default()
    }
}

impl JobScheduler for TokioScheduler {
    fn register(&self, name: &str, interval: Duration, job: JobCallback) -> Result<(), SchedulerError> {
        if interval.is_zero() {
            return Err(SchedulerError::InvalidInterval(name.to_string()));
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| SchedulerError::NoRuntime(name.to_string()))?;

        let (stop, mut stopped) = watch::channel(false);
        let job_name = name.to_string();
        let handle = runtime.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = stopped.changed() => break,
                    _ = ticker.tick() => {
                        debug!(job = %job_name, "Scheduled job firing");
                        // Not raced against `stopped`: a started run completes.
                        job().await;
                    }
                }
            }
            debug!(job = %job_name, "Scheduled job stopped");
        });

        let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = jobs.insert(name.to_string(), Registration { stop, handle }) {
            let _ = previous.stop.send(true);
        }
        info!(job = name, interval_secs = interval.as_secs(), "Job registered");
        Ok(())
    }

    fn deregister(&self, name: &str) -> bool {
        let removed = self
            .jobs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(name);
        match removed {
            Some(registration) => {
                let _ = registration.stop.send(true);
                info!(job = name, "Job deregistered");
                true
            }
            None => false,
        }
    }

    fn is_registered(&self, name: &str) -> bool {
        self.jobs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .is_some_and(|r| !r.handle.is_finished())
    }
}
