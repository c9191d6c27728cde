//! Update Job
//!
//! Decides when each compatibility version is due, drives the downloader,
//! and commits verified results to the installer and the persistent store.
//!
//! Versions are independent: each has its own cycle lock and bookkeeping, so
//! a failing or backing-off version never delays another. The store mutex is
//! only held for synchronous read/modify/persist sections, never across
//! network I/O.
//!
//! Cancellation stops future scheduling immediately. A cycle already in
//! flight is allowed to finish its download, but if `cancel()` happened
//! after the cycle started its result is discarded without touching the
//! installer or the store.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use futures_util::future::join_all;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info};

use super::clock::Clock;
use super::compat::CompatibilityVersion;
use super::download::{Downloader, LogListArtifact};
use super::install::{InstallError, LogListInstaller};
use super::logger::{FailureKind, UpdateLogger};
use super::policy::UpdatePolicy;
use super::scheduler::{JobCallback, JobScheduler, SchedulerError};
use super::state::{StoredState, UpdatePhase};
use super::store::PersistentStore;

/// Name under which the job registers with the scheduler
pub const JOB_NAME: &str = "ct-log-list-update";

#[derive(Error, Debug)]
pub enum UpdateError {
    #[error("Unknown compatibility version: {0}")]
    UnknownVersion(String),
    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),
    #[error("Install error: {0}")]
    Install(#[from] InstallError),
}

/// Result of one cycle for one version
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CycleOutcome {
    /// Not yet eligible
    Skipped { next_due: i64 },
    /// A newer list was installed and recorded
    Installed { content_version: i64 },
    /// Fetch succeeded but the list was not newer than the committed one
    StaleDuplicate { declared_version: i64, stored_version: i64 },
    /// Attempt failed; backoff grows
    Failed { kind: FailureKind, failure_count: i32, reason: String },
    /// The job was cancelled while this cycle was in flight
    Discarded,
}

/// Status snapshot for one version
#[derive(Debug, Clone, Serialize)]
pub struct VersionStatus {
    pub version_id: String,
    pub signature_url: String,
    pub log_list_url: String,
    pub phase: UpdatePhase,
    pub state: StoredState,
    pub next_due: i64,
    pub stale: bool,
}

/// Collaborators the job is built from
pub struct UpdateJobDeps {
    pub store: PersistentStore,
    pub downloader: Downloader,
    pub installer: Arc<dyn LogListInstaller>,
    pub scheduler: Arc<dyn JobScheduler>,
    pub logger: Arc<dyn UpdateLogger>,
    pub clock: Arc<dyn Clock>,
}

struct VersionSlot {
    version: CompatibilityVersion,
    cycle: tokio::sync::Mutex<()>,
    phase: Mutex<UpdatePhase>,
}

struct JobInner {
    versions: Vec<VersionSlot>,
    policy: UpdatePolicy,
    store: Mutex<PersistentStore>,
    downloader: Downloader,
    installer: Arc<dyn LogListInstaller>,
    scheduler: Arc<dyn JobScheduler>,
    logger: Arc<dyn UpdateLogger>,
    clock: Arc<dyn Clock>,
    scheduled: Mutex<bool>,
    epoch: AtomicU64,
}

/// Periodic log-list update job. Cheap to clone.
#[derive(Clone)]
pub struct UpdateJob {
    inner: Arc<JobInner>,
}

impl UpdateJob {
    pub fn new(versions: Vec<CompatibilityVersion>, policy: UpdatePolicy, deps: UpdateJobDeps) -> Self {
        let versions = versions
            .into_iter()
            .map(|version| VersionSlot {
                version,
                cycle: tokio::sync::Mutex::new(()),
                phase: Mutex::new(UpdatePhase::Idle),
            })
            .collect();

        Self {
            inner: Arc::new(JobInner {
                versions,
                policy,
                store: Mutex::new(deps.store),
                downloader: deps.downloader,
                installer: deps.installer,
                scheduler: deps.scheduler,
                logger: deps.logger,
                clock: deps.clock,
                scheduled: Mutex::new(false),
                epoch: AtomicU64::new(0),
            }),
        }
    }

    pub fn versions(&self) -> impl Iterator<Item = &CompatibilityVersion> {
        self.inner.versions.iter().map(|slot| &slot.version)
    }

    pub fn policy(&self) -> &UpdatePolicy {
        &self.inner.policy
    }

    /// Register with the scheduler. Returns `false` if already scheduled.
    pub fn schedule(&self) -> Result<bool, UpdateError> {
        let mut scheduled = lock(&self.inner.scheduled);
        if *scheduled {
            debug!("Update job already scheduled");
            return Ok(false);
        }

        let weak: Weak<JobInner> = Arc::downgrade(&self.inner);
        let callback: JobCallback = Arc::new(move || {
            let weak = weak.clone();
            Box::pin(async move {
                if let Some(inner) = weak.upgrade() {
                    UpdateJob { inner }.run().await;
                }
            })
        });

        self.inner
            .scheduler
            .register(JOB_NAME, self.inner.policy.poll_interval, callback)?;
        *scheduled = true;
        info!(
            versions = self.inner.versions.len(),
            poll_secs = self.inner.policy.poll_interval.as_secs(),
            "Update job scheduled"
        );
        Ok(true)
    }

    /// Deregister from the scheduler. Returns `false` if not scheduled.
    pub fn cancel(&self) -> bool {
        let mut scheduled = lock(&self.inner.scheduled);
        if !*scheduled {
            debug!("Update job not scheduled");
            return false;
        }
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        self.inner.scheduler.deregister(JOB_NAME);
        *scheduled = false;
        info!("Update job cancelled");
        true
    }

    pub fn is_scheduled(&self) -> bool {
        *lock(&self.inner.scheduled)
    }

    /// Run one eligibility-checked cycle for every version concurrently.
    pub async fn run(&self) -> Vec<(String, CycleOutcome)> {
        let cycles = self.inner.versions.iter().map(move |slot| async move {
            let outcome = self.run_slot(slot, false).await;
            (slot.version.version_id().to_string(), outcome)
        });
        join_all(cycles).await
    }

    /// Run one eligibility-checked cycle for a single version.
    pub async fn run_version(&self, version_id: &str) -> Result<CycleOutcome, UpdateError> {
        let slot = self.slot(version_id)?;
        Ok(self.run_slot(slot, false).await)
    }

    /// Run a cycle for a single version, ignoring eligibility.
    pub async fn force_run_version(&self, version_id: &str) -> Result<CycleOutcome, UpdateError> {
        let slot = self.slot(version_id)?;
        Ok(self.run_slot(slot, true).await)
    }

    /// Stored state, phase and next due time for every version.
    pub fn status(&self) -> Vec<VersionStatus> {
        let now = self.inner.clock.now_millis();
        let store = lock(&self.inner.store);
        self.inner
            .versions
            .iter()
            .map(|slot| {
                let state = StoredState::read(&store, &slot.version);
                VersionStatus {
                    version_id: slot.version.version_id().to_string(),
                    signature_url: slot.version.signature_url().to_string(),
                    log_list_url: slot.version.log_list_url().to_string(),
                    phase: self.effective_phase(slot, &state, now),
                    next_due: self.inner.policy.next_due(&state),
                    stale: self.inner.policy.is_stale(&state, now),
                    state,
                }
            })
            .collect()
    }

    /// Current phase for a single version.
    pub fn phase(&self, version_id: &str) -> Result<UpdatePhase, UpdateError> {
        let slot = self.slot(version_id)?;
        let state = StoredState::read(&lock(&self.inner.store), &slot.version);
        Ok(self.effective_phase(slot, &state, self.inner.clock.now_millis()))
    }

    /// Stored state for a single version.
    pub fn stored_state(&self, version_id: &str) -> Result<StoredState, UpdateError> {
        let slot = self.slot(version_id)?;
        Ok(StoredState::read(&lock(&self.inner.store), &slot.version))
    }

    /// Committed log list for a version, as the CT consumer sees it.
    pub fn current_log_list(&self, version_id: &str) -> Result<Option<Vec<u8>>, UpdateError> {
        self.slot(version_id)?;
        Ok(self.inner.installer.current_log_list(version_id)?)
    }

    /// Wipe all bookkeeping. Waits for in-flight cycles so none writes
    /// stale state back afterwards.
    pub async fn reset(&self) -> bool {
        let mut guards = Vec::with_capacity(self.inner.versions.len());
        for slot in &self.inner.versions {
            guards.push(slot.cycle.lock().await);
        }
        let removed = lock(&self.inner.store).delete();
        for slot in &self.inner.versions {
            *lock(&slot.phase) = UpdatePhase::Idle;
        }
        info!(removed, "Update state reset");
        removed
    }

    fn slot(&self, version_id: &str) -> Result<&VersionSlot, UpdateError> {
        self.inner
            .versions
            .iter()
            .find(|slot| slot.version.version_id() == version_id)
            .ok_or_else(|| UpdateError::UnknownVersion(version_id.to_string()))
    }

    async fn run_slot(&self, slot: &VersionSlot, force: bool) -> CycleOutcome {
        let _cycle = slot.cycle.lock().await;
        let version = &slot.version;
        let version_id = version.version_id();
        let epoch = self.inner.epoch.load(Ordering::SeqCst);

        let state = StoredState::read(&lock(&self.inner.store), version);
        let now = self.inner.clock.now_millis();
        if !force && !self.inner.policy.is_due(&state, now) {
            let next_due = self.inner.policy.next_due(&state);
            debug!(version_id, next_due, "Update not due");
            return CycleOutcome::Skipped { next_due };
        }

        self.set_phase(slot, UpdatePhase::Fetching);
        debug!(version_id, failure_count = state.failure_count, "Fetching log list");
        let result = self.inner.downloader.fetch_and_verify(version).await;

        if self.inner.epoch.load(Ordering::SeqCst) != epoch {
            info!(version_id, "Job cancelled during fetch, discarding result");
            self.set_phase(slot, UpdatePhase::Idle);
            return CycleOutcome::Discarded;
        }

        let now = self.inner.clock.now_millis();
        match result {
            Ok(artifact) => self.commit(slot, artifact, now),
            Err(e) => {
                let kind = e.kind();
                if kind == FailureKind::Signature {
                    self.inner.logger.security_event(version_id, &e.to_string());
                }
                self.record_failure(slot, kind, e.to_string(), now)
            }
        }
    }

    fn commit(&self, slot: &VersionSlot, artifact: LogListArtifact, now: i64) -> CycleOutcome {
        let version = &slot.version;
        let version_id = version.version_id();
        self.set_phase(slot, UpdatePhase::Committing);

        let stored = StoredState::read(&lock(&self.inner.store), version);
        if !stored.accepts(artifact.declared_version) {
            let mut state = stored;
            state.record_fetch_success(now);
            self.persist(version, &state);
            self.inner
                .logger
                .stale(version_id, artifact.declared_version, state.content_version);
            self.set_phase(slot, UpdatePhase::Idle);
            return CycleOutcome::StaleDuplicate {
                declared_version: artifact.declared_version,
                stored_version: state.content_version,
            };
        }

        if let Err(e) = self.inner.installer.install(&artifact) {
            error!(version_id, error = %e, "Failed to install verified log list");
            return self.record_failure(slot, FailureKind::Install, e.to_string(), now);
        }

        let mut state = stored;
        state.record_install(now, artifact.declared_version, artifact.content_hash);
        self.persist(version, &state);
        self.inner.logger.installed(version_id, state.content_version);
        self.set_phase(slot, UpdatePhase::Idle);
        CycleOutcome::Installed {
            content_version: state.content_version,
        }
    }

    fn record_failure(&self, slot: &VersionSlot, kind: FailureKind, reason: String, now: i64) -> CycleOutcome {
        let version = &slot.version;
        let mut state = StoredState::read(&lock(&self.inner.store), version);
        state.record_failure(now);
        self.persist(version, &state);
        self.inner
            .logger
            .failure(version.version_id(), kind, state.failure_count, &reason);
        self.set_phase(slot, UpdatePhase::BackingOff);
        CycleOutcome::Failed {
            kind,
            failure_count: state.failure_count,
            reason,
        }
    }

    /// Write `state` and flush the store. A flush failure keeps the
    /// in-memory state and is reported, never propagated.
    fn persist(&self, version: &CompatibilityVersion, state: &StoredState) {
        let result = {
            let mut store = lock(&self.inner.store);
            state.write(&mut store, version);
            store.store()
        };
        if let Err(e) = result {
            error!(version_id = version.version_id(), error = %e, "Failed to persist update state");
            self.inner.logger.failure(
                version.version_id(),
                FailureKind::Store,
                state.failure_count,
                &e.to_string(),
            );
        }
    }

    /// In-flight phases are reported as-is. Otherwise a version is backing
    /// off while a failure streak keeps it from being due, and idle after.
    fn effective_phase(&self, slot: &VersionSlot, state: &StoredState, now: i64) -> UpdatePhase {
        match *lock(&slot.phase) {
            phase @ (UpdatePhase::Fetching | UpdatePhase::Committing) => phase,
            _ if state.failure_count > 0 && !self.inner.policy.is_due(state, now) => UpdatePhase::BackingOff,
            _ => UpdatePhase::Idle,
        }
    }

    fn set_phase(&self, slot: &VersionSlot, phase: UpdatePhase) {
        *lock(&slot.phase) = phase;
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
