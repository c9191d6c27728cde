//! Certificate Transparency Service
//!
//! Thin facade between the outside world (policy flag, HTTP adapter, CLI)
//! and the update job. Flag changes become `schedule()` / `cancel()`; status
//! queries are answered from the job and the telemetry counters.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::engine::config::{Config, ConfigError, FlagConfig};
use crate::engine::updater::clock::SystemClock;
use crate::engine::updater::download::{Downloader, HttpFetcher};
use crate::engine::updater::install::DirectoryInstaller;
use crate::engine::updater::job::{UpdateError, UpdateJob, UpdateJobDeps, VersionStatus};
use crate::engine::updater::logger::{TracingLogger, VersionMetrics};
use crate::engine::updater::scheduler::TokioScheduler;
use crate::engine::updater::store::PersistentStore;
use crate::engine::updater::verify::{SignatureError, SignatureVerifier};

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Trusted key error: {0}")]
    Key(#[from] SignatureError),
    #[error(transparent)]
    Update(#[from] UpdateError),
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Status reported to clients
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub enabled: bool,
    pub trusted_key_loaded: bool,
    pub versions: Vec<VersionStatus>,
    pub metrics: BTreeMap<String, VersionMetrics>,
}

pub struct Service {
    job: UpdateJob,
    verifier: Arc<SignatureVerifier>,
    metrics: Arc<TracingLogger>,
    flag: FlagConfig,
}

impl Service {
    pub fn new(
        job: UpdateJob,
        verifier: Arc<SignatureVerifier>,
        metrics: Arc<TracingLogger>,
        flag: FlagConfig,
    ) -> Self {
        Self {
            job,
            verifier,
            metrics,
            flag,
        }
    }

    /// Wire the service with its production collaborators.
    pub fn from_config(config: &Config, data_dir: &Path) -> Result<Self, ServiceError> {
        config.validate()?;

        let verifier = Arc::new(SignatureVerifier::new());
        match &config.public_key {
            Some(key) => verifier.set_public_key_base64(key)?,
            None => warn!("No trusted public key configured; every update will be rejected"),
        }

        let metrics = Arc::new(TracingLogger::new());
        let deps = UpdateJobDeps {
            store: PersistentStore::open(config.store_path(data_dir)),
            downloader: Downloader::new(
                Arc::new(HttpFetcher::new(&config.http_config())?),
                verifier.clone(),
            ),
            installer: Arc::new(DirectoryInstaller::new(config.install_root(data_dir))),
            scheduler: Arc::new(TokioScheduler::new()),
            logger: metrics.clone(),
            clock: Arc::new(SystemClock),
        };
        let job = UpdateJob::new(config.compatibility_versions()?, config.policy(), deps);

        Ok(Self::new(job, verifier, metrics, config.flag.clone()))
    }

    pub fn job(&self) -> &UpdateJob {
        &self.job
    }

    /// Apply the initial flag value once the host has finished booting.
    pub fn on_boot_completed(&self, value: Option<bool>) -> Result<(), ServiceError> {
        let namespace = self.flag.namespace.clone();
        self.on_flag_changed(&namespace, value)
    }

    /// React to a flag change. Other namespaces are ignored; an absent value
    /// falls back to the configured default.
    pub fn on_flag_changed(&self, namespace: &str, value: Option<bool>) -> Result<(), ServiceError> {
        if namespace != self.flag.namespace {
            debug!(namespace, "Ignoring flag change for other namespace");
            return Ok(());
        }
        if value.unwrap_or(self.flag.default_enabled) {
            self.enable()
        } else {
            self.disable();
            Ok(())
        }
    }

    pub fn enable(&self) -> Result<(), ServiceError> {
        if self.job.schedule()? {
            info!("Certificate transparency service started");
        }
        Ok(())
    }

    pub fn disable(&self) {
        if self.job.cancel() {
            info!("Certificate transparency service stopped");
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.job.is_scheduled()
    }

    /// Install a new trusted key (key rotation).
    pub fn rotate_public_key(&self, encoded: &str) -> Result<(), ServiceError> {
        self.verifier.set_public_key_base64(encoded)?;
        Ok(())
    }

    pub fn status(&self) -> ServiceStatus {
        ServiceStatus {
            enabled: self.is_enabled(),
            trusted_key_loaded: self.verifier.has_public_key(),
            versions: self.job.status(),
            metrics: self.metrics.snapshot(),
        }
    }
}
