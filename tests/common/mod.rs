#![allow(dead_code)]

use ctsync_lib::engine::config::FlagConfig;
use ctsync_lib::engine::service::Service;
use ctsync_lib::engine::updater::clock::ManualClock;
use ctsync_lib::engine::updater::logger::TracingLogger;
use ctsync_lib::engine::updater::scheduler::{JobCallback, JobScheduler, SchedulerError};
use ctsync_lib::engine::updater::install::InstallError;
use ctsync_lib::engine::updater::{
    CompatibilityVersion, DirectoryInstaller, DownloadError, Downloader, Fetcher, LogListArtifact,
    LogListInstaller, PersistentStore, SignatureVerifier, UpdateJob, UpdateJobDeps, UpdatePolicy,
};
use ed25519_dalek::{Signer, SigningKey};
use futures_util::future::BoxFuture;
use reqwest::Url;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Notify;

pub const T0: i64 = 1_700_000_000_000;
pub const MINUTE: i64 = 60 * 1000;
pub const HOUR: i64 = 60 * MINUTE;
pub const DAY: i64 = 24 * HOUR;

pub fn signature_url(version_id: &str) -> String {
    format!("https://ct.test/{}/log_list.sig", version_id)
}

pub fn log_list_url(version_id: &str) -> String {
    format!("https://ct.test/{}/log_list.json", version_id)
}

pub fn log_list(declared_version: i64) -> Vec<u8> {
    format!(r#"{{"version": {}, "log_list_timestamp": "2026-10-01T00:00:00Z", "operators": []}}"#, declared_version)
        .into_bytes()
}

/// Blocks fetches until released, so tests can act mid-flight.
#[derive(Default)]
pub struct Gate {
    pub entered: Notify,
    pub release: Notify,
}

/// In-memory stand-in for the HTTP client
#[derive(Default)]
pub struct MemoryFetcher {
    responses: Mutex<HashMap<String, Result<Vec<u8>, String>>>,
    fetches: AtomicUsize,
    gate: Mutex<Option<Arc<Gate>>>,
}

impl MemoryFetcher {
    pub fn set(&self, url: &str, bytes: Vec<u8>) {
        self.responses.lock().unwrap().insert(url.to_string(), Ok(bytes));
    }

    pub fn fail(&self, url: &str, reason: &str) {
        self.responses.lock().unwrap().insert(url.to_string(), Err(reason.to_string()));
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn install_gate(&self) -> Arc<Gate> {
        let gate = Arc::new(Gate::default());
        *self.gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn clear_gate(&self) {
        *self.gate.lock().unwrap() = None;
    }
}

impl Fetcher for MemoryFetcher {
    fn fetch<'a>(&'a self, url: &'a Url) -> BoxFuture<'a, Result<Vec<u8>, DownloadError>> {
        Box::pin(async move {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            let gate = self.gate.lock().unwrap().clone();
            if let Some(gate) = gate {
                gate.entered.notify_one();
                gate.release.notified().await;
            }
            let response = self.responses.lock().unwrap().get(url.as_str()).cloned();
            match response {
                Some(Ok(bytes)) => Ok(bytes),
                Some(Err(reason)) => Err(DownloadError::network(url, reason)),
                None => Err(DownloadError::network(url, "HTTP 404 Not Found")),
            }
        })
    }
}

/// Scheduler that records registrations and fires only on demand
#[derive(Default)]
pub struct RecordingScheduler {
    registrations: AtomicUsize,
    deregistrations: AtomicUsize,
    jobs: Mutex<HashMap<String, JobCallback>>,
}

impl RecordingScheduler {
    pub fn registrations(&self) -> usize {
        self.registrations.load(Ordering::SeqCst)
    }

    pub fn deregistrations(&self) -> usize {
        self.deregistrations.load(Ordering::SeqCst)
    }

    pub fn active(&self) -> usize {
        self.jobs.lock().unwrap().len()
    }

    /// Invoke a registered job once, as a timer tick would.
    pub async fn fire(&self, name: &str) -> bool {
        let job = self.jobs.lock().unwrap().get(name).cloned();
        match job {
            Some(job) => {
                job().await;
                true
            }
            None => false,
        }
    }
}

impl JobScheduler for RecordingScheduler {
    fn register(&self, name: &str, _interval: Duration, job: JobCallback) -> Result<(), SchedulerError> {
        self.registrations.fetch_add(1, Ordering::SeqCst);
        self.jobs.lock().unwrap().insert(name.to_string(), job);
        Ok(())
    }

    fn deregister(&self, name: &str) -> bool {
        let removed = self.jobs.lock().unwrap().remove(name).is_some();
        if removed {
            self.deregistrations.fetch_add(1, Ordering::SeqCst);
        }
        removed
    }

    fn is_registered(&self, name: &str) -> bool {
        self.jobs.lock().unwrap().contains_key(name)
    }
}

/// Installer that refuses every artifact
#[derive(Default)]
pub struct FailingInstaller {
    attempts: AtomicUsize,
}

impl FailingInstaller {
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl LogListInstaller for FailingInstaller {
    fn install(&self, _artifact: &LogListArtifact) -> Result<PathBuf, InstallError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(InstallError::Io(io::Error::new(io::ErrorKind::Other, "no space left on device")))
    }

    fn current_log_list(&self, _version_id: &str) -> Result<Option<Vec<u8>>, InstallError> {
        Ok(None)
    }
}

/// A fully wired job over fakes and a temp directory
pub struct Harness {
    pub dir: TempDir,
    pub key: SigningKey,
    pub fetcher: Arc<MemoryFetcher>,
    pub scheduler: Arc<RecordingScheduler>,
    pub clock: Arc<ManualClock>,
    pub logger: Arc<TracingLogger>,
    pub verifier: Arc<SignatureVerifier>,
    pub installer: Arc<dyn LogListInstaller>,
    store_path: PathBuf,
    pub job: UpdateJob,
}

impl Harness {
    pub fn new() -> Self {
        Self::build(directory_installer, |dir| dir.join("update_state.properties"))
    }

    /// Harness whose installer is `installer`.
    pub fn with_installer(installer: Arc<dyn LogListInstaller>) -> Self {
        Self::build(move |_| installer, |dir| dir.join("update_state.properties"))
    }

    /// Harness whose store file can never be written: its parent is a
    /// regular file.
    pub fn with_unwritable_store() -> Self {
        Self::build(
            directory_installer,
            |dir| {
                let blocker = dir.join("blocker");
                std::fs::write(&blocker, b"not a directory").unwrap();
                blocker.join("update_state.properties")
            },
        )
    }

    fn build(
        installer: impl FnOnce(&Path) -> Arc<dyn LogListInstaller>,
        store_path: impl FnOnce(&Path) -> PathBuf,
    ) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let key = SigningKey::from_bytes(&[42; 32]);
        let installer = installer(dir.path());
        let store_path = store_path(dir.path());
        let fetcher = Arc::new(MemoryFetcher::default());
        let scheduler = Arc::new(RecordingScheduler::default());
        let clock = Arc::new(ManualClock::new(T0));
        let logger = Arc::new(TracingLogger::new());
        let verifier = Arc::new(SignatureVerifier::with_public_key(&key.verifying_key().to_bytes()).unwrap());

        let deps = UpdateJobDeps {
            store: PersistentStore::open(&store_path),
            downloader: Downloader::new(fetcher.clone(), verifier.clone()),
            installer: installer.clone(),
            scheduler: scheduler.clone(),
            logger: logger.clone(),
            clock: clock.clone(),
        };
        let job = UpdateJob::new(versions(), UpdatePolicy::default(), deps);

        Self {
            dir,
            key,
            fetcher,
            scheduler,
            clock,
            logger,
            verifier,
            installer,
            store_path,
            job,
        }
    }

    /// A second job over the same files, as after a process restart.
    pub fn restart(&self) -> UpdateJob {
        let deps = UpdateJobDeps {
            store: PersistentStore::open(&self.store_path),
            downloader: Downloader::new(self.fetcher.clone(), self.verifier.clone()),
            installer: self.installer.clone(),
            scheduler: self.scheduler.clone(),
            logger: self.logger.clone(),
            clock: self.clock.clone(),
        };
        UpdateJob::new(versions(), UpdatePolicy::default(), deps)
    }

    pub fn service(&self) -> Service {
        Service::new(
            self.job.clone(),
            self.verifier.clone(),
            self.logger.clone(),
            FlagConfig::default(),
        )
    }

    pub fn store_path(&self) -> PathBuf {
        self.store_path.clone()
    }

    pub fn install_root(&self) -> PathBuf {
        self.dir.path().join("logs")
    }

    pub fn store(&self) -> PersistentStore {
        PersistentStore::open(self.store_path())
    }

    /// Serve a correctly signed log list declaring `declared_version`.
    pub fn publish(&self, version_id: &str, declared_version: i64) -> Vec<u8> {
        let payload = log_list(declared_version);
        let signature = self.key.sign(&payload).to_bytes().to_vec();
        self.fetcher.set(&signature_url(version_id), signature);
        self.fetcher.set(&log_list_url(version_id), payload.clone());
        payload
    }

    /// Serve a log list whose signature has one flipped byte.
    pub fn publish_tampered(&self, version_id: &str, declared_version: i64) {
        let payload = log_list(declared_version);
        let mut signature = self.key.sign(&payload).to_bytes().to_vec();
        signature[17] ^= 0x40;
        self.fetcher.set(&signature_url(version_id), signature);
        self.fetcher.set(&log_list_url(version_id), payload);
    }

    /// Serve correctly signed bytes that are not a log list.
    pub fn publish_garbage(&self, version_id: &str) {
        let payload = b"<html>503 Service Unavailable</html>".to_vec();
        let signature = self.key.sign(&payload).to_bytes().to_vec();
        self.fetcher.set(&signature_url(version_id), signature);
        self.fetcher.set(&log_list_url(version_id), payload);
    }

    pub fn break_network(&self, version_id: &str) {
        self.fetcher.fail(&signature_url(version_id), "connection reset");
    }
}

fn directory_installer(dir: &Path) -> Arc<dyn LogListInstaller> {
    Arc::new(DirectoryInstaller::new(dir.join("logs")))
}

fn versions() -> Vec<CompatibilityVersion> {
    ["v1", "v2"]
        .into_iter()
        .map(|id| CompatibilityVersion::parse(id, &signature_url(id), &log_list_url(id)).unwrap())
        .collect()
}
