//! Update Telemetry
//!
//! Reports update outcomes. Signature failures are surfaced separately as
//! security events.

use std::collections::BTreeMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

/// Why an update attempt failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Network,
    MalformedContent,
    Signature,
    Install,
    Store,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Network => "network",
            FailureKind::MalformedContent => "malformed_content",
            FailureKind::Signature => "signature",
            FailureKind::Install => "install",
            FailureKind::Store => "store",
        }
    }
}

/// Sink for update outcomes
pub trait UpdateLogger: Send + Sync {
    fn installed(&self, version_id: &str, content_version: i64);
    fn stale(&self, version_id: &str, declared_version: i64, stored_version: i64);
    fn failure(&self, version_id: &str, kind: FailureKind, failure_count: i32, detail: &str);
    fn security_event(&self, version_id: &str, detail: &str);
}

/// Outcome counters for one compatibility version
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct VersionMetrics {
    pub installs: u64,
    pub stale_fetches: u64,
    pub failures: BTreeMap<FailureKind, u64>,
    pub security_events: u64,
    pub last_failure: Option<DateTime<Utc>>,
    pub last_failure_reason: Option<String>,
}

/// Logger emitting `tracing` events and keeping in-memory counters
#[derive(Default)]
pub struct TracingLogger {
    metrics: Mutex<BTreeMap<String, VersionMetrics>>,
}

impl TracingLogger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of counters, keyed by version id
    pub fn snapshot(&self) -> BTreeMap<String, VersionMetrics> {
        self.metrics.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn with_version<F: FnOnce(&mut VersionMetrics)>(&self, version_id: &str, f: F) {
        let mut metrics = self.metrics.lock().unwrap_or_else(|e| e.into_inner());
        f(metrics.entry(version_id.to_string()).or_default());
    }
}

impl UpdateLogger for TracingLogger {
    fn installed(&self, version_id: &str, content_version: i64) {
        info!(version_id, content_version, "Installed new log list");
        self.with_version(version_id, |m| m.installs += 1);
    }

    fn stale(&self, version_id: &str, declared_version: i64, stored_version: i64) {
        info!(version_id, declared_version, stored_version, "Fetched log list is not newer, skipping install");
        self.with_version(version_id, |m| m.stale_fetches += 1);
    }

    fn failure(&self, version_id: &str, kind: FailureKind, failure_count: i32, detail: &str) {
        warn!(version_id, reason = kind.as_str(), failure_count, detail, "Log list update failed");
        self.with_version(version_id, |m| {
            *m.failures.entry(kind).or_insert(0) += 1;
            m.last_failure = Some(Utc::now());
            m.last_failure_reason = Some(format!("{}: {}", kind.as_str(), detail));
        });
    }

    fn security_event(&self, version_id: &str, detail: &str) {
        error!(version_id, detail, security = true, "Rejected log list with invalid signature");
        self.with_version(version_id, |m| m.security_events += 1);
    }
}
