//! Update State
//!
//! Per-version bookkeeping kept in the persistent store, and the phases a
//! version moves through during one update cycle.

use serde::{Deserialize, Serialize};

use super::compat::CompatibilityVersion;
use super::store::PersistentStore;

pub const LAST_ATTEMPT_TIMESTAMP: &str = "last_attempt_timestamp";
pub const LAST_SUCCESS_TIMESTAMP: &str = "last_success_timestamp";
pub const FAILURE_COUNT: &str = "failure_count";
pub const CONTENT_VERSION: &str = "content_version";
pub const CONTENT_HASH: &str = "content_hash";

/// Marker for "never happened" timestamps and "nothing committed" versions.
pub const UNSET: i64 = -1;

/// Current phase of a version's update cycle
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum UpdatePhase {
    /// No in-flight work
    #[default]
    Idle,
    /// Downloading and verifying
    Fetching,
    /// Installing a verified artifact and recording it
    Committing,
    /// Last attempt failed and the retry window has not elapsed
    BackingOff,
}

/// Stored bookkeeping for one compatibility version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredState {
    pub last_attempt_timestamp: i64,
    pub last_success_timestamp: i64,
    pub failure_count: i32,
    pub content_version: i64,
    pub content_hash: Option<String>,
}

impl Default for StoredState {
    fn default() -> Self {
        Self {
            last_attempt_timestamp: UNSET,
            last_success_timestamp: UNSET,
            failure_count: 0,
            content_version: UNSET,
            content_hash: None,
        }
    }
}

impl StoredState {
    /// Read the state for `version` from the store.
    pub fn read(store: &PersistentStore, version: &CompatibilityVersion) -> Self {
        Self {
            last_attempt_timestamp: read_timestamp(store, &version.key(LAST_ATTEMPT_TIMESTAMP)),
            last_success_timestamp: read_timestamp(store, &version.key(LAST_SUCCESS_TIMESTAMP)),
            failure_count: store.get_int(&version.key(FAILURE_COUNT), 0).max(0),
            content_version: store.get_long(&version.key(CONTENT_VERSION), UNSET),
            content_hash: store
                .get_string(&version.key(CONTENT_HASH))
                .filter(|h| !h.is_empty())
                .map(str::to_string),
        }
    }

    /// Write the state for `version` into the store (memory only).
    pub fn write(&self, store: &mut PersistentStore, version: &CompatibilityVersion) {
        store.set_long(&version.key(LAST_ATTEMPT_TIMESTAMP), self.last_attempt_timestamp);
        store.set_long(&version.key(LAST_SUCCESS_TIMESTAMP), self.last_success_timestamp);
        store.set_int(&version.key(FAILURE_COUNT), self.failure_count);
        store.set_long(&version.key(CONTENT_VERSION), self.content_version);
        if let Some(hash) = &self.content_hash {
            store.set_string(&version.key(CONTENT_HASH), hash.clone());
        }
    }

    pub fn has_content(&self) -> bool {
        self.content_version != UNSET
    }

    pub fn has_attempted(&self) -> bool {
        self.last_attempt_timestamp != UNSET
    }

    /// Record a failed attempt at `now`.
    pub fn record_failure(&mut self, now: i64) {
        self.failure_count = self.failure_count.saturating_add(1);
        self.last_attempt_timestamp = now;
    }

    /// Record a successful install of `content_version` at `now`.
    pub fn record_install(&mut self, now: i64, content_version: i64, content_hash: String) {
        self.content_version = content_version;
        self.content_hash = Some(content_hash);
        self.record_fetch_success(now);
    }

    /// Record a successful fetch that did not change the installed content.
    pub fn record_fetch_success(&mut self, now: i64) {
        self.failure_count = 0;
        self.last_attempt_timestamp = now;
        self.last_success_timestamp = now;
    }

    /// Whether `declared_version` would move the committed content forward.
    pub fn accepts(&self, declared_version: i64) -> bool {
        !self.has_content() || declared_version > self.content_version
    }
}

/// Timestamps before the epoch are treated as never recorded.
fn read_timestamp(store: &PersistentStore, key: &str) -> i64 {
    match store.get_long(key, UNSET) {
        t if t < 0 => UNSET,
        t => t,
    }
}
