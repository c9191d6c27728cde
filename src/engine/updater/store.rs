//! Persistent Key/Value Store
//!
//! Flat `key=value` file holding per-version update bookkeeping.
//! Mutations are buffered in memory and flushed as a whole-file atomic rewrite.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

const HEADER: &str = "# ctsync update state";

/// Store errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Failed to write store {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Corrupt store at line {line}: {reason}")]
    Corrupt { line: usize, reason: String },
}

/// Typed key/value store backed by a single file.
#[derive(Debug)]
pub struct PersistentStore {
    path: PathBuf,
    values: BTreeMap<String, String>,
}

impl PersistentStore {
    /// Create an empty store for `path` without touching the disk.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            values: BTreeMap::new(),
        }
    }

    /// Create a store and eagerly load its backing file.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let mut store = Self::new(path);
        store.load();
        store
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the backing file, replacing in-memory state.
    ///
    /// A file that fails to read or parse is treated as corrupt: memory is
    /// cleared and the file removed so the next cycle starts clean.
    pub fn load(&mut self) {
        self.values.clear();
        if !self.path.exists() {
            return;
        }

        let parsed = fs::read(&self.path)
            .map_err(|e| StoreError::Corrupt {
                line: 0,
                reason: e.to_string(),
            })
            .and_then(|bytes| parse(&bytes));

        match parsed {
            Ok(values) => {
                debug!(path = %self.path.display(), entries = values.len(), "Loaded store");
                self.values = values;
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Store corrupt, resetting");
                self.delete();
            }
        }
    }

    /// Atomically persist the full in-memory map.
    pub fn store(&self) -> Result<(), StoreError> {
        let mut content = String::from(HEADER);
        content.push('\n');
        for (key, value) in &self.values {
            content.push_str(key);
            content.push('=');
            content.push_str(value);
            content.push('\n');
        }

        let write_err = |source| StoreError::Write {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(write_err)?;
            }
        }

        // Write to temp file first, then rename (atomic)
        let temp_path = self.temp_path();
        let mut file = File::create(&temp_path).map_err(write_err)?;
        file.write_all(content.as_bytes()).map_err(write_err)?;
        file.sync_all().map_err(write_err)?;
        drop(file);
        fs::rename(&temp_path, &self.path).map_err(write_err)?;

        Ok(())
    }

    /// Clear all state and remove the backing file.
    pub fn delete(&mut self) -> bool {
        self.values.clear();
        let _ = fs::remove_file(self.temp_path());
        fs::remove_file(&self.path).is_ok()
    }

    pub fn get_string(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn set_string(&mut self, key: &str, value: impl Into<String>) {
        self.values.insert(key.to_string(), value.into());
    }

    /// Stored value, or `default` if absent or not a valid i64.
    pub fn get_long(&self, key: &str, default: i64) -> i64 {
        self.get_string(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    pub fn set_long(&mut self, key: &str, value: i64) {
        self.set_string(key, value.to_string());
    }

    /// Stored value, or `default` if absent or not a valid i32.
    pub fn get_int(&self, key: &str, default: i32) -> i32 {
        self.get_string(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    pub fn set_int(&mut self, key: &str, value: i32) {
        self.set_string(key, value.to_string());
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

fn parse(bytes: &[u8]) -> Result<BTreeMap<String, String>, StoreError> {
    let text = std::str::from_utf8(bytes).map_err(|e| StoreError::Corrupt {
        line: 0,
        reason: e.to_string(),
    })?;

    let mut values = BTreeMap::new();
    for (idx, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            return Err(StoreError::Corrupt {
                line: idx + 1,
                reason: "missing '='".to_string(),
            });
        };
        let key = key.trim();
        if key.is_empty() {
            return Err(StoreError::Corrupt {
                line: idx + 1,
                reason: "empty key".to_string(),
            });
        }
        values.insert(key.to_string(), value.trim().to_string());
    }
    Ok(values)
}
