//! Log List Installation
//!
//! Publishes verified log lists to the CT-validation consumer. Each install
//! lands in its own directory and becomes visible through a single atomic
//! switch of the `current` pointer, so readers never see a partial list.
//!
//! Layout under the install root:
//!
//! ```text
//! <root>/<version_id>/logs-<content_version>-<hash8>/log_list.json
//! <root>/<version_id>/logs-<content_version>-<hash8>/signature.sig
//! <root>/<version_id>/current -> logs-<content_version>-<hash8>
//! ```

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

#[cfg(unix)]
use std::os::unix::fs::symlink;

use thiserror::Error;
use tracing::{debug, info, warn};

use super::compat::CompatibilityVersion;
use super::download::LogListArtifact;

pub const LOG_LIST_FILE: &str = "log_list.json";
pub const SIGNATURE_FILE: &str = "signature.sig";
const CURRENT: &str = "current";
const CONTENT_PREFIX: &str = "logs-";
const TEMP_PREFIX: &str = ".tmp-";

#[derive(Error, Debug)]
pub enum InstallError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Invalid version id: {0}")]
    InvalidVersionId(String),
}

/// Consumer boundary: receives verified lists and serves the committed one.
pub trait LogListInstaller: Send + Sync {
    /// Atomically publish `artifact` as the current list for its version.
    fn install(&self, artifact: &LogListArtifact) -> Result<PathBuf, InstallError>;
    /// Bytes of the currently committed list, if any.
    fn current_log_list(&self, version_id: &str) -> Result<Option<Vec<u8>>, InstallError>;
}

/// Installer writing versioned directories under a root
pub struct DirectoryInstaller {
    root: PathBuf,
}

impl DirectoryInstaller {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn version_dir(&self, version_id: &str) -> Result<PathBuf, InstallError> {
        if !CompatibilityVersion::is_valid_id(version_id) {
            return Err(InstallError::InvalidVersionId(version_id.to_string()));
        }
        Ok(self.root.join(version_id))
    }

    /// Name of the directory `current` points at
    pub fn current_target(&self, version_id: &str) -> Result<Option<String>, InstallError> {
        let version_dir = self.version_dir(version_id)?;
        read_current(&version_dir)
    }

    /// Write `artifact` into a fresh content directory (temp dir + rename).
    fn stage(&self, version_dir: &Path, artifact: &LogListArtifact) -> Result<String, InstallError> {
        let hash_prefix: String = artifact.content_hash.chars().take(8).collect();
        let name = format!("{}{}-{}", CONTENT_PREFIX, artifact.declared_version, hash_prefix);
        let final_path = version_dir.join(&name);

        // Same version and hash means identical bytes: reuse.
        if final_path.join(LOG_LIST_FILE).exists() {
            let existing = fs::read(final_path.join(LOG_LIST_FILE))?;
            if existing == artifact.raw_bytes {
                debug!(dir = %final_path.display(), "Content directory already present");
                return Ok(name);
            }
            fs::remove_dir_all(&final_path)?;
        }

        let temp_path = version_dir.join(format!("{}{}", TEMP_PREFIX, name));
        if temp_path.exists() {
            fs::remove_dir_all(&temp_path)?;
        }
        fs::create_dir_all(&temp_path)?;
        write_synced(&temp_path.join(LOG_LIST_FILE), &artifact.raw_bytes)?;
        write_synced(&temp_path.join(SIGNATURE_FILE), &artifact.signature_bytes)?;

        // Atomic rename from temp to final
        fs::rename(&temp_path, &final_path)?;
        Ok(name)
    }

    /// Remove content and temp directories other than `keep`.
    fn cleanup(&self, version_dir: &Path, keep: &str) -> Result<(), InstallError> {
        for entry in fs::read_dir(version_dir)? {
            let entry = entry?;
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            let is_content = name.starts_with(CONTENT_PREFIX) || name.starts_with(TEMP_PREFIX);
            if is_content && name != keep && entry.path().is_dir() {
                if let Err(e) = fs::remove_dir_all(entry.path()) {
                    warn!(dir = %entry.path().display(), error = %e, "Failed to remove old log list");
                }
            }
        }
        Ok(())
    }
}

impl LogListInstaller for DirectoryInstaller {
    fn install(&self, artifact: &LogListArtifact) -> Result<PathBuf, InstallError> {
        let version_dir = self.version_dir(&artifact.version_id)?;
        fs::create_dir_all(&version_dir)?;

        let name = self.stage(&version_dir, artifact)?;
        switch_current(&version_dir, &name)?;
        self.cleanup(&version_dir, &name)?;

        let installed = version_dir.join(&name);
        info!(
            version_id = %artifact.version_id,
            content_version = artifact.declared_version,
            dir = %installed.display(),
            "Log list published"
        );
        Ok(installed)
    }

    fn current_log_list(&self, version_id: &str) -> Result<Option<Vec<u8>>, InstallError> {
        let version_dir = self.version_dir(version_id)?;
        let Some(name) = read_current(&version_dir)? else {
            return Ok(None);
        };
        match fs::read(version_dir.join(name).join(LOG_LIST_FILE)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

fn write_synced(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

/// Point `current` at `name` atomically.
#[cfg(unix)]
fn switch_current(version_dir: &Path, name: &str) -> Result<(), InstallError> {
    let current = version_dir.join(CURRENT);
    let temp_link = version_dir.join(".current_new");

    // Create new symlink
    if temp_link.symlink_metadata().is_ok() {
        fs::remove_file(&temp_link)?;
    }
    symlink(name, &temp_link)?;

    // Atomic rename
    fs::rename(&temp_link, &current)?;
    Ok(())
}

/// Point `current` at `name` atomically (marker file on non-unix targets).
#[cfg(not(unix))]
fn switch_current(version_dir: &Path, name: &str) -> Result<(), InstallError> {
    let current = version_dir.join(CURRENT);
    let temp_marker = version_dir.join(".current_new");
    write_synced(&temp_marker, name.as_bytes())?;
    fs::rename(&temp_marker, &current)?;
    Ok(())
}

#[cfg(unix)]
fn read_current(version_dir: &Path) -> Result<Option<String>, InstallError> {
    match fs::read_link(version_dir.join(CURRENT)) {
        Ok(target) => Ok(target.file_name().and_then(|n| n.to_str()).map(str::to_string)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[cfg(not(unix))]
fn read_current(version_dir: &Path) -> Result<Option<String>, InstallError> {
    match fs::read_to_string(version_dir.join(CURRENT)) {
        Ok(name) => Ok(Some(name.trim().to_string())),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::updater::verify::content_hash;
    use tempfile::tempdir;

    fn artifact(version_id: &str, declared_version: i64) -> LogListArtifact {
        let raw_bytes = format!(r#"{{"version": {}}}"#, declared_version).into_bytes();
        LogListArtifact {
            version_id: version_id.to_string(),
            content_hash: content_hash(&raw_bytes),
            raw_bytes,
            signature_bytes: vec![1; 64],
            declared_version,
            log_list_timestamp: None,
        }
    }

    #[test]
    fn test_nothing_installed() {
        let dir = tempdir().unwrap();
        let installer = DirectoryInstaller::new(dir.path());
        assert_eq!(installer.current_log_list("v1").unwrap(), None);
        assert_eq!(installer.current_target("v1").unwrap(), None);
    }

    #[test]
    fn test_install_and_read_back() {
        let dir = tempdir().unwrap();
        let installer = DirectoryInstaller::new(dir.path());
        let first = artifact("v1", 5);

        let path = installer.install(&first).unwrap();
        assert!(path.join(LOG_LIST_FILE).exists());
        assert!(path.join(SIGNATURE_FILE).exists());
        assert_eq!(installer.current_log_list("v1").unwrap(), Some(first.raw_bytes.clone()));
    }

    #[test]
    fn test_upgrade_switches_and_cleans_up() {
        let dir = tempdir().unwrap();
        let installer = DirectoryInstaller::new(dir.path());

        let old_path = installer.install(&artifact("v1", 5)).unwrap();
        let new = artifact("v1", 6);
        let new_path = installer.install(&new).unwrap();

        assert_eq!(installer.current_log_list("v1").unwrap(), Some(new.raw_bytes));
        assert!(!old_path.exists());
        assert!(new_path.exists());
        assert!(installer.current_target("v1").unwrap().unwrap().starts_with("logs-6-"));
    }

    #[test]
    fn test_versions_are_isolated() {
        let dir = tempdir().unwrap();
        let installer = DirectoryInstaller::new(dir.path());

        installer.install(&artifact("v1", 5)).unwrap();
        installer.install(&artifact("v2", 1)).unwrap();

        assert_eq!(installer.current_log_list("v1").unwrap(), Some(artifact("v1", 5).raw_bytes));
        assert_eq!(installer.current_log_list("v2").unwrap(), Some(artifact("v2", 1).raw_bytes));
    }

    #[test]
    fn test_leftover_temp_dir_is_replaced() {
        let dir = tempdir().unwrap();
        let installer = DirectoryInstaller::new(dir.path());
        let art = artifact("v1", 5);
        let hash_prefix: String = art.content_hash.chars().take(8).collect();

        // Interrupted earlier install
        let temp = dir.path().join("v1").join(format!(".tmp-logs-5-{}", hash_prefix));
        fs::create_dir_all(&temp).unwrap();
        fs::write(temp.join(LOG_LIST_FILE), b"partial").unwrap();

        installer.install(&art).unwrap();
        assert_eq!(installer.current_log_list("v1").unwrap(), Some(art.raw_bytes));
        assert!(!temp.exists());
    }

    #[test]
    fn test_rejects_path_like_version_id() {
        let dir = tempdir().unwrap();
        let installer = DirectoryInstaller::new(dir.path());
        let result = installer.install(&artifact("../escape", 1));
        assert!(matches!(result, Err(InstallError::InvalidVersionId(_))));
    }
}
