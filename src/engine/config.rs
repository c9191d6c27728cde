//! ctsync Configuration Module
//! Handles loading and validating ctsync.config.json

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::engine::updater::compat::{
    CompatibilityVersion, COMPATIBILITY_VERSION_V1, COMPATIBILITY_VERSION_V2,
};
use crate::engine::updater::download::HttpConfig;
use crate::engine::updater::policy::UpdatePolicy;

pub const CONFIG_FILE: &str = "ctsync.config.json";
pub const NAMESPACE_NETWORK_SECURITY: &str = "network_security";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),
    #[error("Failed to read config: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("Invalid config format: {0}")]
    ParseError(#[from] serde_json::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
    #[error("Could not determine a data directory")]
    NoDataDir,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    #[serde(default = "default_store_file")]
    pub store_file: String,
    #[serde(default = "default_install_dir")]
    pub install_dir: PathBuf,
    /// Base64 ED25519 key that signs log lists
    #[serde(default)]
    pub public_key: Option<String>,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub http: HttpSettings,
    #[serde(default)]
    pub flag: FlagConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default = "default_versions")]
    pub compatibility_versions: Vec<VersionConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_secs: u64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,
    #[serde(default = "default_max_staleness")]
    pub max_staleness_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpSettings {
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_max_download_bytes")]
    pub max_download_bytes: u64,
}

/// Runtime enable/disable flag as published by the policy store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlagConfig {
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Value used when the flag is absent
    #[serde(default = "default_true")]
    pub default_enabled: bool,
    /// Current flag value, if the policy store has set one
    #[serde(default)]
    pub enabled: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_host")]
    pub host: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VersionConfig {
    pub id: String,
    pub signature_url: String,
    pub log_list_url: String,
}

fn default_store_file() -> String {
    "update_state.properties".to_string()
}

fn default_install_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_poll_interval() -> u64 {
    60 * 60
}

fn default_refresh_interval() -> u64 {
    24 * 60 * 60
}

fn default_initial_backoff() -> u64 {
    30 * 60
}

fn default_max_backoff() -> u64 {
    12 * 60 * 60
}

fn default_max_staleness() -> u64 {
    7 * 24 * 60 * 60
}

fn default_request_timeout() -> u64 {
    60
}

fn default_connect_timeout() -> u64 {
    15
}

fn default_max_download_bytes() -> u64 {
    16 * 1024 * 1024
}

fn default_namespace() -> String {
    NAMESPACE_NETWORK_SECURITY.to_string()
}

fn default_true() -> bool {
    true
}

fn default_port() -> u16 {
    54380
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_versions() -> Vec<VersionConfig> {
    [COMPATIBILITY_VERSION_V1, COMPATIBILITY_VERSION_V2]
        .into_iter()
        .map(|id| {
            let (signature_url, log_list_url) = CompatibilityVersion::default_urls(id);
            VersionConfig {
                id: id.to_string(),
                signature_url,
                log_list_url,
            }
        })
        .collect()
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            refresh_interval_secs: default_refresh_interval(),
            initial_backoff_secs: default_initial_backoff(),
            max_backoff_secs: default_max_backoff(),
            max_staleness_secs: default_max_staleness(),
        }
    }
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            max_download_bytes: default_max_download_bytes(),
        }
    }
}

impl Default for FlagConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            default_enabled: true,
            enabled: None,
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: "0.1.0".to_string(),
            store_file: default_store_file(),
            install_dir: default_install_dir(),
            public_key: None,
            schedule: ScheduleConfig::default(),
            http: HttpSettings::default(),
            flag: FlagConfig::default(),
            api: ApiConfig::default(),
            compatibility_versions: default_versions(),
        }
    }
}

impl Config {
    pub fn load(data_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = data_dir.join(CONFIG_FILE);
        if !config_path.exists() {
            return Err(ConfigError::NotFound(config_path));
        }
        let content = std::fs::read_to_string(&config_path)?;
        let config: Config = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, data_dir: &Path) -> Result<(), ConfigError> {
        std::fs::create_dir_all(data_dir)?;
        let config_path = data_dir.join(CONFIG_FILE);
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    /// Platform data directory used when none is given
    pub fn default_data_dir() -> Result<PathBuf, ConfigError> {
        dirs::data_local_dir()
            .map(|dir| dir.join("ctsync"))
            .ok_or(ConfigError::NoDataDir)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.compatibility_versions.is_empty() {
            return Err(ConfigError::Invalid("no compatibility versions configured".to_string()));
        }
        let mut seen = HashSet::new();
        for version in &self.compatibility_versions {
            if !CompatibilityVersion::is_valid_id(&version.id) {
                return Err(ConfigError::Invalid(format!(
                    "compatibility version id {:?} may only contain A-Z, a-z, 0-9, '-' and '_'",
                    version.id
                )));
            }
            if !seen.insert(version.id.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate compatibility version {}", version.id)));
            }
        }
        self.compatibility_versions()?;

        let s = &self.schedule;
        let intervals = [
            ("poll_interval_secs", s.poll_interval_secs),
            ("refresh_interval_secs", s.refresh_interval_secs),
            ("initial_backoff_secs", s.initial_backoff_secs),
            ("max_backoff_secs", s.max_backoff_secs),
            ("max_staleness_secs", s.max_staleness_secs),
            ("request_timeout_secs", self.http.request_timeout_secs),
        ];
        for (name, value) in intervals {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{} must be non-zero", name)));
            }
        }
        if s.max_backoff_secs < s.initial_backoff_secs {
            return Err(ConfigError::Invalid(
                "max_backoff_secs must not be below initial_backoff_secs".to_string(),
            ));
        }
        Ok(())
    }

    pub fn compatibility_versions(&self) -> Result<Vec<CompatibilityVersion>, ConfigError> {
        self.compatibility_versions
            .iter()
            .map(|v| {
                CompatibilityVersion::parse(&v.id, &v.signature_url, &v.log_list_url)
                    .map_err(|e| ConfigError::Invalid(format!("{}: {}", v.id, e)))
            })
            .collect()
    }

    pub fn policy(&self) -> UpdatePolicy {
        let s = &self.schedule;
        UpdatePolicy {
            poll_interval: Duration::from_secs(s.poll_interval_secs),
            refresh_interval: Duration::from_secs(s.refresh_interval_secs),
            initial_backoff: Duration::from_secs(s.initial_backoff_secs),
            max_backoff: Duration::from_secs(s.max_backoff_secs),
            max_staleness: Duration::from_secs(s.max_staleness_secs),
        }
    }

    pub fn http_config(&self) -> HttpConfig {
        HttpConfig {
            request_timeout: Duration::from_secs(self.http.request_timeout_secs),
            connect_timeout: Duration::from_secs(self.http.connect_timeout_secs),
            max_download_bytes: self.http.max_download_bytes,
        }
    }

    pub fn store_path(&self, data_dir: &Path) -> PathBuf {
        data_dir.join(&self.store_file)
    }

    pub fn install_root(&self, data_dir: &Path) -> PathBuf {
        data_dir.join(&self.install_dir)
    }
}
