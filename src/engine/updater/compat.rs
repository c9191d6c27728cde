//! Compatibility Versions
//!
//! Each compatibility version is an independent channel of log-list data,
//! letting older consumers keep working while newer schemas roll out.

use reqwest::Url;

pub const COMPATIBILITY_VERSION_V1: &str = "v1";
pub const COMPATIBILITY_VERSION_V2: &str = "v2";

const BASE_URL: &str = "https://www.gstatic.com/android/certificate_transparency";

/// One versioned channel of CT metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompatibilityVersion {
    version_id: String,
    signature_url: Url,
    log_list_url: Url,
}

impl CompatibilityVersion {
    pub fn new(version_id: impl Into<String>, signature_url: Url, log_list_url: Url) -> Self {
        Self {
            version_id: version_id.into(),
            signature_url,
            log_list_url,
        }
    }

    /// Build from string URLs, rejecting anything that does not parse.
    pub fn parse(version_id: &str, signature_url: &str, log_list_url: &str) -> Result<Self, String> {
        if !Self::is_valid_id(version_id) {
            return Err(format!("invalid version id {:?}: use only A-Z, a-z, 0-9, '-' and '_'", version_id));
        }
        let signature_url = Url::parse(signature_url)
            .map_err(|e| format!("invalid signature URL {}: {}", signature_url, e))?;
        let log_list_url = Url::parse(log_list_url)
            .map_err(|e| format!("invalid log list URL {}: {}", log_list_url, e))?;
        Ok(Self::new(version_id, signature_url, log_list_url))
    }

    /// Ids name store keys (`{id}.{field}`) and install directories.
    pub fn is_valid_id(version_id: &str) -> bool {
        !version_id.is_empty()
            && version_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    }

    pub fn version_id(&self) -> &str {
        &self.version_id
    }

    pub fn signature_url(&self) -> &Url {
        &self.signature_url
    }

    pub fn log_list_url(&self) -> &Url {
        &self.log_list_url
    }

    /// Store key for one of this version's fields, e.g. `v1.failure_count`.
    pub fn key(&self, field: &str) -> String {
        format!("{}.{}", self.version_id, field)
    }

    /// URLs used when no configuration overrides them.
    pub fn default_urls(version_id: &str) -> (String, String) {
        (
            format!("{}/{}/log_list.sig", BASE_URL, version_id),
            format!("{}/{}/log_list.json", BASE_URL, version_id),
        )
    }
}
