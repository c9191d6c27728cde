//! Log List Downloader
//!
//! Fetches a compatibility version's signature and log list, verifies the
//! pair, and returns the verified artifact for the caller to commit.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::StreamExt;
use reqwest::header::CONTENT_LENGTH;
use reqwest::Url;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

use super::compat::CompatibilityVersion;
use super::logger::FailureKind;
use super::verify::{content_hash, SignatureError, SignatureVerifier};

/// Download error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DownloadError {
    #[error("Network error fetching {url}: {reason}")]
    Network { url: String, reason: String },
    #[error("Signature error: {0}")]
    Signature(#[from] SignatureError),
    #[error("Malformed log list: {0}")]
    MalformedContent(String),
}

impl DownloadError {
    pub fn network(url: &Url, reason: impl Into<String>) -> Self {
        Self::Network {
            url: url.to_string(),
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Network { .. } => FailureKind::Network,
            Self::Signature(_) => FailureKind::Signature,
            Self::MalformedContent(_) => FailureKind::MalformedContent,
        }
    }
}

/// Source of remote bytes. The HTTP client sits behind this seam.
pub trait Fetcher: Send + Sync {
    fn fetch<'a>(&'a self, url: &'a Url) -> BoxFuture<'a, Result<Vec<u8>, DownloadError>>;
}

/// HTTP settings for `HttpFetcher`
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    pub max_download_bytes: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(15),
            max_download_bytes: 16 * 1024 * 1024,
        }
    }
}

/// reqwest-backed fetcher with bounded time and size
pub struct HttpFetcher {
    client: reqwest::Client,
    max_download_bytes: u64,
}

impl HttpFetcher {
    pub fn new(config: &HttpConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("ctsync/", env!("CARGO_PKG_VERSION")))
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .build()?;
        Ok(Self {
            client,
            max_download_bytes: config.max_download_bytes,
        })
    }

    async fn get(&self, url: &Url) -> Result<Vec<u8>, DownloadError> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| DownloadError::network(url, e.to_string()))?;

        if !response.status().is_success() {
            return Err(DownloadError::network(url, format!("HTTP {}", response.status())));
        }

        let declared = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok());
        if let Some(len) = declared {
            if len > self.max_download_bytes {
                return Err(DownloadError::network(
                    url,
                    format!("response of {} bytes exceeds limit of {}", len, self.max_download_bytes),
                ));
            }
        }

        let mut body = Vec::with_capacity(declared.unwrap_or(0) as usize);
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| DownloadError::network(url, e.to_string()))?;
            if (body.len() + chunk.len()) as u64 > self.max_download_bytes {
                return Err(DownloadError::network(
                    url,
                    format!("response exceeds limit of {} bytes", self.max_download_bytes),
                ));
            }
            body.extend_from_slice(&chunk);
        }

        debug!(url = %url, bytes = body.len(), "Downloaded");
        Ok(body)
    }
}

impl Fetcher for HttpFetcher {
    fn fetch<'a>(&'a self, url: &'a Url) -> BoxFuture<'a, Result<Vec<u8>, DownloadError>> {
        Box::pin(self.get(url))
    }
}

/// A verified log list, held only between download and commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogListArtifact {
    pub version_id: String,
    pub raw_bytes: Vec<u8>,
    pub signature_bytes: Vec<u8>,
    pub declared_version: i64,
    pub log_list_timestamp: Option<String>,
    pub content_hash: String,
}

#[derive(Deserialize)]
struct Envelope {
    version: Option<serde_json::Value>,
    #[serde(default)]
    log_list_timestamp: Option<String>,
}

/// Read the declared content version from the log-list envelope.
pub fn parse_envelope(bytes: &[u8]) -> Result<(i64, Option<String>), DownloadError> {
    let envelope: Envelope = serde_json::from_slice(bytes)
        .map_err(|e| DownloadError::MalformedContent(e.to_string()))?;

    let version = match envelope.version {
        Some(serde_json::Value::Number(n)) => n.as_i64(),
        Some(serde_json::Value::String(s)) => s.trim().parse().ok(),
        Some(_) | None => None,
    }
    .ok_or_else(|| DownloadError::MalformedContent("missing or non-integer version".to_string()))?;

    if version < 0 {
        return Err(DownloadError::MalformedContent(format!("negative version {}", version)));
    }

    Ok((version, envelope.log_list_timestamp))
}

/// Downloads and verifies log lists
pub struct Downloader {
    fetcher: Arc<dyn Fetcher>,
    verifier: Arc<SignatureVerifier>,
}

impl Downloader {
    pub fn new(fetcher: Arc<dyn Fetcher>, verifier: Arc<SignatureVerifier>) -> Self {
        Self { fetcher, verifier }
    }

    /// Fetch both files for `version`, verify them, and parse the envelope.
    ///
    /// Never writes anything; the returned artifact carries the exact bytes
    /// that were verified.
    pub async fn fetch_and_verify(
        &self,
        version: &CompatibilityVersion,
    ) -> Result<LogListArtifact, DownloadError> {
        let version_id = version.version_id();

        let signature_bytes = self.fetcher.fetch(version.signature_url()).await?;
        let raw_bytes = self.fetcher.fetch(version.log_list_url()).await?;

        self.verifier.verify(version_id, &raw_bytes, &signature_bytes)?;

        let (declared_version, log_list_timestamp) = parse_envelope(&raw_bytes)?;
        let content_hash = content_hash(&raw_bytes);

        info!(version_id, declared_version, hash = %content_hash, "Log list verified");

        Ok(LogListArtifact {
            version_id: version_id.to_string(),
            raw_bytes,
            signature_bytes,
            declared_version,
            log_list_timestamp,
            content_hash,
        })
    }
}
