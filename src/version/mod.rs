//! Node image selection
//!
//! Nodes must run the same software version as the server they connect to. The server
//! publishes its version at `{server_url}{api_path}/version`; when that probe fails for any
//! reason the resolver falls back to the `latest` tag and reports why.

use std::time::Duration;

use reqwest::Client;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::metrics;

/// Tag used when the server version cannot be determined
pub const FALLBACK_TAG: &str = "latest";

/// Image reference picked for a node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedImage {
    pub image: String,
    /// Why the fallback image was chosen, if it was
    pub diagnostic: Option<String>,
}

/// Why a version probe did not produce a version
#[derive(Debug, Error)]
enum ProbeError {
    #[error("version probe to {url} timed out after {timeout:?}")]
    Timeout { url: String, timeout: Duration },

    #[error("could not connect to {url}: {reason}")]
    Connect { url: String, reason: String },

    #[error("version endpoint {url} answered with status {status}")]
    Status { url: String, status: u16 },

    #[error("version endpoint {url} returned an unreadable body: {reason}")]
    Body { url: String, reason: String },

    #[error("version endpoint {url} returned no 'version' or 'v' field")]
    MissingVersion { url: String },
}

/// Resolves the node image to run against a given server
#[derive(Debug, Clone)]
pub struct VersionResolver {
    client: Client,
    repository: String,
    timeout: Duration,
}

impl VersionResolver {
    pub fn new(repository: impl Into<String>, timeout: Duration) -> Self {
        let client = match Client::builder().timeout(timeout).build() {
            Ok(client) => client,
            Err(e) => {
                warn!(error = %e, "Could not configure version probe client; using defaults");
                Client::new()
            }
        };

        Self::with_client(client, repository, timeout)
    }

    /// Use a preconfigured client. Probes stay bounded by `timeout` whatever the client's
    /// own settings.
    pub fn with_client(client: Client, repository: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            repository: repository.into(),
            timeout,
        }
    }

    /// `{repository}:latest`
    pub fn fallback_image(&self) -> String {
        format!("{}:{}", self.repository, FALLBACK_TAG)
    }

    /// Build the probe URL from a server URL and API path, tolerating missing or extra slashes
    pub fn version_url(server_url: &str, api_path: &str) -> String {
        let mut base = server_url.trim().to_string();
        if !base.ends_with('/') {
            base.push('/');
        }

        let api = api_path.trim().trim_start_matches('/').trim_end_matches('/');
        if api.is_empty() {
            format!("{}version", base)
        } else {
            format!("{}{}/version", base, api)
        }
    }

    /// Pick the image for a node. Never fails: any probe failure yields the fallback image
    /// together with a diagnostic.
    pub async fn resolve_image(
        &self,
        server_url: &str,
        api_path: &str,
        explicit_image: Option<&str>,
    ) -> ResolvedImage {
        if let Some(image) = explicit_image {
            debug!(image = %image, "Using explicitly requested image");
            return ResolvedImage {
                image: image.to_string(),
                diagnostic: None,
            };
        }

        let url = Self::version_url(server_url, api_path);
        let probe = match tokio::time::timeout(self.timeout, self.probe(&url)).await {
            Ok(result) => result,
            Err(_) => Err(ProbeError::Timeout {
                url: url.clone(),
                timeout: self.timeout,
            }),
        };

        match probe {
            Ok(version) => {
                let image = format!("{}:{}", self.repository, version);
                debug!(url = %url, version = %version, image = %image, "Server version resolved");
                ResolvedImage {
                    image,
                    diagnostic: None,
                }
            }
            Err(e) => {
                let diagnostic = format!("{}; falling back to '{}'", e, FALLBACK_TAG);
                warn!(url = %url, diagnostic = %diagnostic, "Version probe failed");
                metrics::record_version_fallback();
                ResolvedImage {
                    image: self.fallback_image(),
                    diagnostic: Some(diagnostic),
                }
            }
        }
    }

    async fn probe(&self, url: &str) -> Result<String, ProbeError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.transport_error(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProbeError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body: Value = response.json().await.map_err(|e| {
            if e.is_timeout() {
                self.transport_error(url, e)
            } else {
                ProbeError::Body {
                    url: url.to_string(),
                    reason: e.to_string(),
                }
            }
        })?;

        extract_version(&body).ok_or_else(|| ProbeError::MissingVersion {
            url: url.to_string(),
        })
    }

    fn transport_error(&self, url: &str, e: reqwest::Error) -> ProbeError {
        if e.is_timeout() {
            ProbeError::Timeout {
                url: url.to_string(),
                timeout: self.timeout,
            }
        } else {
            ProbeError::Connect {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    }
}

/// Full version string from `version`, or the short `v` field older servers use
fn extract_version(body: &Value) -> Option<String> {
    ["version", "v"].iter().find_map(|key| match body.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}
