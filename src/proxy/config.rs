//! Proxy configuration file
//!
//! Operators maintain an ordered JSON array of proxy records. The file is
//! re-read from disk on every campaign run so it can be edited between runs
//! without restarting anything.

use std::path::Path;
use tracing::{info, warn};

use super::ProxyError;

/// One rotating-proxy record, immutable once loaded.
///
/// Field names are the on-disk format.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ProxyDescriptor {
    /// Proxy server URL, e.g. `http://82.23.62.96:7849`
    pub server: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// Endpoint that assigns the proxy a fresh IP when fetched
    #[serde(default)]
    pub rotation_url: String,
}

impl ProxyDescriptor {
    /// Whether this descriptor carries credentials
    pub fn has_credentials(&self) -> bool {
        !self.username.is_empty()
    }

    /// Whether this descriptor exposes a rotation endpoint
    pub fn has_rotation_endpoint(&self) -> bool {
        !self.rotation_url.is_empty()
    }
}

/// Load the ordered proxy list from disk.
///
/// A missing file behaves like an empty one (campaigns run with direct
/// connections); a malformed file is a setup error and fails the run.
pub fn load_proxy_file(path: &Path) -> Result<Vec<ProxyDescriptor>, ProxyError> {
    if !path.exists() {
        warn!("Proxy file {} not found, running without proxies", path.display());
        return Ok(Vec::new());
    }

    let content = std::fs::read_to_string(path)?;
    let proxies: Vec<ProxyDescriptor> =
        serde_json::from_str(&content).map_err(|e| ProxyError::Config {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

    for proxy in &proxies {
        if proxy.server.is_empty() {
            return Err(ProxyError::Config {
                path: path.to_path_buf(),
                reason: "proxy record with empty server".to_string(),
            });
        }
    }

    info!("Loaded {} proxies from {}", proxies.len(), path.display());
    Ok(proxies)
}
