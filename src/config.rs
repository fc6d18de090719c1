//! Runtime configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Reactive store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Prefix of every durable key owned by the store.
    pub namespace: String,

    /// Directory for the file-backed durable store (None = in-memory).
    pub path: Option<PathBuf>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            namespace: "ogs.".to_string(),
            path: None,
        }
    }
}

/// Request layer configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestConfig {
    /// Origin prepended to every API path by the HTTP transport.
    pub base_url: String,

    /// Prefix for relative API paths.
    pub api_prefix: String,

    /// Sent as `X-CSRFToken` on unsafe methods.
    pub csrf_token: Option<String>,

    /// Placeholder replaced by the request id in URL templates.
    pub id_marker: String,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost".to_string(),
            api_prefix: "/api/v1/".to_string(),
            csrf_token: None,
            id_marker: "%%".to_string(),
        }
    }
}

/// Top-level configuration for a [`ClientRuntime`](crate::ClientRuntime).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub store: StoreConfig,
    pub requests: RequestConfig,
}

impl RuntimeConfig {
    /// Parse a configuration from JSON text; missing fields take defaults.
    pub fn from_json(text: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}
