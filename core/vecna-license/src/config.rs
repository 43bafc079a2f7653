//! Client configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Version reported to the settings endpoint for update checks.
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Endpoints, secrets and timing for talking to the license server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL of the key API (e.g. `https://host/api/keys`).
    pub api_base_url: String,
    /// Full URL of the public settings endpoint.
    pub settings_url: String,
    /// Shared signing secret.
    pub sign_secret: String,
    /// Timeout for the activation request (ms).
    pub activation_timeout_ms: u64,
    /// Timeout for heartbeat requests (ms).
    pub heartbeat_timeout_ms: u64,
    /// Timeout for tamper reports (ms).
    pub report_timeout_ms: u64,
    /// Timeout for the settings request (ms).
    pub settings_timeout_ms: u64,
    /// Interval between heartbeats (seconds).
    pub heartbeat_interval_secs: u64,
    /// Directory name the payload is extracted into.
    pub payload_dir_name: String,
    /// Expected hex SHA-256 prefix of the payload archive, if pinned.
    pub payload_digest: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://127.0.0.1:3000/api/keys".to_string(),
            settings_url: "http://127.0.0.1:3000/api/settings".to_string(),
            sign_secret: "vecna-sign-key".to_string(),
            activation_timeout_ms: 30_000,
            heartbeat_timeout_ms: 5_000,
            report_timeout_ms: 3_000,
            settings_timeout_ms: 10_000,
            heartbeat_interval_secs: 600,
            payload_dir_name: "VecnaExtension".to_string(),
            payload_digest: None,
        }
    }
}

impl ClientConfig {
    /// Returns the heartbeat interval as a `Duration`.
    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub(crate) fn endpoint(&self, path: &str) -> String {
        format!("{}/{path}", self.api_base_url.trim_end_matches('/'))
    }
}
