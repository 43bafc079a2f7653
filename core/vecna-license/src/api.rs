//! HTTP client for the license server.
//!
//! Endpoints (relative to `api_base_url`):
//! - `POST activate-mac`: bind a key to this device
//! - `POST heartbeat`: liveness ping, or a final offline notice
//! - `POST report-tamper`: best-effort tamper notification
//!
//! plus `GET settings_url` for update checks.

use crate::config::{APP_VERSION, ClientConfig};
use crate::error::{ActivationError, LicenseResult};
use crate::signature::{RequestSigner, now_millis};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SignedRequest<'a> {
    key: &'a str,
    mac_address: &'a str,
    timestamp: i64,
    signature: String,
}

#[derive(Debug, Serialize)]
struct HeartbeatRequest<'a> {
    #[serde(flatten)]
    signed: SignedRequest<'a>,
    heartbeat: bool,
    offline: bool,
}

#[derive(Debug, Serialize)]
struct TamperReport<'a> {
    key: &'a str,
    mac_address: &'a str,
    reason: String,
    signature: String,
    timestamp: i64,
}

/// A successful server response body.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServerReply {
    body: Value,
}

impl ServerReply {
    /// Parses a response body. Anything that is not JSON counts as empty.
    #[must_use]
    pub fn parse(body: &[u8]) -> Self {
        Self {
            body: serde_json::from_slice(body).unwrap_or(Value::Null),
        }
    }

    /// Returns true if the server asked the client to self-destruct.
    #[must_use]
    pub fn kill_requested(&self) -> bool {
        self.body.get("kill") == Some(&Value::Bool(true))
    }

    /// Raw JSON body.
    #[must_use]
    pub fn body(&self) -> &Value {
        &self.body
    }
}

/// Settings published by the server.
#[derive(Debug, Clone, Default, Deserialize)]
struct SettingsResponse {
    #[serde(rename = "latestVersion")]
    latest_version: Option<String>,
    #[serde(rename = "updateUrl")]
    update_url: Option<String>,
}

/// A newer release is available.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateInfo {
    pub latest_version: String,
    pub update_url: String,
}

/// Maps an activation response to its outcome.
///
/// A 403 is split on whether the `error` field mentions "expired",
/// case-insensitive. Non-JSON bodies are searched as plain text.
pub fn classify_activation(status: u16, body: &[u8]) -> Result<ServerReply, ActivationError> {
    match status {
        200..=299 => Ok(ServerReply::parse(body)),
        403 if mentions_expired(body) => Err(ActivationError::Expired),
        403 => Err(ActivationError::Suspended),
        404 => Err(ActivationError::InvalidKey),
        409 => Err(ActivationError::DeviceMismatch),
        code => Err(ActivationError::ServerError(code)),
    }
}

fn mentions_expired(body: &[u8]) -> bool {
    let text = match serde_json::from_slice::<Value>(body) {
        Ok(json) => match json.get("error") {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        },
        Err(_) => String::from_utf8_lossy(body).into_owned(),
    };
    text.to_lowercase().contains("expired")
}

/// Client for the license server.
#[derive(Debug)]
pub struct LicenseClient {
    config: ClientConfig,
    signer: RequestSigner,
    http: Client,
}

impl LicenseClient {
    /// Creates a client from configuration.
    pub fn new(config: ClientConfig) -> LicenseResult<Self> {
        let http = Client::builder()
            .user_agent(format!("vecna-agent/{APP_VERSION}"))
            .build()?;
        let signer = RequestSigner::new(config.sign_secret.clone());

        Ok(Self {
            config,
            signer,
            http,
        })
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Returns the request signer.
    #[must_use]
    pub fn signer(&self) -> &RequestSigner {
        &self.signer
    }

    fn signed<'a>(&self, key: &'a str, device_id: &'a str) -> SignedRequest<'a> {
        let timestamp = now_millis();
        SignedRequest {
            key,
            mac_address: device_id,
            timestamp,
            signature: self.signer.sign(key, device_id, timestamp),
        }
    }

    /// Activates `key` for `device_id`.
    pub async fn activate(
        &self,
        key: &str,
        device_id: &str,
    ) -> Result<ServerReply, ActivationError> {
        let response = self
            .http
            .post(self.config.endpoint("activate-mac"))
            .timeout(Duration::from_millis(self.config.activation_timeout_ms))
            .json(&self.signed(key, device_id))
            .send()
            .await
            .map_err(|e| {
                warn!("Activation request failed: {}", e);
                ActivationError::NetworkUnreachable
            })?;

        let status = response.status().as_u16();
        let body = response.bytes().await.unwrap_or_default();
        debug!("Activation responded with status {}", status);

        classify_activation(status, &body)
    }

    /// Sends a heartbeat. `offline` marks the final notice before exit.
    pub async fn heartbeat(
        &self,
        key: &str,
        device_id: &str,
        offline: bool,
    ) -> LicenseResult<ServerReply> {
        let request = HeartbeatRequest {
            signed: self.signed(key, device_id),
            heartbeat: !offline,
            offline,
        };

        let response = self
            .http
            .post(self.config.endpoint("heartbeat"))
            .timeout(Duration::from_millis(self.config.heartbeat_timeout_ms))
            .json(&request)
            .send()
            .await?
            .error_for_status()?;

        let body = response.bytes().await?;
        Ok(ServerReply::parse(&body))
    }

    /// Reports a tamper event. The response is ignored.
    pub async fn report_tamper(
        &self,
        key: &str,
        device_id: &str,
        reason: &str,
    ) -> LicenseResult<()> {
        let timestamp = now_millis();
        let report = TamperReport {
            key,
            mac_address: device_id,
            reason: format!("Client self-defense triggered: {reason}"),
            signature: self.signer.sign(key, device_id, timestamp),
            timestamp,
        };

        self.http
            .post(self.config.endpoint("report-tamper"))
            .timeout(Duration::from_millis(self.config.report_timeout_ms))
            .json(&report)
            .send()
            .await?;

        info!("Tamper report sent");
        Ok(())
    }

    /// Checks the settings endpoint for a release other than `current`.
    pub async fn check_for_updates(&self, current: &str) -> LicenseResult<Option<UpdateInfo>> {
        let settings: SettingsResponse = self
            .http
            .get(&self.config.settings_url)
            .timeout(Duration::from_millis(self.config.settings_timeout_ms))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let latest = settings
            .latest_version
            .unwrap_or_else(|| current.to_string());
        if latest == current {
            return Ok(None);
        }

        Ok(Some(UpdateInfo {
            latest_version: latest,
            update_url: settings.update_url.unwrap_or_default(),
        }))
    }
}
