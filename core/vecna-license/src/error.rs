//! Error types for the licensing module.

use thiserror::Error;

/// Outcomes of a failed activation, surfaced to the user.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActivationError {
    /// The activation server could not be reached.
    #[error("network connection failed")]
    NetworkUnreachable,

    /// The server does not know this key.
    #[error("invalid license key")]
    InvalidKey,

    /// The key is already bound to another device.
    #[error("license bound to another device")]
    DeviceMismatch,

    /// The license has expired. Local payload has been purged.
    #[error("license expired")]
    Expired,

    /// The license is suspended.
    #[error("license suspended or expired")]
    Suspended,

    /// Any other non-success status.
    #[error("server error: {0}")]
    ServerError(u16),

    /// The server issued a kill flag or local tampering was detected.
    #[error("tampering detected")]
    TamperDetected,
}

impl ActivationError {
    /// Returns true if the error ends the session for good.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Expired | Self::TamperDetected)
    }
}

/// Licensing-specific errors outside the activation flow.
#[derive(Debug, Error)]
pub enum LicenseError {
    /// Session is not in the `Active` state.
    #[error("license not activated")]
    NotActivated,

    /// Payload digest did not match the expected value.
    #[error("payload integrity check failed")]
    IntegrityMismatch,

    /// Payload archive is malformed.
    #[error("invalid payload archive: {0}")]
    Archive(#[from] zip::result::ZipError),

    /// Network error talking to the license server.
    #[error("network error: {0}")]
    Network(String),

    /// Unexpected HTTP status from the license server.
    #[error("unexpected status: {0}")]
    Status(u16),

    /// Config directory could not be determined.
    #[error("no config directory available")]
    NoConfigDir,

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<reqwest::Error> for LicenseError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => Self::Status(status.as_u16()),
            None => Self::Network(err.to_string()),
        }
    }
}

/// Result type for license operations.
pub type LicenseResult<T> = Result<T, LicenseError>;
