//! Request signing.
//!
//! Every request to the license server carries a millisecond timestamp and
//! a signature over `key:device:timestamp:secret`. The signature is the
//! first 32 hex characters of the SHA-256 digest. Freshness is enforced by
//! the server; the client only produces signatures.

use sha2::{Digest, Sha256};

/// Number of hex characters kept from the digest.
pub const SIGNATURE_LEN: usize = 32;

/// Produces request signatures with a shared secret.
#[derive(Clone)]
pub struct RequestSigner {
    secret: String,
}

impl RequestSigner {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Signs a `(key, device, timestamp)` triple.
    #[must_use]
    pub fn sign(&self, key: &str, device_id: &str, timestamp_millis: i64) -> String {
        sign(key, device_id, timestamp_millis, &self.secret)
    }

    /// Digest of `value:secret`, used for the installed marker file.
    #[must_use]
    pub fn seal(&self, value: &str) -> String {
        hex::encode(Sha256::digest(format!("{value}:{}", self.secret).as_bytes()))
    }
}

impl std::fmt::Debug for RequestSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestSigner").finish_non_exhaustive()
    }
}

/// Signs `key:device_id:timestamp_millis:secret`.
#[must_use]
pub fn sign(key: &str, device_id: &str, timestamp_millis: i64, secret: &str) -> String {
    let data = format!("{key}:{device_id}:{timestamp_millis}:{secret}");
    let digest = hex::encode(Sha256::digest(data.as_bytes()));
    digest[..SIGNATURE_LEN].to_string()
}

/// Current wall-clock time in milliseconds since the epoch.
#[must_use]
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
