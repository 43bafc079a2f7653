//! License session lifecycle.
//!
//! ```text
//!                 activate (200)
//!  Unactivated ─────────────────▶ Active ──── kill flag ───▶ Killed
//!      │                            │
//!      │ 403 "expired"              │ stop
//!      ├──────────────▶ Expired     ▼
//!      │ 403                    Unactivated
//!      └──────────────▶ Suspended
//! ```
//!
//! The install path is only ever held while `Active`. A kill flag from any
//! flow fires the fatal action exactly once.

use crate::api::LicenseClient;
use crate::error::{ActivationError, LicenseError, LicenseResult};
use crate::fatal::{FatalAction, TamperReason};
use crate::install::PayloadInstaller;
use crate::purge::{FsPurger, Purger};
use crate::store::{ConfigSnapshot, ConfigStore};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockWriteGuard};
use tracing::{debug, error, info, warn};

/// Lifecycle state of a license session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum SessionState {
    Unactivated = 0,
    Active = 1,
    Expired = 2,
    Suspended = 3,
    Killed = 4,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Active,
            2 => Self::Expired,
            3 => Self::Suspended,
            4 => Self::Killed,
            _ => Self::Unactivated,
        }
    }
}

/// Result of a successful activation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivationOutcome {
    /// A previously installed payload is still on disk and was adopted.
    Resumed { install_path: PathBuf },
    /// The payload must be installed before use.
    NeedsInstall,
}

#[derive(Debug, Clone)]
struct Credentials {
    key: String,
    device_id: String,
}

/// Normalizes user input into the key format the server expects.
#[must_use]
pub fn normalize_key(key: &str) -> String {
    key.trim().to_uppercase()
}

/// An activation session against the license server.
pub struct LicenseSession {
    client: Arc<LicenseClient>,
    store: ConfigStore,
    fatal: Arc<dyn FatalAction>,
    purger: Arc<dyn Purger>,
    state: AtomicU8,
    credentials: RwLock<Option<Credentials>>,
    install_path: RwLock<Option<PathBuf>>,
}

impl LicenseSession {
    /// Creates an unactivated session.
    pub fn new(client: Arc<LicenseClient>, store: ConfigStore, fatal: Arc<dyn FatalAction>) -> Self {
        Self::with_purger(client, store, fatal, Arc::new(FsPurger))
    }

    /// Creates a session with a custom purger for expiry cleanup.
    pub fn with_purger(
        client: Arc<LicenseClient>,
        store: ConfigStore,
        fatal: Arc<dyn FatalAction>,
        purger: Arc<dyn Purger>,
    ) -> Self {
        Self {
            client,
            store,
            fatal,
            purger,
            state: AtomicU8::new(SessionState::Unactivated as u8),
            credentials: RwLock::new(None),
            install_path: RwLock::new(None),
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Returns true while the session is `Active`.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state() == SessionState::Active
    }

    /// The installed payload location, present only while `Active`.
    #[must_use]
    pub fn install_path(&self) -> Option<PathBuf> {
        self.install_path
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The activated key, if any.
    #[must_use]
    pub fn key(&self) -> Option<String> {
        self.credentials
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|c| c.key.clone())
    }

    /// The client used by this session.
    #[must_use]
    pub fn client(&self) -> &Arc<LicenseClient> {
        &self.client
    }

    /// The config store used by this session.
    #[must_use]
    pub fn store(&self) -> &ConfigStore {
        &self.store
    }

    /// Activates `key` for `device_id`.
    ///
    /// On success the key is persisted. Errors never touch persisted config
    /// and always leave the install path unset.
    pub async fn activate(
        &self,
        key: &str,
        device_id: &str,
    ) -> Result<ActivationOutcome, ActivationError> {
        if self.state() == SessionState::Killed {
            return Err(ActivationError::TamperDetected);
        }
        let key = normalize_key(key);
        info!("Activating license for device {}", device_id);

        let result = self.client.activate(&key, device_id).await;
        *self.install_path_slot() = None;

        match result {
            Ok(reply) if reply.kill_requested() => {
                self.set_credentials(&key, device_id);
                warn!("Activation response carried a kill flag");
                self.kill(TamperReason::KillFlag).await;
                Err(ActivationError::TamperDetected)
            }
            Ok(_) => {
                self.set_credentials(&key, device_id);

                let mut snapshot = self.store.load();
                snapshot.license_key = Some(key);
                if let Err(e) = self.store.save(&snapshot) {
                    warn!("Failed to persist license key: {}", e);
                }

                let mut resumed = snapshot.existing_install_folder().map(Path::to_path_buf);
                self.set_state(SessionState::Active);
                if !self.adopt_install_path(resumed.clone()) {
                    if self.state() == SessionState::Killed {
                        return Err(ActivationError::TamperDetected);
                    }
                    debug!("Session stopped during activation");
                    resumed = None;
                }

                info!("License activated");
                Ok(match resumed {
                    Some(install_path) => ActivationOutcome::Resumed { install_path },
                    None => ActivationOutcome::NeedsInstall,
                })
            }
            Err(ActivationError::Expired) => {
                self.set_state(SessionState::Expired);
                warn!("License expired, removing local payload");
                if let Some(folder) = self.store.load().install_folder {
                    if let Err(e) = self.purger.purge(&folder) {
                        error!("Expiry cleanup of {:?} failed: {}", folder, e);
                    }
                }
                Err(ActivationError::Expired)
            }
            Err(ActivationError::Suspended) => {
                self.set_state(SessionState::Suspended);
                Err(ActivationError::Suspended)
            }
            Err(e) => {
                self.set_state(SessionState::Unactivated);
                Err(e)
            }
        }
    }

    /// Sends one heartbeat. Returns false on any transport or status error.
    pub async fn send_heartbeat(&self, offline: bool) -> bool {
        let Some(creds) = self.credentials() else {
            debug!("Heartbeat skipped: no credentials");
            return false;
        };

        match self
            .client
            .heartbeat(&creds.key, &creds.device_id, offline)
            .await
        {
            Ok(reply) => {
                if reply.kill_requested() {
                    warn!("Heartbeat response carried a kill flag");
                    self.kill(TamperReason::KillFlag).await;
                }
                true
            }
            Err(e) => {
                debug!("Heartbeat failed: {}", e);
                false
            }
        }
    }

    /// Installs the payload archive under `parent` and persists the location.
    pub async fn install(&self, archive: &[u8], parent: &Path) -> LicenseResult<PathBuf> {
        if !self.is_active() {
            return Err(LicenseError::NotActivated);
        }
        let creds = self.credentials().ok_or(LicenseError::NotActivated)?;

        let installer = PayloadInstaller::new(self.client.config(), self.client.signer());
        if !installer.verify(archive) {
            error!("Payload archive failed its integrity check");
            self.kill(TamperReason::PayloadIntegrity).await;
            return Err(LicenseError::IntegrityMismatch);
        }

        let folder = installer.extract(archive, parent, &creds.key, &creds.device_id)?;
        {
            let mut slot = self.install_path_slot();
            if !self.is_active() {
                warn!("Session ended while installing to {:?}", folder);
                return Err(LicenseError::NotActivated);
            }
            self.store.save(&ConfigSnapshot {
                license_key: Some(creds.key),
                install_folder: Some(folder.clone()),
            })?;
            *slot = Some(folder.clone());
        }

        info!("Payload installed at {:?}", folder);
        Ok(folder)
    }

    /// Ends an active session on user request.
    pub fn stop(&self) {
        let mut slot = self.install_path_slot();
        if self
            .state
            .compare_exchange(
                SessionState::Active as u8,
                SessionState::Unactivated as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
        {
            *slot = None;
            info!("Session stopped");
        }
    }

    /// Moves to `Killed` and fires the fatal action, once.
    pub async fn kill(&self, reason: TamperReason) {
        {
            let mut slot = self.install_path_slot();
            let previous = self.state.swap(SessionState::Killed as u8, Ordering::SeqCst);
            if previous == SessionState::Killed as u8 {
                debug!("Session already killed, ignoring {}", reason);
                return;
            }
            *slot = None;
        }
        self.fatal.trigger(reason).await;
    }

    fn credentials(&self) -> Option<Credentials> {
        self.credentials
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_credentials(&self, key: &str, device_id: &str) {
        *self
            .credentials
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Credentials {
            key: key.to_string(),
            device_id: device_id.to_string(),
        });
    }

    /// Stores `state` unless the session is already killed. Leaving `Active`
    /// clears the install path.
    fn set_state(&self, state: SessionState) {
        let mut slot = self.install_path_slot();
        let _ = self
            .state
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                (current != SessionState::Killed as u8).then_some(state as u8)
            });
        if !self.is_active() {
            *slot = None;
        }
    }

    /// Sets the install path if the session is still `Active`.
    fn adopt_install_path(&self, path: Option<PathBuf>) -> bool {
        let mut slot = self.install_path_slot();
        if !self.is_active() {
            return false;
        }
        *slot = path;
        true
    }

    /// Every state change away from `Active` holds this lock, so the path
    /// cannot be set after the session has ended.
    fn install_path_slot(&self) -> RwLockWriteGuard<'_, Option<PathBuf>> {
        self.install_path
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for LicenseSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LicenseSession")
            .field("state", &self.state())
            .field("install_path", &self.install_path())
            .finish_non_exhaustive()
    }
}
