//! Licensing and activation for the Vecna agent.
//!
//! This module handles:
//! - Request signing shared with the license server
//! - Key activation bound to a device identifier
//! - The periodic heartbeat that keeps a session alive
//! - Persisting the activated key and install folder across restarts
//! - Extracting the licensed payload
//!
//! # Session lifecycle
//!
//! A [`LicenseSession`] starts `Unactivated`. A successful activation moves
//! it to `Active`, after which a [`HeartbeatScheduler`] keeps it alive. The
//! server may answer any request with a kill flag; the session then moves
//! to `Killed` and invokes its [`FatalAction`] exactly once. An expired key
//! purges the local payload without involving the fatal action.
//!
//! Transport failures never end a session. Only a kill flag or an expired
//! activation does.

mod api;
mod config;
mod device;
mod error;
mod fatal;
mod heartbeat;
mod install;
mod purge;
mod session;
mod signature;
mod store;

pub use api::{LicenseClient, ServerReply, UpdateInfo, classify_activation};
pub use config::{APP_VERSION, ClientConfig};
pub use device::{DeviceId, format_mac, primary_mac};
pub use error::{ActivationError, LicenseError, LicenseResult};
pub use fatal::{FatalAction, TamperReason};
pub use heartbeat::{
    HeartbeatHandle, HeartbeatOutcome, HeartbeatRecord, HeartbeatScheduler, SchedulerExit,
};
pub use install::{
    DIGEST_PREFIX_LEN, InstallMarker, MARKER_FILE_NAME, PayloadInstaller, archive_digest, marker_path,
};
pub use purge::{FsPurger, Purger, purge_folder};
pub use session::{ActivationOutcome, LicenseSession, SessionState, normalize_key};
pub use signature::{RequestSigner, SIGNATURE_LEN, now_millis, sign};
pub use store::{
    CONFIG_DIR_NAME, CONFIG_FILE_NAME, ConfigSnapshot, ConfigStore, default_config_dir,
};
