//! Tamper monitoring for the Vecna agent.
//!
//! Everything here feeds a single [`FatalAction`](vecna_license::FatalAction):
//! - [`TamperMonitor`] runs an ordered list of [`Probe`]s on a fixed tick
//! - [`process_scan`] watches for denylisted tools
//! - [`serve_signal_listener`] accepts breach signals from the browser extension
//! - [`Defense`] reports, purges and raises the [`FatalSignal`]
//!
//! Platform access goes through [`PlatformProbe`] so every detector can be
//! driven by a fake in tests.

mod defense;
mod error;
mod instance;
mod listener;
mod monitor;
mod platform;
mod probes;
pub mod process_scan;

pub use defense::{Defense, FatalSignal};
pub use error::{GuardError, GuardResult};
pub use instance::{INSTANCE_MUTEX_NAME, InstanceGuard, LOCK_FILE_NAME};
pub use listener::{DEFAULT_SIGNAL_PORT, build_router, serve_signal_listener};
pub use monitor::{MonitorHandle, TamperMonitor};
pub use platform::{NativePlatform, PlatformProbe};
pub use probes::{
    ClockProbe, DebuggerProbe, EnvironmentProbe, HIJACK_ENV_VARS, MarkerFileProbe, Probe,
    SelfIntegrityProbe, ShadowingProbe, VM_MAC_PREFIXES, VirtualizationProbe, default_probes,
};
