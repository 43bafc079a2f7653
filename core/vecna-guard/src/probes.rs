//! Individual tamper detectors.
//!
//! Each probe answers one question about the host. Probes keep whatever
//! baseline they need between ticks, so `detect` takes `&mut self`.

use crate::platform::PlatformProbe;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, warn};
use vecna_license::{LicenseSession, format_mac, marker_path};

/// MAC prefixes assigned to common hypervisor vendors.
pub const VM_MAC_PREFIXES: &[&str] = &[
    "00:05:69", // VMware
    "00:0C:29", // VMware
    "00:1C:14", // VMware
    "00:50:56", // VMware
    "08:00:27", // VirtualBox
    "00:15:5D", // Hyper-V
];

/// Guest drivers and services left by hypervisor tooling.
const HYPERVISOR_FILES: &[&str] = &[
    r"C:\windows\system32\drivers\vboxguest.sys",
    r"C:\windows\system32\drivers\vmhgfs.sys",
    r"C:\windows\system32\vboxservice.exe",
    "/usr/bin/VBoxService",
    "/usr/bin/vmtoolsd",
];

/// Variables that inject code into the loader or runtime.
pub const HIJACK_ENV_VARS: &[&str] = &[
    "LD_PRELOAD",
    "LD_AUDIT",
    "DYLD_INSERT_LIBRARIES",
    "COR_ENABLE_PROFILING",
    "CORECLR_ENABLE_PROFILING",
];

/// System libraries that must never be picked up from the working directory.
const CORE_LIBRARY_NAMES: &[&str] = &[
    "version.dll",
    "winhttp.dll",
    "iphlpapi.dll",
    "dbghelp.dll",
    "bcrypt.dll",
    "crypt32.dll",
    "ws2_32.dll",
    "userenv.dll",
    "libc.so.6",
    "libpthread.so.0",
    "libssl.so.3",
    "libcrypto.so.3",
];

/// Wall clock and monotonic clock may diverge by this much per check.
const MAX_CLOCK_DRIFT: Duration = Duration::from_secs(60);

/// A single tamper check.
pub trait Probe: Send {
    /// Short name used in logs and tamper reports.
    fn name(&self) -> &'static str;

    /// Returns true if tampering was detected.
    fn detect(&mut self, platform: &dyn PlatformProbe) -> bool;
}

/// Local or remote debugger.
#[derive(Debug, Default)]
pub struct DebuggerProbe;

impl Probe for DebuggerProbe {
    fn name(&self) -> &'static str {
        "debugger"
    }

    fn detect(&mut self, platform: &dyn PlatformProbe) -> bool {
        if platform.debugger_attached() {
            warn!("Debugger attached");
            return true;
        }
        if platform.remote_debugger_attached() {
            warn!("Remote debugger attached");
            return true;
        }
        false
    }
}

/// Hypervisor MAC prefixes and guest tooling files.
#[derive(Debug, Default)]
pub struct VirtualizationProbe;

impl Probe for VirtualizationProbe {
    fn name(&self) -> &'static str {
        "virtualization"
    }

    fn detect(&mut self, platform: &dyn PlatformProbe) -> bool {
        if let Some(mac) = platform.primary_mac() {
            let mac = format_mac(&mac);
            if let Some(prefix) = VM_MAC_PREFIXES.iter().find(|p| mac.starts_with(**p)) {
                warn!("Hypervisor MAC prefix {}", prefix);
                return true;
            }
        }

        if let Some(file) = HYPERVISOR_FILES
            .iter()
            .find(|f| platform.path_exists(Path::new(f)))
        {
            warn!("Hypervisor file present: {}", file);
            return true;
        }
        false
    }
}

/// Loader and runtime injection variables.
#[derive(Debug, Default)]
pub struct EnvironmentProbe;

impl Probe for EnvironmentProbe {
    fn name(&self) -> &'static str {
        "environment"
    }

    fn detect(&mut self, platform: &dyn PlatformProbe) -> bool {
        for var in HIJACK_ENV_VARS {
            if platform.env_var(var).is_some_and(|v| !v.is_empty()) {
                warn!("Injection variable set: {}", var);
                return true;
            }
        }
        false
    }
}

/// Core libraries shadowed from the working directory.
#[derive(Debug, Default)]
pub struct ShadowingProbe;

impl Probe for ShadowingProbe {
    fn name(&self) -> &'static str {
        "shadowing"
    }

    fn detect(&mut self, platform: &dyn PlatformProbe) -> bool {
        let Some(cwd) = platform.current_dir() else {
            return false;
        };

        if let Some(lib) = platform
            .loaded_library_paths()
            .into_iter()
            .find(|p| p.starts_with(&cwd) && is_core_library(p))
        {
            warn!("Library loaded from working directory: {:?}", lib);
            return true;
        }

        if let Some(name) = platform
            .dir_entries(&cwd)
            .into_iter()
            .find(|n| is_core_library_name(n))
        {
            warn!("Shadow library in working directory: {}", name);
            return true;
        }
        false
    }
}

fn is_core_library_name(name: &str) -> bool {
    CORE_LIBRARY_NAMES.contains(&name.to_lowercase().as_str())
}

/// Only core libraries count. The executable and its own modules may live in
/// the working directory.
fn is_core_library(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(is_core_library_name)
}

/// Divergence between the wall clock and the monotonic clock.
#[derive(Debug)]
pub struct ClockProbe {
    last: Option<(SystemTime, Instant)>,
}

impl Default for ClockProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl ClockProbe {
    pub fn new() -> Self {
        Self { last: None }
    }

    /// Compares this observation against the previous one and stores it.
    ///
    /// The first observation only sets the baseline.
    pub fn observe(&mut self, wall: SystemTime, mono: Instant) -> bool {
        let Some((last_wall, last_mono)) = self.last.replace((wall, mono)) else {
            return false;
        };

        let mono_elapsed = mono.saturating_duration_since(last_mono);
        let drift = match wall.duration_since(last_wall) {
            Ok(wall_elapsed) => wall_elapsed.abs_diff(mono_elapsed),
            // Wall clock went backwards.
            Err(e) => e.duration() + mono_elapsed,
        };

        if drift > MAX_CLOCK_DRIFT {
            warn!("Clock drift of {:?} since last check", drift);
            return true;
        }
        false
    }
}

impl Probe for ClockProbe {
    fn name(&self) -> &'static str {
        "clock"
    }

    fn detect(&mut self, _platform: &dyn PlatformProbe) -> bool {
        self.observe(SystemTime::now(), Instant::now())
    }
}

/// On-disk hash of a watched file against its startup baseline.
///
/// Compiled builds have nothing interpretable to watch, so the probe is inert
/// unless a file is given.
#[derive(Debug, Default)]
pub struct SelfIntegrityProbe {
    watched: Option<(PathBuf, String)>,
}

impl SelfIntegrityProbe {
    /// A probe that never fires.
    pub fn inert() -> Self {
        Self::default()
    }

    /// Watches `path`. Stays inert if the file cannot be read now.
    pub fn watching(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        match hash_file(&path) {
            Some(baseline) => Self {
                watched: Some((path, baseline)),
            },
            None => {
                debug!("Integrity baseline unavailable for {:?}", path);
                Self::inert()
            }
        }
    }

    pub fn is_inert(&self) -> bool {
        self.watched.is_none()
    }
}

impl Probe for SelfIntegrityProbe {
    fn name(&self) -> &'static str {
        "self-integrity"
    }

    fn detect(&mut self, _platform: &dyn PlatformProbe) -> bool {
        let Some((path, baseline)) = &self.watched else {
            return false;
        };
        // An unreadable file is not evidence of modification.
        match hash_file(path) {
            Some(current) if current != *baseline => {
                warn!("{:?} changed on disk", path);
                true
            }
            _ => false,
        }
    }
}

fn hash_file(path: &Path) -> Option<String> {
    fs::read(path).ok().map(|data| hex::encode(Sha256::digest(data)))
}

/// Install folder present but its marker file gone.
pub struct MarkerFileProbe {
    session: Arc<LicenseSession>,
}

impl MarkerFileProbe {
    pub fn new(session: Arc<LicenseSession>) -> Self {
        Self { session }
    }
}

impl Probe for MarkerFileProbe {
    fn name(&self) -> &'static str {
        "marker-file"
    }

    fn detect(&mut self, platform: &dyn PlatformProbe) -> bool {
        let Some(folder) = self.session.install_path() else {
            return false;
        };
        if platform.path_exists(&folder) && !platform.path_exists(&marker_path(&folder)) {
            warn!("Marker file missing from {:?}", folder);
            return true;
        }
        false
    }
}

/// The standard probe order.
pub fn default_probes(
    session: Arc<LicenseSession>,
    integrity: SelfIntegrityProbe,
) -> Vec<Box<dyn Probe>> {
    vec![
        Box::new(DebuggerProbe),
        Box::new(VirtualizationProbe),
        Box::new(EnvironmentProbe),
        Box::new(ShadowingProbe),
        Box::new(ClockProbe::new()),
        Box::new(integrity),
        Box::new(MarkerFileProbe::new(session)),
    ]
}
