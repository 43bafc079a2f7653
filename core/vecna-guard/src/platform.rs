//! Access to the host the agent runs on.

use std::fs;
use std::path::{Path, PathBuf};
use sysinfo::{ProcessesToUpdate, System};
use vecna_license::primary_mac;

/// Everything the probes need to know about the host.
pub trait PlatformProbe: Send + Sync {
    /// A debugger is attached to this process.
    fn debugger_attached(&self) -> bool;

    /// A debugger is attached from another process.
    fn remote_debugger_attached(&self) -> bool;

    /// MAC of the primary network interface.
    fn primary_mac(&self) -> Option<[u8; 6]>;

    fn path_exists(&self, path: &Path) -> bool;

    fn env_var(&self, name: &str) -> Option<String>;

    fn current_dir(&self) -> Option<PathBuf>;

    /// File names directly inside `dir`.
    fn dir_entries(&self, dir: &Path) -> Vec<String>;

    /// Shared libraries mapped into this process, where the OS exposes them.
    fn loaded_library_paths(&self) -> Vec<PathBuf>;

    /// Executable names of all running processes.
    fn process_names(&self) -> Vec<String>;
}

/// Tools that attach to a child they launched.
#[cfg(not(windows))]
const TRACER_NAMES: &[&str] = &["gdb", "lldb", "strace", "ltrace", "rr", "frida"];

/// The real host.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativePlatform;

impl PlatformProbe for NativePlatform {
    fn debugger_attached(&self) -> bool {
        native_debugger_attached()
    }

    fn remote_debugger_attached(&self) -> bool {
        native_remote_debugger_attached()
    }

    fn primary_mac(&self) -> Option<[u8; 6]> {
        primary_mac()
    }

    fn path_exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn env_var(&self, name: &str) -> Option<String> {
        std::env::var_os(name).map(|v| v.to_string_lossy().into_owned())
    }

    fn current_dir(&self) -> Option<PathBuf> {
        std::env::current_dir().ok()
    }

    fn dir_entries(&self, dir: &Path) -> Vec<String> {
        let Ok(entries) = fs::read_dir(dir) else {
            return Vec::new();
        };
        entries
            .filter_map(Result::ok)
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect()
    }

    fn loaded_library_paths(&self) -> Vec<PathBuf> {
        // Linux only; elsewhere the shadowing probe falls back to file names.
        let Ok(maps) = fs::read_to_string("/proc/self/maps") else {
            return Vec::new();
        };
        let mut paths: Vec<PathBuf> = maps
            .lines()
            .filter_map(|line| line.split_whitespace().nth(5))
            .filter(|p| p.starts_with('/'))
            .map(PathBuf::from)
            .collect();
        paths.sort();
        paths.dedup();
        paths
    }

    fn process_names(&self) -> Vec<String> {
        let mut system = System::new();
        system.refresh_processes(ProcessesToUpdate::All, true);
        system
            .processes()
            .values()
            .map(|p| p.name().to_string_lossy().into_owned())
            .collect()
    }
}

#[cfg(target_os = "linux")]
fn native_debugger_attached() -> bool {
    let Ok(status) = fs::read_to_string("/proc/self/status") else {
        return false;
    };
    status
        .lines()
        .find_map(|line| line.strip_prefix("TracerPid:"))
        .and_then(|pid| pid.trim().parse::<u32>().ok())
        .is_some_and(|pid| pid != 0)
}

#[cfg(windows)]
fn native_debugger_attached() -> bool {
    use windows_sys::Win32::System::Diagnostics::Debug::IsDebuggerPresent;

    unsafe { IsDebuggerPresent() != 0 }
}

#[cfg(not(any(target_os = "linux", windows)))]
fn native_debugger_attached() -> bool {
    false
}

#[cfg(windows)]
fn native_remote_debugger_attached() -> bool {
    use windows_sys::Win32::System::Diagnostics::Debug::CheckRemoteDebuggerPresent;
    use windows_sys::Win32::System::Threading::GetCurrentProcess;

    let mut present = 0;
    let ok = unsafe { CheckRemoteDebuggerPresent(GetCurrentProcess(), &mut present) };
    ok != 0 && present != 0
}

/// Checks whether the parent process is a known tracer.
#[cfg(not(windows))]
fn native_remote_debugger_attached() -> bool {
    use sysinfo::Pid;

    let own = Pid::from_u32(std::process::id());
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[own]), true);
    let Some(parent) = system.process(own).and_then(|p| p.parent()) else {
        return false;
    };
    system.refresh_processes(ProcessesToUpdate::Some(&[parent]), true);
    system
        .process(parent)
        .map(|p| p.name().to_string_lossy().to_lowercase())
        .is_some_and(|name| TRACER_NAMES.contains(&name.as_str()))
}
