//! Single-instance guard.
//!
//! Windows uses a named mutex. Elsewhere a lock file holding the owner's PID
//! is hard-linked into place, so it never exists without its PID. A lock left
//! behind by a dead process is reclaimed.

use crate::error::{GuardError, GuardResult};
use std::path::Path;
use tracing::debug;

/// Name of the Windows mutex.
pub const INSTANCE_MUTEX_NAME: &str = r"Global\VecnaAgentSingleInstance";

/// Name of the lock file on other platforms.
pub const LOCK_FILE_NAME: &str = "vecna-agent.lock";

/// Held for the lifetime of the process. Dropping it releases the lock.
#[derive(Debug)]
pub struct InstanceGuard {
    _lock: imp::Lock,
}

impl InstanceGuard {
    /// Claims the single-instance lock. `lock_dir` holds the lock file where
    /// one is used.
    pub fn acquire(lock_dir: &Path) -> GuardResult<Self> {
        let inner = imp::Lock::acquire(lock_dir)?;
        debug!("Single-instance lock acquired");
        Ok(Self { _lock: inner })
    }
}

#[cfg(windows)]
mod imp {
    use super::{GuardError, GuardResult, INSTANCE_MUTEX_NAME};
    use std::path::Path;
    use windows_sys::Win32::Foundation::{CloseHandle, ERROR_ALREADY_EXISTS, GetLastError, HANDLE};
    use windows_sys::Win32::System::Threading::CreateMutexW;

    #[derive(Debug)]
    pub struct Lock {
        handle: HANDLE,
    }

    // The handle is only closed on drop.
    unsafe impl Send for Lock {}
    unsafe impl Sync for Lock {}

    impl Lock {
        pub fn acquire(_lock_dir: &Path) -> GuardResult<Self> {
            let name: Vec<u16> = INSTANCE_MUTEX_NAME.encode_utf16().chain(Some(0)).collect();
            let handle = unsafe { CreateMutexW(std::ptr::null(), 0, name.as_ptr()) };
            if handle.is_null() {
                return Err(GuardError::Io(std::io::Error::last_os_error()));
            }
            if unsafe { GetLastError() } == ERROR_ALREADY_EXISTS {
                unsafe { CloseHandle(handle) };
                return Err(GuardError::AlreadyRunning);
            }
            Ok(Self { handle })
        }
    }

    impl Drop for Lock {
        fn drop(&mut self) {
            unsafe { CloseHandle(self.handle) };
        }
    }
}

#[cfg(not(windows))]
mod imp {
    use super::{GuardError, GuardResult, LOCK_FILE_NAME};
    use std::fs;
    use std::io::ErrorKind;
    use std::path::{Path, PathBuf};
    use std::time::Duration;
    use sysinfo::{Pid, ProcessesToUpdate, System};
    use tracing::{debug, warn};

    /// A garbled lock younger than this is treated as held.
    const STALE_GRACE: Duration = Duration::from_secs(5);

    #[derive(Debug)]
    pub struct Lock {
        path: PathBuf,
    }

    impl Lock {
        pub fn acquire(lock_dir: &Path) -> GuardResult<Self> {
            fs::create_dir_all(lock_dir)?;
            let path = lock_dir.join(LOCK_FILE_NAME);

            // The lock appears with its PID already written.
            let pid = std::process::id();
            let staging = lock_dir.join(format!("{LOCK_FILE_NAME}.{pid}.tmp"));
            fs::write(&staging, pid.to_string())?;
            let linked = link_into_place(&staging, &path);
            if let Err(e) = fs::remove_file(&staging) {
                debug!("Staging lock removal failed: {}", e);
            }
            linked?;
            Ok(Self { path })
        }
    }

    impl Drop for Lock {
        fn drop(&mut self) {
            if let Err(e) = fs::remove_file(&self.path) {
                debug!("Lock file removal failed: {}", e);
            }
        }
    }

    fn link_into_place(staging: &Path, path: &Path) -> GuardResult<()> {
        // Two attempts: the second follows reclaiming a stale lock.
        for _ in 0..2 {
            match fs::hard_link(staging, path) {
                Ok(()) => return Ok(()),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if owner_alive(path) {
                        return Err(GuardError::AlreadyRunning);
                    }
                    warn!("Reclaiming stale lock {:?}", path);
                    match fs::remove_file(path) {
                        Ok(()) => {}
                        Err(e) if e.kind() == ErrorKind::NotFound => {}
                        Err(e) => return Err(e.into()),
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(GuardError::AlreadyRunning)
    }

    fn owner_alive(path: &Path) -> bool {
        let pid = match fs::read_to_string(path) {
            Ok(content) => content.trim().parse::<u32>().ok(),
            Err(e) if e.kind() == ErrorKind::NotFound => return false,
            Err(_) => None,
        };
        let Some(pid) = pid else {
            return recently_written(path);
        };
        if pid == std::process::id() {
            return true;
        }

        let pid = Pid::from_u32(pid);
        let mut system = System::new();
        system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        system.process(pid).is_some()
    }

    /// Modification times in the future count as recent.
    fn recently_written(path: &Path) -> bool {
        match fs::metadata(path).and_then(|m| m.modified()) {
            Ok(modified) => modified.elapsed().map_or(true, |age| age < STALE_GRACE),
            Err(_) => false,
        }
    }
}
