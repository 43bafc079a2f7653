//! Removal of the installed payload.

use std::fs;
use std::io;
use std::path::Path;
use tracing::{info, warn};

/// Deletes an install folder.
pub trait Purger: Send + Sync {
    fn purge(&self, folder: &Path) -> io::Result<()>;
}

/// Deletes from the local filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsPurger;

impl Purger for FsPurger {
    fn purge(&self, folder: &Path) -> io::Result<()> {
        purge_folder(folder)
    }
}

/// Recursively deletes `folder`, clearing attributes that would block it.
///
/// A missing folder is not an error.
pub fn purge_folder(folder: &Path) -> io::Result<()> {
    if !folder.exists() {
        return Ok(());
    }

    if let Err(e) = clear_attributes(folder) {
        warn!("Could not clear attributes under {:?}: {}", folder, e);
    }

    fs::remove_dir_all(folder)?;
    info!("Deleted {:?}", folder);
    Ok(())
}

/// Walks `path` and makes every entry writable.
fn clear_attributes(path: &Path) -> io::Result<()> {
    let meta = fs::symlink_metadata(path)?;
    if meta.file_type().is_symlink() {
        return Ok(());
    }

    if meta.is_dir() {
        for entry in fs::read_dir(path)? {
            clear_attributes(&entry?.path())?;
        }
    }

    make_writable(path, &meta)
}

#[cfg(windows)]
fn make_writable(path: &Path, _meta: &fs::Metadata) -> io::Result<()> {
    use std::os::windows::ffi::OsStrExt;
    use windows_sys::Win32::Storage::FileSystem::{FILE_ATTRIBUTE_NORMAL, SetFileAttributesW};

    let wide: Vec<u16> = path.as_os_str().encode_wide().chain(Some(0)).collect();
    // Drops read-only, hidden and system at once.
    let ok = unsafe { SetFileAttributesW(wide.as_ptr(), FILE_ATTRIBUTE_NORMAL) };
    if ok == 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(windows))]
fn make_writable(path: &Path, meta: &fs::Metadata) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mut perms = meta.permissions();
    let mode = perms.mode();
    let wanted = if meta.is_dir() { mode | 0o700 } else { mode | 0o600 };
    if wanted != mode {
        perms.set_mode(wanted);
        fs::set_permissions(path, perms)?;
    }
    Ok(())
}
