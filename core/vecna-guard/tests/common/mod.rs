//! Shared test helpers for guard tests.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use vecna_guard::PlatformProbe;
use vecna_license::{FatalAction, TamperReason};

/// A scripted host.
#[derive(Default)]
pub struct FakePlatform {
    pub debugger: bool,
    pub remote_debugger: bool,
    pub mac: Option<[u8; 6]>,
    pub existing_paths: Vec<PathBuf>,
    pub env: HashMap<String, String>,
    pub cwd: Option<PathBuf>,
    pub cwd_entries: Vec<String>,
    pub libraries: Vec<PathBuf>,
    pub processes: Vec<String>,
    pub debugger_checks: AtomicUsize,
}

impl FakePlatform {
    pub fn clean() -> Self {
        Self {
            mac: Some([0x3C, 0x22, 0xFB, 0x01, 0x02, 0x03]),
            cwd: Some(PathBuf::from("/home/user/work")),
            processes: vec!["explorer.exe".into(), "chrome.exe".into()],
            ..Default::default()
        }
    }

    pub fn debugger_checks(&self) -> usize {
        self.debugger_checks.load(Ordering::SeqCst)
    }
}

impl PlatformProbe for FakePlatform {
    fn debugger_attached(&self) -> bool {
        self.debugger_checks.fetch_add(1, Ordering::SeqCst);
        self.debugger
    }

    fn remote_debugger_attached(&self) -> bool {
        self.remote_debugger
    }

    fn primary_mac(&self) -> Option<[u8; 6]> {
        self.mac
    }

    fn path_exists(&self, path: &Path) -> bool {
        self.existing_paths.iter().any(|p| p == path)
    }

    fn env_var(&self, name: &str) -> Option<String> {
        self.env.get(name).cloned()
    }

    fn current_dir(&self) -> Option<PathBuf> {
        self.cwd.clone()
    }

    fn dir_entries(&self, _dir: &Path) -> Vec<String> {
        self.cwd_entries.clone()
    }

    fn loaded_library_paths(&self) -> Vec<PathBuf> {
        self.libraries.clone()
    }

    fn process_names(&self) -> Vec<String> {
        self.processes.clone()
    }
}

/// Records every fatal trigger instead of exiting.
#[derive(Default)]
pub struct RecordingFatal {
    pub reasons: Mutex<Vec<TamperReason>>,
}

impl RecordingFatal {
    pub fn count(&self) -> usize {
        self.reasons.lock().unwrap().len()
    }

    pub fn reasons(&self) -> Vec<TamperReason> {
        self.reasons.lock().unwrap().clone()
    }
}

#[async_trait]
impl FatalAction for RecordingFatal {
    async fn trigger(&self, reason: TamperReason) {
        self.reasons.lock().unwrap().push(reason);
    }
}
