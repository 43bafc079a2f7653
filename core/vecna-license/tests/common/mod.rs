//! Shared test helpers for license tests.

#![allow(dead_code)]

use async_trait::async_trait;
use std::io::{Cursor, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};
use vecna_license::{
    ClientConfig, ConfigStore, FatalAction, LicenseClient, LicenseSession, Purger, TamperReason,
};
use wiremock::MockServer;

pub const DEVICE: &str = "AA:BB:CC:DD:EE:FF";

/// Records every fatal trigger instead of exiting.
#[derive(Default)]
pub struct RecordingFatal {
    pub reasons: Mutex<Vec<TamperReason>>,
}

impl RecordingFatal {
    pub fn count(&self) -> usize {
        self.reasons.lock().unwrap().len()
    }
}

#[async_trait]
impl FatalAction for RecordingFatal {
    async fn trigger(&self, reason: TamperReason) {
        self.reasons.lock().unwrap().push(reason);
    }
}

/// Counts purge attempts without touching the filesystem.
#[derive(Default)]
pub struct CountingPurger {
    pub calls: AtomicUsize,
}

impl CountingPurger {
    pub fn count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Purger for CountingPurger {
    fn purge(&self, _folder: &Path) -> std::io::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Client config pointed at a mock server.
pub fn config_for(server: &MockServer) -> ClientConfig {
    ClientConfig {
        api_base_url: format!("{}/api/keys", server.uri()),
        settings_url: format!("{}/api/settings", server.uri()),
        heartbeat_timeout_ms: 1_000,
        activation_timeout_ms: 2_000,
        ..Default::default()
    }
}

/// Client config pointed at a port nothing listens on.
pub fn unreachable_config() -> ClientConfig {
    ClientConfig {
        api_base_url: "http://127.0.0.1:9/api/keys".to_string(),
        heartbeat_timeout_ms: 500,
        activation_timeout_ms: 500,
        ..Default::default()
    }
}

pub struct Harness {
    pub session: Arc<LicenseSession>,
    pub fatal: Arc<RecordingFatal>,
    pub purger: Arc<CountingPurger>,
    pub store: ConfigStore,
    pub dir: tempfile::TempDir,
}

pub fn harness(config: ClientConfig) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let store = ConfigStore::new(dir.path().join("config.json"));
    let fatal = Arc::new(RecordingFatal::default());
    let purger = Arc::new(CountingPurger::default());
    let client = Arc::new(LicenseClient::new(config).unwrap());
    let session = Arc::new(LicenseSession::with_purger(
        client,
        store.clone(),
        fatal.clone(),
        purger.clone(),
    ));
    Harness {
        session,
        fatal,
        purger,
        store,
        dir,
    }
}

/// Builds a zip archive from `(name, contents)` pairs.
pub fn zip_archive(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default();
    for (name, contents) in entries {
        zip.start_file(*name, options).unwrap();
        zip.write_all(contents.as_bytes()).unwrap();
    }
    zip.finish().unwrap().into_inner()
}
