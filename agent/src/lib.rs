//! Wiring for the Vecna agent.
//!
//! [`run`] activates the license, installs the payload when needed and keeps
//! the heartbeat, tamper monitor, process scan and signal listener running
//! until either a shutdown is requested or the defense fires.

use anyhow::{Context, Result};
use std::fs::{self, OpenOptions};
use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use vecna_guard::{
    DEFAULT_SIGNAL_PORT, Defense, PlatformProbe, SelfIntegrityProbe, TamperMonitor,
    default_probes, process_scan, serve_signal_listener,
};
use vecna_license::{
    APP_VERSION, ActivationError, ActivationOutcome, CONFIG_FILE_NAME, ClientConfig, ConfigStore,
    DeviceId, HeartbeatScheduler, LicenseClient, LicenseError, LicenseSession, TamperReason,
};

/// File the crash record is appended to.
pub const CRASH_LOG_NAME: &str = "crash_log.txt";

/// Everything [`run`] needs.
#[derive(Debug, Clone)]
pub struct AgentOptions {
    pub config: ClientConfig,
    /// Directory holding the persisted snapshot and lock file.
    pub config_dir: PathBuf,
    /// Key given on the command line; falls back to the stored key.
    pub license_key: Option<String>,
    /// Payload archive to install if none is present.
    pub install_archive: Option<PathBuf>,
    /// Parent folder for the payload. Defaults to `config_dir`.
    pub install_dir: Option<PathBuf>,
    /// Overrides the detected device identifier.
    pub device_id: Option<String>,
    pub signal_port: u16,
    /// File watched by the self-integrity probe.
    pub integrity_file: Option<PathBuf>,
    pub monitor_tick: Duration,
    pub scan_tick: Duration,
}

impl AgentOptions {
    pub fn new(config: ClientConfig, config_dir: impl Into<PathBuf>) -> Self {
        Self {
            config,
            config_dir: config_dir.into(),
            license_key: None,
            install_archive: None,
            install_dir: None,
            device_id: None,
            signal_port: DEFAULT_SIGNAL_PORT,
            integrity_file: None,
            monitor_tick: Duration::from_secs(10),
            scan_tick: process_scan::DEFAULT_TICK,
        }
    }

    fn store(&self) -> ConfigStore {
        ConfigStore::new(self.config_dir.join(CONFIG_FILE_NAME))
    }
}

/// How the agent ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentExit {
    /// Shutdown was requested; the offline notice was sent.
    Shutdown,
    /// Activation failed without tampering.
    NotActivated(ActivationError),
    /// The defense fired. The process must exit non-zero.
    Fatal(TamperReason),
}

impl AgentExit {
    /// Process exit status for this outcome.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Shutdown => 0,
            Self::NotActivated(_) => 2,
            Self::Fatal(_) => 1,
        }
    }
}

/// Runs the agent until `shutdown` resolves or the defense fires.
pub async fn run(
    options: AgentOptions,
    platform: Arc<dyn PlatformProbe>,
    shutdown: impl Future<Output = ()>,
) -> Result<AgentExit> {
    let store = options.store();
    let client = Arc::new(
        LicenseClient::new(options.config.clone()).context("failed to build HTTP client")?,
    );
    let device_id = match &options.device_id {
        Some(id) => DeviceId::from_string(id.clone()),
        None => DeviceId::current(),
    };
    info!("Vecna agent {} on device {}", APP_VERSION, device_id);

    check_for_updates(&client).await;

    let defense = Arc::new(Defense::new(
        Arc::clone(&client),
        store.clone(),
        device_id.as_str(),
    ));
    let mut fatal_signal = defense.signal();
    let session = Arc::new(LicenseSession::new(
        client,
        store.clone(),
        defense.clone(),
    ));

    let snapshot = store.load();
    let Some(key) = options
        .license_key
        .clone()
        .or_else(|| snapshot.license_key.clone())
    else {
        anyhow::bail!("no license key given and none stored");
    };
    if options.license_key.is_none() && snapshot.existing_install_folder().is_some() {
        info!("Resuming stored license");
    }

    let outcome = match session.activate(&key, device_id.as_str()).await {
        Ok(outcome) => outcome,
        Err(ActivationError::TamperDetected) => {
            return Ok(AgentExit::Fatal(fatal_signal.wait().await));
        }
        Err(e) => {
            warn!("Activation failed: {}", e);
            return Ok(AgentExit::NotActivated(e));
        }
    };

    if outcome == ActivationOutcome::NeedsInstall {
        match &options.install_archive {
            Some(archive) => {
                let bytes = tokio::fs::read(archive)
                    .await
                    .with_context(|| format!("failed to read payload archive {archive:?}"))?;
                let parent = options.install_dir.as_deref().unwrap_or(&options.config_dir);
                match session.install(&bytes, parent).await {
                    Ok(_) => {}
                    Err(LicenseError::IntegrityMismatch) => {
                        return Ok(AgentExit::Fatal(fatal_signal.wait().await));
                    }
                    Err(e) => return Err(e).context("payload install failed"),
                }
            }
            None => warn!("No payload installed; pass an archive to install one"),
        }
    }

    let heartbeat =
        HeartbeatScheduler::new(Arc::clone(&session), options.config.heartbeat_interval()).spawn();

    let integrity = match &options.integrity_file {
        Some(path) => SelfIntegrityProbe::watching(path),
        None => SelfIntegrityProbe::inert(),
    };
    let monitor = TamperMonitor::new(
        Arc::clone(&platform),
        default_probes(Arc::clone(&session), integrity),
        defense.clone(),
    )
    .with_tick(options.monitor_tick)
    .spawn();

    let (stop_tx, stop_rx) = watch::channel(false);
    let scan = tokio::spawn(process_scan::run(
        Arc::clone(&platform),
        defense.clone(),
        options.scan_tick,
        stop_rx.clone(),
    ));
    let listener_fatal = defense.clone();
    let port = options.signal_port;
    let listener = tokio::spawn(async move {
        // The agent keeps running without the listener.
        if let Err(e) = serve_signal_listener(port, listener_fatal, stop_rx).await {
            warn!("Signal listener unavailable: {}", e);
        }
    });

    tokio::select! {
        () = shutdown => {
            info!("Shutting down");
            stop_tx.send_replace(true);
            monitor.stop().await;
            let _ = scan.await;
            let _ = listener.await;
            heartbeat.stop().await;
            session.stop();
            Ok(AgentExit::Shutdown)
        }
        reason = fatal_signal.wait() => {
            error!("Defense fired: {}", reason);
            Ok(AgentExit::Fatal(reason))
        }
    }
}

async fn check_for_updates(client: &LicenseClient) {
    match client.check_for_updates(APP_VERSION).await {
        Ok(Some(update)) => info!(
            "Update available: {} ({})",
            update.latest_version, update.update_url
        ),
        Ok(None) => debug!("Agent is up to date"),
        Err(e) => debug!("Update check failed: {}", e),
    }
}

/// Appends a timestamped crash record to `dir/crash_log.txt`.
pub fn write_crash_record(dir: &Path, message: &str) -> std::io::Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = dir.join(CRASH_LOG_NAME);
    let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
    writeln!(file, "[{}] {}", chrono::Utc::now().to_rfc3339(), message)?;
    Ok(path)
}
