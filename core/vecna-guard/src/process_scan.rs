//! Denylisted process watch.

use crate::platform::PlatformProbe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info};
use vecna_license::{FatalAction, TamperReason};

/// Time between scans.
pub const DEFAULT_TICK: Duration = Duration::from_secs(2);

/// Debugging, monitoring and reverse-engineering tools.
pub const DENYLIST: &[&str] = &[
    "taskmgr.exe",
    "procexp.exe",
    "procexp64.exe",
    "procmon.exe",
    "procmon64.exe",
    "processhacker.exe",
    "systemexplorer.exe",
    "perfmon.exe",
    "resmon.exe",
    "autoruns.exe",
    "tcpview.exe",
    "wireshark.exe",
    "fiddler.exe",
    "x64dbg.exe",
    "x32dbg.exe",
    "ollydbg.exe",
    "ida.exe",
    "ida64.exe",
    "cheatengine-x86_64.exe",
];

/// Returns the first running process whose name is denylisted.
///
/// Matching is exact and case-insensitive.
pub fn scan(platform: &dyn PlatformProbe) -> Option<String> {
    platform
        .process_names()
        .into_iter()
        .find(|name| DENYLIST.contains(&name.to_lowercase().as_str()))
}

/// Scans every `tick` until a match fires the fatal action or `stop` flips.
pub async fn run(
    platform: Arc<dyn PlatformProbe>,
    fatal: Arc<dyn FatalAction>,
    tick: Duration,
    mut stop: watch::Receiver<bool>,
) {
    info!("Process scan started");
    loop {
        if *stop.borrow() {
            break;
        }

        let scanner = Arc::clone(&platform);
        let hit = tokio::task::spawn_blocking(move || scan(scanner.as_ref()))
            .await
            .unwrap_or_default();
        if let Some(name) = hit {
            error!("Denylisted process running: {}", name);
            fatal.trigger(TamperReason::Process(name)).await;
            return;
        }

        tokio::select! {
            _ = tokio::time::sleep(tick) => {}
            _ = stop.changed() => break,
        }
    }
    debug!("Process scan stopped");
}
