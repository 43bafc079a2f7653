//! Periodic tamper sweep.
//!
//! Probes run in order on every tick. The first positive fires the fatal
//! action and the monitor stops for good; later ticks never evaluate again.

use crate::platform::PlatformProbe;
use crate::probes::Probe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use vecna_license::{FatalAction, TamperReason};

/// Default time between sweeps.
pub const DEFAULT_TICK: Duration = Duration::from_secs(10);

/// Runs probes against a platform.
pub struct TamperMonitor {
    platform: Arc<dyn PlatformProbe>,
    probes: Vec<Box<dyn Probe>>,
    fatal: Arc<dyn FatalAction>,
    tick: Duration,
    triggered: bool,
}

impl TamperMonitor {
    pub fn new(
        platform: Arc<dyn PlatformProbe>,
        probes: Vec<Box<dyn Probe>>,
        fatal: Arc<dyn FatalAction>,
    ) -> Self {
        Self {
            platform,
            probes,
            fatal,
            tick: DEFAULT_TICK,
            triggered: false,
        }
    }

    /// Overrides the sweep interval.
    #[must_use]
    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// Returns true once a probe has fired.
    #[must_use]
    pub fn is_triggered(&self) -> bool {
        self.triggered
    }

    /// Runs every probe once. Returns the name of the first that fired.
    pub async fn sweep(&mut self) -> Option<&'static str> {
        if self.triggered {
            return None;
        }

        let platform = self.platform.as_ref();
        let hit = self
            .probes
            .iter_mut()
            .find_map(|probe| probe.detect(platform).then(|| probe.name()))?;

        self.triggered = true;
        error!("Tamper probe fired: {}", hit);
        self.fatal.trigger(TamperReason::Probe(hit)).await;
        Some(hit)
    }

    /// Sweeps until a probe fires or `stop` flips.
    pub async fn run(mut self, mut stop: watch::Receiver<bool>) {
        info!("Tamper monitor started ({} probes)", self.probes.len());
        loop {
            if *stop.borrow() {
                break;
            }
            if self.sweep().await.is_some() {
                return;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.tick) => {}
                _ = stop.changed() => break,
            }
        }
        debug!("Tamper monitor stopped");
    }

    /// Starts the monitor on the current runtime.
    pub fn spawn(self) -> MonitorHandle {
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(self.run(stop_rx));
        MonitorHandle {
            stop: stop_tx,
            task,
        }
    }
}

/// Controls a running monitor.
pub struct MonitorHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub async fn stop(self) {
        self.stop.send_replace(true);
        let _ = self.task.await;
    }
}
