//! Periodic heartbeat.
//!
//! One background task per active session. Each tick sends a heartbeat and
//! publishes a [`HeartbeatRecord`]. Stopping wakes the task immediately and
//! it sends exactly one offline notice before exiting. A killed session ends
//! the loop without the offline notice.

use crate::session::{LicenseSession, SessionState};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// How a heartbeat went.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatOutcome {
    Ok,
    NetworkError,
    Killed,
}

/// One sent heartbeat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatRecord {
    pub sequence: u64,
    pub sent_at: DateTime<Utc>,
    pub outcome: HeartbeatOutcome,
}

/// Why the scheduler exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerExit {
    /// Stop was requested; the offline notice was attempted.
    Stopped,
    /// The session left `Active` on its own.
    SessionEnded,
}

/// Spawns heartbeat tasks.
pub struct HeartbeatScheduler {
    session: Arc<LicenseSession>,
    interval: Duration,
}

impl HeartbeatScheduler {
    pub fn new(session: Arc<LicenseSession>, interval: Duration) -> Self {
        Self { session, interval }
    }

    /// Starts the loop on the current runtime.
    pub fn spawn(self) -> HeartbeatHandle {
        let (stop_tx, stop_rx) = watch::channel(false);
        let (record_tx, record_rx) = watch::channel(None);
        let counter = Arc::new(AtomicU64::new(0));

        let task = tokio::spawn(run(
            self.session,
            self.interval,
            Arc::clone(&counter),
            record_tx,
            stop_rx,
        ));

        HeartbeatHandle {
            stop: stop_tx,
            counter,
            records: record_rx,
            task,
        }
    }
}

async fn run(
    session: Arc<LicenseSession>,
    interval: Duration,
    counter: Arc<AtomicU64>,
    records: watch::Sender<Option<HeartbeatRecord>>,
    mut stop: watch::Receiver<bool>,
) -> SchedulerExit {
    info!("Heartbeat started (every {:?})", interval);

    loop {
        if !session.is_active() {
            debug!("Heartbeat loop ending: session is {:?}", session.state());
            return SchedulerExit::SessionEnded;
        }
        if *stop.borrow() {
            break;
        }

        let ok = session.send_heartbeat(false).await;
        let sequence = counter.fetch_add(1, Ordering::SeqCst) + 1;
        let outcome = if session.state() == SessionState::Killed {
            HeartbeatOutcome::Killed
        } else if ok {
            HeartbeatOutcome::Ok
        } else {
            HeartbeatOutcome::NetworkError
        };
        debug!("Heartbeat #{} {:?}", sequence, outcome);
        records.send_replace(Some(HeartbeatRecord {
            sequence,
            sent_at: Utc::now(),
            outcome,
        }));

        if outcome == HeartbeatOutcome::Killed {
            return SchedulerExit::SessionEnded;
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            // A dropped handle counts as a stop request.
            _ = stop.changed() => break,
        }
    }

    info!("Heartbeat stopping, sending offline notice");
    if !session.send_heartbeat(true).await {
        debug!("Offline notice was not delivered");
    }
    SchedulerExit::Stopped
}

/// Controls a running heartbeat task.
pub struct HeartbeatHandle {
    stop: watch::Sender<bool>,
    counter: Arc<AtomicU64>,
    records: watch::Receiver<Option<HeartbeatRecord>>,
    task: JoinHandle<SchedulerExit>,
}

impl HeartbeatHandle {
    /// Number of heartbeats sent so far.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.counter.load(Ordering::SeqCst)
    }

    /// Subscribes to the latest heartbeat record.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Option<HeartbeatRecord>> {
        self.records.clone()
    }

    /// Returns true once the task has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Requests a stop and waits for the offline notice to go out.
    pub async fn stop(self) -> SchedulerExit {
        self.stop.send_replace(true);
        self.task.await.unwrap_or(SchedulerExit::Stopped)
    }
}
