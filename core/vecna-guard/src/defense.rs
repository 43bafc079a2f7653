//! The terminal defense action.
//!
//! Fires at most once per process. Each step is best-effort: a failed report
//! never prevents the purge, and a failed purge never prevents the fatal
//! signal. Process exit is left to whoever waits on [`FatalSignal`].

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;
use tracing::{error, info, warn};
use vecna_license::{ConfigStore, FatalAction, FsPurger, LicenseClient, Purger, TamperReason};

/// Reports, purges and raises the fatal signal.
pub struct Defense {
    client: Arc<LicenseClient>,
    store: ConfigStore,
    device_id: String,
    purger: Arc<dyn Purger>,
    fired: AtomicBool,
    signal: watch::Sender<Option<TamperReason>>,
}

impl Defense {
    pub fn new(client: Arc<LicenseClient>, store: ConfigStore, device_id: impl Into<String>) -> Self {
        Self::with_purger(client, store, device_id, Arc::new(FsPurger))
    }

    pub fn with_purger(
        client: Arc<LicenseClient>,
        store: ConfigStore,
        device_id: impl Into<String>,
        purger: Arc<dyn Purger>,
    ) -> Self {
        let (signal, _) = watch::channel(None);
        Self {
            client,
            store,
            device_id: device_id.into(),
            purger,
            fired: AtomicBool::new(false),
            signal,
        }
    }

    /// Returns true once the defense has run.
    #[must_use]
    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    /// A receiver for the fatal signal.
    #[must_use]
    pub fn signal(&self) -> FatalSignal {
        FatalSignal {
            rx: self.signal.subscribe(),
        }
    }
}

#[async_trait]
impl FatalAction for Defense {
    async fn trigger(&self, reason: TamperReason) {
        if self.fired.swap(true, Ordering::SeqCst) {
            return;
        }
        error!("Tamper detected ({}), initiating defense", reason);

        let snapshot = self.store.load();

        if let Some(key) = snapshot.license_key.as_deref() {
            let reason_text = reason.to_string();
            if let Err(e) = self
                .client
                .report_tamper(key, &self.device_id, &reason_text)
                .await
            {
                warn!("Tamper report failed: {}", e);
            }
        }

        if let Some(folder) = snapshot.install_folder.as_deref() {
            match self.purger.purge(folder) {
                Ok(()) => info!("Purged {:?}", folder),
                Err(e) => error!("Purge of {:?} failed: {}", folder, e),
            }
        }

        self.signal.send_replace(Some(reason));
    }
}

/// Resolves once the defense has fired.
#[derive(Clone)]
pub struct FatalSignal {
    rx: watch::Receiver<Option<TamperReason>>,
}

impl FatalSignal {
    /// Waits for the defense to finish and returns why it fired.
    ///
    /// Never resolves if the [`Defense`] is dropped without firing.
    pub async fn wait(&mut self) -> TamperReason {
        let fired = match self.rx.wait_for(Option::is_some).await {
            Ok(reason) => reason.clone(),
            Err(_) => None,
        };
        match fired {
            Some(reason) => reason,
            None => std::future::pending().await,
        }
    }
}
