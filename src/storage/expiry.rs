//! Background Expiry Sweeper
//!
//! Every repository query hides expired keys ("lazy expiry"), but the rows
//! stay in the table until something deletes them. A key that expires and
//! is never written again would stay there forever. The sweeper is the
//! "active expiry" half: a Tokio task that periodically deletes expired
//! rows in bounded batches.
//!
//! ## Design
//!
//! The sweeper:
//! 1. Sleeps for a configurable interval (default: 60s)
//! 2. Deletes up to `batch_size` expired keys in one short transaction
//! 3. Repeats step 2 while batches come back full
//! 4. Logs how many keys it removed
//!
//! Each batch competes with client transactions for the single database
//! connection, so the batch size bounds how long clients can be held up.

use super::keys::KeyDb;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Configuration for the expiry sweeper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpiryConfig {
    /// Interval between sweeps (default: 60s)
    pub interval: Duration,

    /// Maximum keys deleted per transaction (default: 1000, 0 = unbounded)
    pub batch_size: usize,
}

impl Default for ExpiryConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            batch_size: 1000,
        }
    }
}

impl ExpiryConfig {
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }
}

/// A handle to the running expiry sweeper.
///
/// When this handle is dropped, the sweeper task will be signalled to stop.
/// Use [`shutdown`](Self::shutdown) to also wait for it to finish.
#[derive(Debug)]
pub struct ExpirySweeper {
    /// Sender to signal shutdown
    shutdown_tx: watch::Sender<bool>,

    task: Option<JoinHandle<()>>,
}

impl ExpirySweeper {
    /// Starts the expiry sweeper as a background task.
    pub fn start(keys: KeyDb, config: ExpiryConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        info!(
            interval_ms = config.interval.as_millis() as u64,
            batch_size = config.batch_size,
            "Background expiry sweeper started"
        );
        let task = tokio::spawn(sweeper_loop(keys, config, shutdown_rx));

        Self {
            shutdown_tx,
            task: Some(task),
        }
    }

    /// Signals the sweeper to stop without waiting for it.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Stops the sweeper and waits for an in-flight sweep to finish.
    pub async fn shutdown(mut self) {
        self.stop();
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                warn!(error = %err, "Expiry sweeper task failed");
            }
        }
        info!("Background expiry sweeper stopped");
    }
}

impl Drop for ExpirySweeper {
    fn drop(&mut self) {
        self.stop();
    }
}

/// The main sweeper loop.
async fn sweeper_loop(keys: KeyDb, config: ExpiryConfig, mut shutdown_rx: watch::Receiver<bool>) {
    loop {
        // Wait for the interval or shutdown signal
        tokio::select! {
            _ = tokio::time::sleep(config.interval) => {}
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    debug!("Expiry sweeper received shutdown signal");
                    return;
                }
            }
        }

        match sweep(&keys, config.batch_size).await {
            Ok(0) => trace!("No expired keys"),
            Ok(deleted) => debug!(deleted, "Expired keys cleaned up"),
            Err(err) => warn!(error = %err, "Expiry sweep failed, retrying next interval"),
        }
    }
}

/// Deletes expired keys batch by batch. Returns the total deleted.
pub(crate) async fn sweep(keys: &KeyDb, batch_size: usize) -> crate::Result<u64> {
    let mut total = 0;
    loop {
        let deleted = keys.delete_expired(batch_size).await?;
        total += deleted;
        if batch_size == 0 || (deleted as usize) < batch_size {
            return Ok(total);
        }
    }
}
