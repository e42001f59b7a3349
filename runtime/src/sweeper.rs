//! Background task that sweeps registry tombstones.
//!
//! The sweeper holds only a weak reference to the registry and stops on its
//! own once the registry is dropped. The interval is re-read from the
//! registry configuration before every sleep.

use crate::metrics::RegistryMetrics;
use cancelable_requests_core::{CancellationRegistry, SweepReport};
use std::sync::{Arc, Weak};
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};

/// Spawns periodic sweeps.
#[derive(Debug)]
pub struct Sweeper;

impl Sweeper {
    /// Start sweeping `registry` every `sweep.interval`.
    ///
    /// Must be called within a tokio runtime.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let sweeper = Sweeper::spawn(&registry);
    /// // ...
    /// sweeper.shutdown().await?;
    /// ```
    #[must_use]
    pub fn spawn(registry: &Arc<CancellationRegistry>) -> SweeperHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run(Arc::downgrade(registry), shutdown_rx));
        SweeperHandle {
            shutdown: shutdown_tx,
            task,
        }
    }

    /// Run one sweep and record its metrics
    pub fn sweep_once(registry: &CancellationRegistry) -> SweepReport {
        let report = registry.sweep();
        RegistryMetrics::record_sweep(&report);
        report
    }
}

/// Handle to a running sweeper.
#[derive(Debug)]
#[must_use = "dropping the handle leaves the sweeper running until the registry is dropped"]
pub struct SweeperHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Whether the sweeper task has exited
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop the sweeper and wait for it to exit.
    ///
    /// # Errors
    ///
    /// Returns the [`JoinError`] if the sweeper task panicked.
    pub async fn shutdown(self) -> Result<(), JoinError> {
        self.shutdown.send(true).ok();
        self.task.await
    }
}

async fn run(registry: Weak<CancellationRegistry>, mut shutdown: watch::Receiver<bool>) {
    tracing::info!("Tombstone sweeper started");

    while !*shutdown.borrow() {
        let Some(interval) = registry.upgrade().map(|r| r.config().sweep.interval) else {
            break;
        };

        tokio::select! {
            () = tokio::time::sleep(interval) => {
                let Some(registry) = registry.upgrade() else {
                    break;
                };
                Sweeper::sweep_once(&registry);
            }

            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    tracing::info!("Tombstone sweeper stopped");
}
