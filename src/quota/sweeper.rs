//! Periodic background sweep of stale counters.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::store::CounterStore;

/// Default time between sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Handle to a running sweep task.
///
/// The task is owned by this handle: [`Sweeper::stop`] shuts it down
/// cleanly, and dropping the handle aborts it.
pub struct Sweeper {
    shutdown: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl Sweeper {
    /// Spawn a task that sweeps `store` every `interval`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(store: Arc<CounterStore>, interval: Duration) -> Self {
        let interval = interval.max(Duration::from_millis(1));
        let (shutdown, mut shutdown_rx) = watch::channel(false);

        info!(interval_secs = interval.as_secs(), "Starting counter sweeper");

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick fires immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = store.sweep();
                        let stats = store.stats();
                        debug!(
                            removed = removed,
                            entries = stats.entry_count,
                            near_capacity = stats.near_capacity,
                            "Counter sweep complete"
                        );
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }

            debug!("Counter sweeper exited");
        });

        Self {
            shutdown,
            handle: Some(handle),
        }
    }

    /// Stop the sweep task and wait for it to finish.
    pub async fn stop(mut self) {
        let _ = self.shutdown.send(true);

        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "Counter sweeper terminated abnormally");
            }
        }
        info!("Counter sweeper stopped");
    }

    /// Whether the sweep task is still running.
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quota::clock::ManualClock;
    use crate::quota::store::StoreSettings;

    fn test_store() -> (Arc<CounterStore>, ManualClock) {
        let clock = ManualClock::new(0);
        let store = CounterStore::new(StoreSettings::default(), Arc::new(clock.clone()));
        (Arc::new(store), clock)
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_removes_expired_entries() {
        let (store, clock) = test_store();
        let sweeper = Sweeper::start(store.clone(), Duration::from_secs(300));

        store.increment("k", Duration::from_secs(1));
        clock.advance(2_000);
        assert_eq!(store.len(), 1);

        tokio::time::sleep(Duration::from_secs(301)).await;

        assert!(store.is_empty());
        sweeper.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_stop_cancels_task() {
        let (store, clock) = test_store();
        let sweeper = Sweeper::start(store.clone(), Duration::from_secs(1));
        assert!(sweeper.is_running());

        sweeper.stop().await;

        store.increment("k", Duration::from_secs(1));
        clock.advance(5_000);
        tokio::time::sleep(Duration::from_secs(10)).await;

        // No sweep ran after stop
        assert_eq!(store.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_sweeper_aborts_task() {
        let (store, clock) = test_store();
        let sweeper = Sweeper::start(store.clone(), Duration::from_secs(1));
        drop(sweeper);

        store.increment("k", Duration::from_secs(1));
        clock.advance(5_000);
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(store.len(), 1);
    }
}
