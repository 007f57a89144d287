//! The continuous popup observer.
//!
//! Attached for the duration of a critical flow, the observer runs sweeps
//! from two triggers: a mutation signal polled at a short debounce when the
//! adapter exposes one, and a periodic scanner as the fallback for
//! mutations the signal misses. Each successful dismissal schedules one
//! cascade re-sweep shortly after, so stacked overlays drain quickly.

use crate::patterns::PatternSet;
use crate::sweep::dismiss_popups;
use cartpilot_core::port::Interactor;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Observer timing configuration.
#[derive(Clone, Copy, Debug)]
pub struct ObserverConfig {
    /// Period of the unconditional fallback scan.
    pub scan_interval: Duration,
    /// Poll period for the adapter's mutation counter.
    pub mutation_debounce: Duration,
    /// Delay before the cascade re-sweep after a successful dismissal.
    pub cascade_delay: Duration,
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            scan_interval: Duration::from_millis(500),
            mutation_debounce: Duration::from_millis(50),
            cascade_delay: Duration::from_millis(200),
        }
    }
}

struct ObserverTask {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Continuous popup dismissal attached to one interactor.
///
/// `attach` is idempotent: a second call while attached is a no-op.
/// `detach` stops the loop, logs the cumulative dismissal count, and is
/// safe to call when not attached. Flows always detach in their finally
/// path.
pub struct PopupObserver<I: Interactor + 'static> {
    interactor: Arc<I>,
    patterns: Arc<PatternSet>,
    config: ObserverConfig,
    task: Mutex<Option<ObserverTask>>,
    dismissed_total: Arc<AtomicU64>,
}

impl<I: Interactor + 'static> PopupObserver<I> {
    /// Build an observer over the interactor with the given pattern set.
    #[must_use]
    pub fn new(interactor: Arc<I>, patterns: PatternSet, config: ObserverConfig) -> Self {
        Self {
            interactor,
            patterns: Arc::new(patterns),
            config,
            task: Mutex::new(None),
            dismissed_total: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Start the dismissal loop. No-op when already attached.
    pub async fn attach(&self) {
        let mut slot = self.task.lock().await;
        if slot.is_some() {
            tracing::debug!("popup observer already attached");
            return;
        }

        let (stop_tx, mut stop_rx) = watch::channel(false);
        let interactor = Arc::clone(&self.interactor);
        let patterns = Arc::clone(&self.patterns);
        let dismissed_total = Arc::clone(&self.dismissed_total);
        let config = self.config;

        let handle = tokio::spawn(async move {
            let mut last_mutation = interactor.mutation_tick().await;
            let mut next_scan = Instant::now() + config.scan_interval;
            let mut cascade_at: Option<Instant> = None;

            loop {
                tokio::select! {
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    },
                    () = tokio::time::sleep(config.mutation_debounce) => {
                        let now = Instant::now();
                        let mut should_sweep = false;

                        let seen = interactor.mutation_tick().await;
                        if seen.is_some() && seen != last_mutation {
                            last_mutation = seen;
                            should_sweep = true;
                        }
                        if now >= next_scan {
                            should_sweep = true;
                        }
                        if cascade_at.is_some_and(|at| now >= at) {
                            cascade_at = None;
                            should_sweep = true;
                        }

                        if should_sweep {
                            let dismissed = dismiss_popups(interactor.as_ref(), &patterns).await;
                            next_scan = Instant::now() + config.scan_interval;
                            if dismissed > 0 {
                                dismissed_total.fetch_add(dismissed as u64, Ordering::SeqCst);
                                cascade_at = Some(Instant::now() + config.cascade_delay);
                            }
                            // Our own clicks mutate the DOM; swallow them.
                            last_mutation = interactor.mutation_tick().await;
                        }
                    },
                }
            }
        });

        *slot = Some(ObserverTask {
            stop: stop_tx,
            handle,
        });
        tracing::debug!("popup observer attached");
    }

    /// Stop the loop and report the cumulative dismissal count.
    pub async fn detach(&self) -> u64 {
        let task = self.task.lock().await.take();
        if let Some(task) = task {
            let _ = task.stop.send(true);
            if task.handle.await.is_err() {
                tracing::debug!("popup observer task ended abnormally");
            }
        }
        let total = self.dismissed_total.load(Ordering::SeqCst);
        tracing::info!(dismissed_total = total, "popup observer detached");
        total
    }

    /// Whether the loop is currently running.
    pub async fn is_attached(&self) -> bool {
        self.task.lock().await.is_some()
    }

    /// Cumulative dismissals since construction.
    #[must_use]
    pub fn dismissed_total(&self) -> u64 {
        self.dismissed_total.load(Ordering::SeqCst)
    }
}

impl<I: Interactor + 'static> Drop for PopupObserver<I> {
    /// Cancellation can drop a flow mid-run without reaching its detach
    /// call; the loop must not outlive its observer.
    fn drop(&mut self) {
        if let Ok(mut slot) = self.task.try_lock() {
            if let Some(task) = slot.take() {
                task.handle.abort();
            }
        }
    }
}
