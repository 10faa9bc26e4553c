//! Fire-and-forget execution of reducer effects.
//!
//! The ledger's reducers describe side effects (notifications) as
//! [`Effect`] values. The [`EffectRunner`] spawns each effect on the tokio
//! runtime and returns immediately, so an operation's outcome never waits
//! on, or depends on, what its effects do.
//!
//! The runner counts effects in flight so that shutdown can wait for them.

use crate::metrics::EffectMetrics;
use booking_ledger_core::effect::Effect;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Notify;

/// Errors from the effect runner
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EffectError {
    /// Effects were still running when the shutdown deadline passed
    #[error("Shutdown timeout: {0} effects still running")]
    ShutdownTimeout(usize),
}

/// Spawns effects and tracks how many are still running.
#[derive(Clone, Debug, Default)]
pub struct EffectRunner {
    pending: Arc<AtomicUsize>,
    idle: Arc<Notify>,
    shutdown: Arc<AtomicBool>,
}

/// Decrements the pending counter when an effect task ends, even by panic.
struct PendingGuard {
    pending: Arc<AtomicUsize>,
    idle: Arc<Notify>,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if self.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }
}

impl EffectRunner {
    /// Create an idle runner
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of effects still running
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Whether [`shutdown`](Self::shutdown) has been called
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Start executing effects in the background.
    ///
    /// Returns immediately. No-op effects are skipped; after shutdown every
    /// effect is dropped with a warning.
    pub fn run<I>(&self, effects: I)
    where
        I: IntoIterator<Item = Effect>,
    {
        for effect in effects {
            let Effect::Future(fut) = effect else {
                continue;
            };
            if self.is_shutdown() {
                tracing::warn!("Effect runner is shut down, dropping effect");
                EffectMetrics::record_dropped();
                continue;
            }

            self.pending.fetch_add(1, Ordering::SeqCst);
            let guard = PendingGuard {
                pending: Arc::clone(&self.pending),
                idle: Arc::clone(&self.idle),
            };

            tokio::spawn(async move {
                let _guard = guard;
                let started = Instant::now();
                fut.await;
                EffectMetrics::record_execution(started.elapsed());
            });
        }
    }

    /// Wait until no effect is running.
    pub async fn drain(&self) {
        loop {
            let notified = self.idle.notified();
            if self.pending() == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Stop accepting effects and wait for those in flight.
    ///
    /// # Errors
    ///
    /// Returns [`EffectError::ShutdownTimeout`] with the number of effects
    /// still running if they do not finish within `timeout`.
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), EffectError> {
        tracing::info!("Initiating effect runner shutdown");
        self.shutdown.store(true, Ordering::Release);

        if tokio::time::timeout(timeout, self.drain()).await.is_ok() {
            tracing::info!("All effects completed, shutdown successful");
            Ok(())
        } else {
            let pending = self.pending();
            tracing::error!(pending_effects = pending, "Shutdown timeout with effects still running");
            Err(EffectError::ShutdownTimeout(pending))
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn push_after(seen: &Arc<Mutex<Vec<u32>>>, delay: Duration, value: u32) -> Effect {
        let seen = Arc::clone(seen);
        Effect::Future(Box::pin(async move {
            tokio::time::sleep(delay).await;
            seen.lock().unwrap().push(value);
        }))
    }

    #[tokio::test]
    async fn drain_waits_for_every_effect() {
        let runner = EffectRunner::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        runner.run([
            push_after(&seen, Duration::from_millis(10), 1),
            Effect::None,
            push_after(&seen, Duration::ZERO, 2),
        ]);
        assert_eq!(runner.pending(), 2);
        runner.drain().await;
        let mut seen = seen.lock().unwrap().clone();
        seen.sort_unstable();
        assert_eq!(seen, vec![1, 2]);
        assert_eq!(runner.pending(), 0);
    }

    #[tokio::test]
    async fn run_returns_before_effects_finish() {
        let runner = EffectRunner::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        runner.run([push_after(&seen, Duration::from_millis(50), 1)]);
        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(runner.pending(), 1);
        runner.drain().await;
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn panicking_effect_still_counts_as_finished() {
        let runner = EffectRunner::new();
        runner.run([Effect::Future(Box::pin(async { panic!("notifier exploded") }))]);
        runner.drain().await;
        assert_eq!(runner.pending(), 0);
    }

    #[tokio::test]
    async fn shutdown_times_out_on_slow_effects() {
        let runner = EffectRunner::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        runner.run([push_after(&seen, Duration::from_secs(5), 1)]);
        let result = runner.shutdown(Duration::from_millis(20)).await;
        assert_eq!(result, Err(EffectError::ShutdownTimeout(1)));
    }

    #[tokio::test]
    async fn effects_after_shutdown_are_dropped() {
        let runner = EffectRunner::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        runner.shutdown(Duration::from_millis(10)).await.unwrap();
        runner.run([push_after(&seen, Duration::ZERO, 1)]);
        assert_eq!(runner.pending(), 0);
        runner.drain().await;
        assert!(seen.lock().unwrap().is_empty());
    }
}
