//! Stop signal shared between the producer and whoever controls the run.
//!
//! Requesting a stop only halts further emissions from the producer. The
//! consumer never observes the signal directly: it stops once the producer
//! drops its end of the handoff and every emitted record has been drained,
//! so a write in progress always completes for every token of its feature.
//!
//! # Architecture
//!
//! The flag is an [`AtomicBool`] so the producer's hot loop can poll it
//! without locking; a [`Notify`] wakes a producer parked on a blocked
//! handoff send or a restart delay.

use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use tokio::sync::Notify;

/// Shared stop state.
#[derive(Debug)]
pub struct StopSignal {
    /// Whether a stop has been requested.
    stop_requested: AtomicBool,

    /// Wakes tasks waiting in [`StopSignal::stopped`].
    notify: Notify,

    /// Wall-clock time the signal was created (run start).
    started_at: DateTime<Utc>,
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl StopSignal {
    /// Create a signal in the running state.
    pub fn new() -> Self {
        Self {
            stop_requested: AtomicBool::new(false),
            notify: Notify::new(),
            started_at: Utc::now(),
        }
    }

    /// Request a clean stop and wake every waiter.
    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    /// Check whether a stop has been requested.
    pub fn is_stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::Acquire)
    }

    /// Resolve once a stop has been requested.
    ///
    /// Returns immediately if the stop was already requested.
    pub async fn stopped(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_stop_requested() {
                return;
            }
            notified.await;
        }
    }

    /// Wall-clock time the run started.
    pub const fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Whole seconds elapsed since the run started.
    pub fn elapsed_seconds(&self) -> u64 {
        let elapsed = Utc::now()
            .signed_duration_since(self.started_at)
            .num_seconds();
        // `num_seconds` can be negative if clocks are weird; treat as 0.
        u64::try_from(elapsed.max(0)).unwrap_or(u64::MAX)
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    #[test]
    fn initial_state_is_running() {
        let signal = StopSignal::new();
        assert!(!signal.is_stop_requested());
        assert!(signal.started_at() <= Utc::now());
    }

    #[tokio::test]
    async fn stopped_resolves_immediately_after_request() {
        let signal = StopSignal::new();
        signal.request_stop();
        assert!(signal.is_stop_requested());
        tokio::time::timeout(Duration::from_secs(1), signal.stopped())
            .await
            .unwrap_or_else(|_elapsed| panic!("stopped() did not resolve"));
    }

    #[tokio::test]
    async fn waiter_is_woken_by_later_request() {
        let signal = Arc::new(StopSignal::new());
        let waiter = {
            let signal = Arc::clone(&signal);
            tokio::spawn(async move { signal.stopped().await })
        };
        tokio::task::yield_now().await;
        signal.request_stop();
        let joined = tokio::time::timeout(Duration::from_secs(1), waiter).await;
        assert!(matches!(joined, Ok(Ok(()))));
    }
}
