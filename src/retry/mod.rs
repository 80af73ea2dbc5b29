//! Retry and backoff shared by the shard readers and the producer

mod backoff;

pub use backoff::{Backoff, ExponentialBackoff, ExponentialBackoffBuilder, FixedBackoff};

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, trace};

/// Stateful wrapper that walks a [`Backoff`] across consecutive retries.
///
/// Each [`wait`](Throttle::wait) sleeps for the next delay and advances the
/// attempt counter; [`reset`](Throttle::reset) returns to the base delay after
/// a success.
pub struct Throttle {
    backoff: Arc<dyn Backoff>,
    attempts: u32,
}

impl Throttle {
    pub fn new(backoff: Arc<dyn Backoff>) -> Self {
        Self {
            backoff,
            attempts: 0,
        }
    }

    /// The delay the next wait will use
    pub fn current_delay(&self) -> Duration {
        self.backoff.next_delay(self.attempts)
    }

    /// Sleep for the current delay, then grow it
    pub async fn wait(&mut self) -> Duration {
        let delay = self.advance();
        tokio::time::sleep(delay).await;
        delay
    }

    /// Like [`wait`](Throttle::wait), but gives up early once `shutdown` fires.
    ///
    /// Returns `None` when interrupted.
    pub async fn wait_or_shutdown(
        &mut self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Option<Duration> {
        if *shutdown.borrow() {
            return None;
        }
        let delay = self.advance();
        tokio::select! {
            _ = tokio::time::sleep(delay) => Some(delay),
            _ = shutdown_requested(shutdown) => {
                debug!("Backoff interrupted by shutdown signal");
                None
            }
        }
    }

    /// Reset the retry counter
    pub fn reset(&mut self) {
        if self.attempts > 0 {
            trace!(attempts = self.attempts, "Resetting throttle");
        }
        self.attempts = 0;
    }

    /// Get the current attempt count
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    fn advance(&mut self) -> Duration {
        let delay = self.backoff.next_delay(self.attempts);
        self.attempts = self.attempts.saturating_add(1);
        delay
    }
}

/// Resolves once `true` is published on `shutdown`.
///
/// A dropped sender never resolves: losing the handle is not a request to stop.
pub async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

impl std::fmt::Debug for Throttle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Throttle")
            .field("attempts", &self.attempts)
            .finish()
    }
}
