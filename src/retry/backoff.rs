use rand::Rng;
use std::time::Duration;
use tracing::trace;

/// Delay schedule for consecutive retries
pub trait Backoff: Send + Sync {
    /// Delay to wait before retry number `attempt` (zero based)
    fn next_delay(&self, attempt: u32) -> Duration;
}

/// Doubling delay capped at a maximum.
///
/// With a non-zero jitter, each delay is moved by a random amount of up to
/// `jitter` times itself in either direction, never past the cap. Readers
/// throttled together then drift apart instead of retrying in lockstep.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    initial_delay: Duration,
    max_delay: Duration,
    jitter: f64,
}

impl ExponentialBackoff {
    /// Doubling backoff without jitter
    pub fn new(initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            initial_delay,
            max_delay,
            jitter: 0.0,
        }
    }

    pub fn builder() -> ExponentialBackoffBuilder {
        ExponentialBackoffBuilder::default()
    }

    /// `initial_delay * 2^attempt`, saturating at the cap
    fn capped_delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.initial_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }
}

impl Backoff for ExponentialBackoff {
    fn next_delay(&self, attempt: u32) -> Duration {
        let capped = self.capped_delay(attempt);
        if self.jitter <= 0.0 {
            return capped;
        }

        let spread = capped.as_secs_f64() * self.jitter;
        let offset = rand::thread_rng().gen_range(-spread..=spread);
        let delay = Duration::from_secs_f64(
            (capped.as_secs_f64() + offset).clamp(0.0, self.max_delay.as_secs_f64()),
        );

        trace!(
            attempt = attempt,
            capped_ms = capped.as_millis() as u64,
            delay_ms = delay.as_millis() as u64,
            "Jittered backoff delay"
        );
        delay
    }
}

/// Builder for [`ExponentialBackoff`]
#[derive(Debug)]
pub struct ExponentialBackoffBuilder {
    initial_delay: Duration,
    max_delay: Duration,
    jitter: f64,
}

impl Default for ExponentialBackoffBuilder {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(10),
            jitter: 0.0,
        }
    }
}

impl ExponentialBackoffBuilder {
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Fraction of each delay randomly added or removed, clamped to 0.0..=1.0
    pub fn jitter(mut self, jitter: f64) -> Self {
        self.jitter = if jitter.is_nan() { 0.0 } else { jitter.clamp(0.0, 1.0) };
        self
    }

    pub fn build(self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_delay: self.initial_delay,
            max_delay: self.max_delay,
            jitter: self.jitter,
        }
    }
}

/// Same delay for every attempt
#[derive(Debug, Clone)]
pub struct FixedBackoff {
    delay: Duration,
}

impl FixedBackoff {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    /// Never waits. Handy for tests.
    pub fn immediate() -> Self {
        Self::new(Duration::ZERO)
    }
}

impl Backoff for FixedBackoff {
    fn next_delay(&self, _attempt: u32) -> Duration {
        self.delay
    }
}
