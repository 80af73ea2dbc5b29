//! Buffered batch publishing with automatic retry of rejected entries.
//!
//! A [`Producer`] validates every message as it is put, buffers up to
//! `send_size` of them and submits the buffer as one batch. Entries the
//! service rejects (rate limiting, internal failures) are resubmitted on their
//! own, with exponential backoff, until every one is accepted. A rate limited
//! submission is resubmitted whole. Any other failure of the whole submission
//! is not retried: it comes back as [`ProducerError::Transport`] listing every
//! message that was not sent.
//!
//! A producer is not internally synchronized; share it behind a mutex if
//! several tasks need to publish through the same buffer.

use bytes::Bytes;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, trace, warn};

use crate::client::KinesisClientTrait;
use crate::error::ProducerError;
use crate::retry::{Backoff, ExponentialBackoff, Throttle};
use crate::types::{FailedPut, Message, PutResultEntry};

/// Largest batch a single submission accepts
pub const MAX_SEND_SIZE: usize = 500;

#[derive(Debug, Clone)]
pub struct ProducerConfig {
    pub stream_name: String,
    /// Messages buffered before a submission is triggered, 1 to [`MAX_SEND_SIZE`]
    pub send_size: usize,
    /// First delay before resubmitting rejected entries
    pub retry_initial_delay: Duration,
    /// Ceiling for the doubling retry delay
    pub retry_max_delay: Duration,
    /// Fraction of each retry delay randomly added or removed, 0.0 to 1.0
    pub retry_jitter: f64,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            stream_name: String::new(),
            send_size: MAX_SEND_SIZE,
            retry_initial_delay: Duration::from_millis(500),
            retry_max_delay: Duration::from_secs(10),
            retry_jitter: 0.0,
        }
    }
}

impl ProducerConfig {
    pub fn validate(&self) -> Result<(), ProducerError> {
        if self.stream_name.is_empty() {
            return Err(ProducerError::ConfigError(
                "stream name must not be empty".to_string(),
            ));
        }
        if !(1..=MAX_SEND_SIZE).contains(&self.send_size) {
            return Err(ProducerError::ConfigError(format!(
                "send size must be between 1 and {}, got {}",
                MAX_SEND_SIZE, self.send_size
            )));
        }
        if self.retry_initial_delay > self.retry_max_delay {
            return Err(ProducerError::ConfigError(
                "retry initial delay exceeds the maximum delay".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.retry_jitter) {
            return Err(ProducerError::ConfigError(format!(
                "retry jitter must be between 0.0 and 1.0, got {}",
                self.retry_jitter
            )));
        }
        Ok(())
    }
}

/// What a completed submission did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SendSummary {
    /// Messages accepted
    pub sent: usize,
    /// Submissions made, including resubmissions of rejected entries
    pub attempts: u32,
}

/// Batching producer for a single stream
///
/// # Examples
///
/// ```rust,no_run
/// use kinesis_toolkit::{Producer, ProducerConfig};
/// use aws_sdk_kinesis::Client;
///
/// async fn publish(client: Client) -> anyhow::Result<()> {
///     let config = ProducerConfig {
///         stream_name: "my-stream".to_string(),
///         ..Default::default()
///     };
///     let mut producer = Producer::new(config, client)?;
///
///     producer.put("user-42", "signed up").await?;
///     producer.flush().await?;
///     Ok(())
/// }
/// ```
pub struct Producer<C> {
    config: ProducerConfig,
    client: Arc<C>,
    backoff: Arc<dyn Backoff>,
    buffer: Vec<Message>,
}

impl<C> Producer<C>
where
    C: KinesisClientTrait,
{
    pub fn new(config: ProducerConfig, client: C) -> Result<Self, ProducerError> {
        config.validate()?;
        let backoff = Arc::new(
            ExponentialBackoff::builder()
                .initial_delay(config.retry_initial_delay)
                .max_delay(config.retry_max_delay)
                .jitter(config.retry_jitter)
                .build(),
        );
        Ok(Self {
            buffer: Vec::with_capacity(config.send_size),
            config,
            client: Arc::new(client),
            backoff,
        })
    }

    /// Replace the retry backoff derived from the config
    pub fn with_backoff(mut self, backoff: impl Backoff + 'static) -> Self {
        self.backoff = Arc::new(backoff);
        self
    }

    pub fn config(&self) -> &ProducerConfig {
        &self.config
    }

    /// Messages waiting for the next submission
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Validate and buffer a key/payload pair.
    ///
    /// Returns `Ok(Some(_))` when this put filled the buffer and triggered a
    /// submission. An invalid message is rejected with every rule it broke and
    /// leaves the buffer untouched.
    pub async fn put(
        &mut self,
        partition_key: impl AsRef<[u8]>,
        data: impl Into<Bytes>,
    ) -> Result<Option<SendSummary>, ProducerError> {
        let message = Message::new(partition_key, data)?;
        self.put_message(message).await
    }

    /// Buffer an already validated message
    pub async fn put_message(
        &mut self,
        message: Message,
    ) -> Result<Option<SendSummary>, ProducerError> {
        self.buffer.push(message);
        trace!(buffered = self.buffer.len(), send_size = self.config.send_size, "Buffered message");

        if self.buffer.len() >= self.config.send_size {
            self.send().await.map(Some)
        } else {
            Ok(None)
        }
    }

    /// Submit whatever is buffered. Makes no call when the buffer is empty.
    pub async fn flush(&mut self) -> Result<SendSummary, ProducerError> {
        self.send().await
    }

    async fn send(&mut self) -> Result<SendSummary, ProducerError> {
        // Taking the buffer resets it on every exit path
        let mut pending = std::mem::take(&mut self.buffer);
        self.buffer.reserve(self.config.send_size);
        if pending.is_empty() {
            return Ok(SendSummary::default());
        }

        let total = pending.len();
        let mut throttle = Throttle::new(self.backoff.clone());
        let mut attempts: u32 = 0;

        loop {
            attempts += 1;
            let results = match self
                .client
                .put_records(&self.config.stream_name, &pending)
                .await
            {
                Ok(results) => results,
                Err(e) if e.is_retryable() => {
                    warn!(
                        stream = %self.config.stream_name,
                        pending = pending.len(),
                        attempt = attempts,
                        delay_ms = throttle.current_delay().as_millis() as u64,
                        error = %e,
                        "Batch submission throttled, backing off"
                    );
                    throttle.wait().await;
                    continue;
                }
                Err(source) => {
                    error!(
                        stream = %self.config.stream_name,
                        unsent = pending.len(),
                        error = %source,
                        "Batch submission failed"
                    );
                    return Err(ProducerError::Transport {
                        failures: pending.into_iter().map(FailedPut::transport).collect(),
                        source,
                    });
                }
            };

            let rejected = rejected_messages(pending, &results);
            if rejected.is_empty() {
                debug!(
                    stream = %self.config.stream_name,
                    count = total,
                    attempts = attempts,
                    "Put messages"
                );
                return Ok(SendSummary {
                    sent: total,
                    attempts,
                });
            }

            warn!(
                stream = %self.config.stream_name,
                failed = rejected.len(),
                attempt = attempts,
                delay_ms = throttle.current_delay().as_millis() as u64,
                errors = ?error_counts(rejected.iter()),
                "Put failed for some messages, backing off and trying again"
            );
            throttle.wait().await;
            pending = rejected.into_iter().map(|f| f.message).collect();
        }
    }
}

impl<C> fmt::Debug for Producer<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Producer")
            .field("config", &self.config)
            .field("buffered", &self.buffer.len())
            .finish()
    }
}

/// Messages whose result entry carries an error code, in submission order.
///
/// A message with no matching result entry is treated as rejected.
fn rejected_messages(messages: Vec<Message>, results: &[PutResultEntry]) -> Vec<FailedPut> {
    if results.len() != messages.len() {
        warn!(
            sent = messages.len(),
            results = results.len(),
            "Submission returned a mismatched number of results"
        );
    }

    messages
        .into_iter()
        .enumerate()
        .filter_map(|(i, message)| match results.get(i) {
            Some(entry) if !entry.is_failure() => None,
            Some(entry) => Some(FailedPut {
                message,
                error_code: entry.error_code.clone(),
                error_message: entry.error_message.clone(),
            }),
            None => Some(FailedPut {
                message,
                error_code: None,
                error_message: Some("no result returned".to_string()),
            }),
        })
        .collect()
}

/// Number of failures per error code; transport failures count under `"unknown"`
pub fn error_counts<'a>(failures: impl IntoIterator<Item = &'a FailedPut>) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for failure in failures {
        let code = failure.error_code.as_deref().unwrap_or("unknown");
        *counts.entry(code.to_string()).or_insert(0) += 1;
    }
    counts
}
