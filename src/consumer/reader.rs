//! One task per shard: acquire an iterator, poll until the shard closes.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::client::KinesisClientTrait;
use crate::error::{ConsumerError, KinesisClientError};
use crate::monitoring::{IteratorEventType, ProcessingEvent, ShardEventType};
use crate::processor::RecordProcessor;
use crate::retry::{shutdown_requested, Backoff, Throttle};
use crate::types::IteratorType;

/// Dependencies shared by every reader a consumer launches
pub(crate) struct ReaderContext<P, C> {
    pub(crate) processor: Arc<P>,
    pub(crate) client: Arc<C>,
    pub(crate) stream_name: String,
    pub(crate) batch_size: Option<i32>,
    pub(crate) empty_poll_delay: Duration,
    pub(crate) backoff: Arc<dyn Backoff>,
    pub(crate) monitoring_tx: Option<mpsc::Sender<ProcessingEvent>>,
}

impl<P, C> ReaderContext<P, C> {
    async fn send_monitoring_event(&self, event: ProcessingEvent) {
        if let Some(tx) = &self.monitoring_tx {
            if let Err(e) = tx.send(event).await {
                warn!(error = %e, "Failed to send monitoring event");
            } else {
                trace!("Sent monitoring event successfully");
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderState {
    /// Waiting for an iterator
    Init,
    Polling,
    /// Backing off after a rate limited poll
    Throttled,
    /// Terminal, whatever the outcome
    Done,
}

/// How a reader finished
#[derive(Debug)]
pub enum ReaderOutcome {
    /// The shard closed and every record was delivered
    Drained,
    /// Shutdown was signalled before the shard closed
    Interrupted,
    /// A non-retryable failure stopped the reader
    Failed(ConsumerError),
}

/// The single message a reader sends to its consumer when it stops
#[derive(Debug)]
pub struct ShardExit {
    pub shard_id: String,
    pub outcome: ReaderOutcome,
}

/// Drives one shard through `Init -> Polling <-> Throttled -> Done`.
///
/// Batches are handed to the processor one at a time, in the order polled.
pub struct ShardReader<P, C> {
    ctx: Arc<ReaderContext<P, C>>,
    shard_id: String,
    iterator_type: IteratorType,
    state: ReaderState,
    throttle: Throttle,
    shutdown: watch::Receiver<bool>,
}

impl<P, C> ShardReader<P, C>
where
    P: RecordProcessor + 'static,
    C: KinesisClientTrait + 'static,
{
    pub(crate) fn new(
        ctx: Arc<ReaderContext<P, C>>,
        shard_id: impl Into<String>,
        iterator_type: IteratorType,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let throttle = Throttle::new(ctx.backoff.clone());
        Self {
            ctx,
            shard_id: shard_id.into(),
            iterator_type,
            state: ReaderState::Init,
            throttle,
            shutdown,
        }
    }

    pub fn shard_id(&self) -> &str {
        &self.shard_id
    }

    pub fn state(&self) -> ReaderState {
        self.state
    }

    /// Run on its own task. Exactly one [`ShardExit`] is sent on `exits`,
    /// including when the reader panics.
    pub(crate) fn spawn(mut self, exits: mpsc::UnboundedSender<ShardExit>) -> JoinHandle<()> {
        let shard_id = self.shard_id.clone();
        let ctx = self.ctx.clone();

        tokio::spawn(async move {
            let outcome = match tokio::spawn(async move { self.run().await }).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    let err = ConsumerError::from(e);
                    error!(shard_id = %shard_id, error = %err, "Shard reader panicked");
                    ctx.send_monitoring_event(ProcessingEvent::shard_event(
                        shard_id.clone(),
                        ShardEventType::Error,
                        Some(err.to_string()),
                    ))
                    .await;
                    ReaderOutcome::Failed(err)
                }
            };

            let exit = ShardExit {
                shard_id: shard_id.clone(),
                outcome,
            };
            if exits.send(exit).is_err() {
                debug!(shard_id = %shard_id, "Consumer stopped before reader exit was reported");
            }
        })
    }

    /// Read the shard until it closes, fails, or shutdown is signalled
    pub async fn run(&mut self) -> ReaderOutcome {
        info!(
            shard_id = %self.shard_id,
            iterator_type = %self.iterator_type,
            "Starting shard reader"
        );
        self.ctx
            .send_monitoring_event(ProcessingEvent::shard_event(
                self.shard_id.clone(),
                ShardEventType::Started,
                None,
            ))
            .await;

        let mut iterator = match self.acquire_iterator().await {
            Ok(Some(iterator)) => iterator,
            Ok(None) => return self.interrupted().await,
            Err(e) => return self.failed(e).await,
        };

        self.state = ReaderState::Polling;
        loop {
            let ctx = self.ctx.clone();
            let polled = tokio::select! {
                biased;
                _ = shutdown_requested(&mut self.shutdown) => None,
                result = ctx.client.get_records(&iterator, ctx.batch_size) => Some(result),
            };
            let Some(result) = polled else {
                return self.interrupted().await;
            };

            match result {
                Ok(batch) => {
                    self.throttle.reset();
                    self.state = ReaderState::Polling;

                    if batch.records.is_empty() {
                        trace!(shard_id = %self.shard_id, "Empty poll");
                    } else {
                        let record_count = batch.records.len();
                        let start = Instant::now();
                        ctx.processor
                            .process_records(&self.shard_id, &batch.records)
                            .await;
                        let duration = start.elapsed();

                        debug!(
                            shard_id = %self.shard_id,
                            count = record_count,
                            duration_ms = duration.as_millis() as u64,
                            "Delivered batch"
                        );
                        ctx.send_monitoring_event(ProcessingEvent::batch_delivered(
                            self.shard_id.clone(),
                            record_count,
                            duration,
                        ))
                        .await;
                    }

                    match batch.next_iterator {
                        Some(next) => iterator = next,
                        None => return self.drained().await,
                    }

                    if batch.records.is_empty() && !ctx.empty_poll_delay.is_zero() {
                        let idle = tokio::select! {
                            biased;
                            _ = shutdown_requested(&mut self.shutdown) => false,
                            _ = tokio::time::sleep(ctx.empty_poll_delay) => true,
                        };
                        if !idle {
                            return self.interrupted().await;
                        }
                    }
                }
                Err(e) if e.is_retryable() => {
                    if !self.back_off(&e).await {
                        return self.interrupted().await;
                    }
                    self.state = ReaderState::Polling;
                }
                Err(e) => {
                    return self
                        .failed(ConsumerError::GetRecordsFailed {
                            shard_id: self.shard_id.clone(),
                            source: e,
                        })
                        .await;
                }
            }
        }
    }

    /// `Ok(None)` when shutdown arrives first
    async fn acquire_iterator(&mut self) -> Result<Option<String>, ConsumerError> {
        loop {
            let ctx = self.ctx.clone();
            let result = tokio::select! {
                biased;
                _ = shutdown_requested(&mut self.shutdown) => return Ok(None),
                result = ctx.client.get_shard_iterator(
                    &ctx.stream_name,
                    &self.shard_id,
                    self.iterator_type,
                ) => result,
            };

            match result {
                Ok(iterator) => {
                    self.throttle.reset();
                    debug!(
                        shard_id = %self.shard_id,
                        iterator_type = %self.iterator_type,
                        "Acquired shard iterator"
                    );
                    ctx.send_monitoring_event(ProcessingEvent::iterator(
                        self.shard_id.clone(),
                        IteratorEventType::Acquired(self.iterator_type),
                        None,
                    ))
                    .await;
                    return Ok(Some(iterator));
                }
                Err(e) if e.is_retryable() => {
                    if !self.back_off(&e).await {
                        return Ok(None);
                    }
                    self.state = ReaderState::Init;
                }
                Err(e) => {
                    ctx.send_monitoring_event(ProcessingEvent::iterator(
                        self.shard_id.clone(),
                        IteratorEventType::Failed,
                        Some(e.to_string()),
                    ))
                    .await;
                    return Err(ConsumerError::GetIteratorFailed {
                        shard_id: self.shard_id.clone(),
                        source: e,
                    });
                }
            }
        }
    }

    /// Returns false if shutdown interrupted the wait
    async fn back_off(&mut self, cause: &KinesisClientError) -> bool {
        self.state = ReaderState::Throttled;
        let attempt = self.throttle.attempts();
        let delay = self.throttle.current_delay();

        warn!(
            shard_id = %self.shard_id,
            attempt = attempt,
            delay_ms = delay.as_millis() as u64,
            error = %cause,
            "Throttled, backing off"
        );
        self.ctx
            .send_monitoring_event(ProcessingEvent::throttled(
                self.shard_id.clone(),
                attempt,
                delay,
            ))
            .await;

        self.throttle.wait_or_shutdown(&mut self.shutdown).await.is_some()
    }

    async fn drained(&mut self) -> ReaderOutcome {
        self.state = ReaderState::Done;
        info!(shard_id = %self.shard_id, "Shard closed and drained");
        self.ctx
            .send_monitoring_event(ProcessingEvent::shard_event(
                self.shard_id.clone(),
                ShardEventType::Completed,
                None,
            ))
            .await;
        ReaderOutcome::Drained
    }

    async fn interrupted(&mut self) -> ReaderOutcome {
        self.state = ReaderState::Done;
        info!(shard_id = %self.shard_id, "Shutdown received, stopping shard reader");
        self.ctx
            .send_monitoring_event(ProcessingEvent::shard_event(
                self.shard_id.clone(),
                ShardEventType::Interrupted,
                Some("Shutdown requested".to_string()),
            ))
            .await;
        ReaderOutcome::Interrupted
    }

    async fn failed(&mut self, err: ConsumerError) -> ReaderOutcome {
        self.state = ReaderState::Done;
        error!(shard_id = %self.shard_id, error = %err, "Shard reader failed");
        self.ctx
            .send_monitoring_event(ProcessingEvent::shard_event(
                self.shard_id.clone(),
                ShardEventType::Error,
                Some(err.to_string()),
            ))
            .await;
        ReaderOutcome::Failed(err)
    }
}
