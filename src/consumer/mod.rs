//! Tail every shard of a stream, following splits and merges.
//!
//! [`Consumer::run`] launches one [`ShardReader`] per open shard, then waits
//! on a single completion channel. Each time a reader drains a closed shard,
//! the topology is listed again and any child shards whose parents have all
//! drained are launched from `TRIM_HORIZON`.

mod reader;

pub use reader::{ReaderOutcome, ReaderState, ShardExit, ShardReader};

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::client::KinesisClientTrait;
use crate::error::{ConsumerError, Result};
use crate::monitoring::{MonitoringConfig, ProcessingEvent};
use crate::processor::RecordProcessor;
use crate::retry::{shutdown_requested, Backoff, ExponentialBackoff, Throttle};
use crate::topology::{leaf_shards, ShardTracker};
use crate::types::{IteratorType, Shard};
use reader::ReaderContext;

/// Largest `limit` a single GetRecords call accepts
pub const MAX_BATCH_SIZE: i32 = 10_000;

/// Default pause between polls that return nothing
pub const DEFAULT_EMPTY_POLL_DELAY: Duration = Duration::from_millis(200);

/// What the consumer does when a reader hits a non-retryable failure
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReaderFailurePolicy {
    /// Stop reading that shard and keep the others going
    #[default]
    HaltShard,
    /// Stop every reader and return the failure from [`Consumer::run`]
    Abort,
}

/// Configuration for the consumer
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Name of the stream to tail
    pub stream_name: String,
    /// Record limit per poll; `None` lets the service decide
    pub batch_size: Option<i32>,
    /// First delay after a rate limited call
    pub throttle_initial_delay: Duration,
    /// Ceiling for the doubling throttle delay
    pub throttle_max_delay: Duration,
    /// Fraction of each throttle delay randomly added or removed, 0.0 to 1.0
    pub throttle_jitter: f64,
    /// Pause after a poll that returned no records. A shard serves five
    /// GetRecords calls per second, so an idle reader should not poll faster.
    pub empty_poll_delay: Duration,
    pub failure_policy: ReaderFailurePolicy,
    /// Monitoring configuration
    pub monitoring: MonitoringConfig,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            stream_name: String::new(),
            batch_size: None,
            throttle_initial_delay: Duration::from_millis(250),
            throttle_max_delay: Duration::from_secs(10),
            throttle_jitter: 0.0,
            empty_poll_delay: DEFAULT_EMPTY_POLL_DELAY,
            failure_policy: ReaderFailurePolicy::default(),
            monitoring: MonitoringConfig::default(),
        }
    }
}

impl ConsumerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.stream_name.is_empty() {
            return Err(ConsumerError::ConfigError(
                "stream name must not be empty".to_string(),
            ));
        }
        if let Some(size) = self.batch_size {
            if !(1..=MAX_BATCH_SIZE).contains(&size) {
                return Err(ConsumerError::ConfigError(format!(
                    "batch size must be between 1 and {}, got {}",
                    MAX_BATCH_SIZE, size
                )));
            }
        }
        if self.throttle_initial_delay > self.throttle_max_delay {
            return Err(ConsumerError::ConfigError(
                "throttle initial delay exceeds the maximum delay".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.throttle_jitter) {
            return Err(ConsumerError::ConfigError(format!(
                "throttle jitter must be between 0.0 and 1.0, got {}",
                self.throttle_jitter
            )));
        }
        Ok(())
    }
}

/// Tails a stream, handing each shard's records to a [`RecordProcessor`]
///
/// # Examples
///
/// ```rust,no_run
/// use kinesis_toolkit::{Consumer, ConsumerConfig, FnProcessor, Record};
/// use aws_sdk_kinesis::Client;
///
/// async fn tail(client: Client) -> anyhow::Result<()> {
///     let config = ConsumerConfig {
///         stream_name: "my-stream".to_string(),
///         ..Default::default()
///     };
///     let processor = FnProcessor(|shard_id: &str, records: &[Record]| {
///         println!("{} records from {}", records.len(), shard_id);
///     });
///
///     let (consumer, _monitoring_rx) = Consumer::new(config, processor, client);
///     let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
///     consumer.run(shutdown_rx).await?;
///     Ok(())
/// }
/// ```
pub struct Consumer<P, C> {
    config: ConsumerConfig,
    processor: Arc<P>,
    client: Arc<C>,
    backoff: Arc<dyn Backoff>,
    monitoring_tx: Option<mpsc::Sender<ProcessingEvent>>,
}

impl<P, C> Consumer<P, C>
where
    P: RecordProcessor + 'static,
    C: KinesisClientTrait + 'static,
{
    /// Returns the consumer and, when monitoring is enabled, the receiving end
    /// of its event channel
    pub fn new(
        config: ConsumerConfig,
        processor: P,
        client: C,
    ) -> (Self, Option<mpsc::Receiver<ProcessingEvent>>) {
        let (monitoring_tx, monitoring_rx) = if config.monitoring.enabled {
            let (tx, rx) = mpsc::channel(config.monitoring.channel_size.max(1));
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };

        let backoff = Arc::new(
            ExponentialBackoff::builder()
                .initial_delay(config.throttle_initial_delay)
                .max_delay(config.throttle_max_delay)
                .jitter(config.throttle_jitter)
                .build(),
        );

        let consumer = Self {
            config,
            processor: Arc::new(processor),
            client: Arc::new(client),
            backoff,
            monitoring_tx,
        };
        (consumer, monitoring_rx)
    }

    /// Replace the throttle backoff derived from the config
    pub fn with_backoff(mut self, backoff: impl Backoff + 'static) -> Self {
        self.backoff = Arc::new(backoff);
        self
    }

    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }

    /// Tail the stream until `shutdown` publishes `true`.
    ///
    /// Returns `Ok(())` after shutdown once every reader has stopped. Errors
    /// are a topology listing failure, an invalid config, or, under
    /// [`ReaderFailurePolicy::Abort`], the first reader failure.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        self.config.validate()?;
        info!(stream = %self.config.stream_name, "Starting consumer");

        let ctx = Arc::new(ReaderContext {
            processor: self.processor.clone(),
            client: self.client.clone(),
            stream_name: self.config.stream_name.clone(),
            batch_size: self.config.batch_size,
            empty_poll_delay: self.config.empty_poll_delay,
            backoff: self.backoff.clone(),
            monitoring_tx: self.monitoring_tx.clone(),
        });
        let (exit_tx, exit_rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = watch::channel(false);

        let mut monitor = Monitor {
            ctx,
            tracker: ShardTracker::new(),
            exit_tx,
            exit_rx,
            stop_tx,
            stop_rx,
            running: 0,
            topology_throttle: Throttle::new(self.backoff.clone()),
        };

        let result = monitor.run(self.config.failure_policy, &mut shutdown).await;
        match &result {
            Ok(()) => info!(stream = %self.config.stream_name, "Consumer shutdown complete"),
            Err(e) => error!(stream = %self.config.stream_name, error = %e, "Consumer stopped"),
        }
        result
    }
}

/// State owned by the single task draining the completion channel
struct Monitor<P, C> {
    ctx: Arc<ReaderContext<P, C>>,
    tracker: ShardTracker,
    exit_tx: mpsc::UnboundedSender<ShardExit>,
    exit_rx: mpsc::UnboundedReceiver<ShardExit>,
    stop_tx: watch::Sender<bool>,
    stop_rx: watch::Receiver<bool>,
    /// Readers launched whose exit has not been received
    running: usize,
    topology_throttle: Throttle,
}

impl<P, C> Monitor<P, C>
where
    P: RecordProcessor + 'static,
    C: KinesisClientTrait + 'static,
{
    async fn run(
        &mut self,
        policy: ReaderFailurePolicy,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<()> {
        let Some(shards) = self.list_shards(shutdown).await? else {
            return Ok(());
        };
        let leaves = leaf_shards(&shards);
        info!(
            stream = %self.ctx.stream_name,
            shards = shards.len(),
            open = leaves.len(),
            "Discovered stream topology"
        );
        for shard in leaves {
            self.launch(shard, IteratorType::Latest);
        }

        loop {
            let exit = tokio::select! {
                biased;
                _ = shutdown_requested(shutdown) => None,
                exit = self.exit_rx.recv() => exit,
            };
            // The monitor holds a sender, so a closed channel only means shutdown
            let Some(ShardExit { shard_id, outcome }) = exit else {
                info!("Shutdown signal received");
                self.stop_readers().await;
                return Ok(());
            };
            self.running = self.running.saturating_sub(1);

            match outcome {
                ReaderOutcome::Drained => {
                    self.tracker.mark_completed(&shard_id);
                    if let Err(e) = self.launch_children(&shard_id, shutdown).await {
                        self.stop_readers().await;
                        return Err(e);
                    }
                    if *shutdown.borrow() {
                        info!("Shutdown signal received");
                        self.stop_readers().await;
                        return Ok(());
                    }
                }
                ReaderOutcome::Failed(e) => match policy {
                    ReaderFailurePolicy::HaltShard => {
                        error!(
                            shard_id = %shard_id,
                            error = %e,
                            active = self.tracker.active(),
                            "Halting shard after reader failure"
                        );
                    }
                    ReaderFailurePolicy::Abort => {
                        error!(shard_id = %shard_id, error = %e, "Aborting consumer after reader failure");
                        self.stop_readers().await;
                        return Err(ConsumerError::ReaderFailed {
                            shard_id,
                            message: e.to_string(),
                        });
                    }
                },
                ReaderOutcome::Interrupted => {
                    debug!(shard_id = %shard_id, "Reader interrupted");
                }
            }
        }
    }

    /// Re-list the stream and launch children of `completed` that are now ready
    async fn launch_children(
        &mut self,
        completed: &str,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<()> {
        let Some(shards) = self.list_shards(shutdown).await? else {
            return Ok(());
        };

        let ready: Vec<Shard> = self
            .tracker
            .ready_children(completed, &shards)
            .into_iter()
            .cloned()
            .collect();

        if ready.is_empty() {
            debug!(shard_id = %completed, "No child shards ready to start");
        }
        for child in &ready {
            info!(
                parent = %completed,
                shard_id = %child.shard_id(),
                "Starting child shard"
            );
            self.launch(child, IteratorType::TrimHorizon);
        }
        Ok(())
    }

    fn launch(&mut self, shard: &Shard, iterator_type: IteratorType) {
        if !self.tracker.mark_launched(shard.shard_id()) {
            debug!(shard_id = %shard.shard_id(), "Reader already launched, skipping");
            return;
        }
        let reader = ShardReader::new(
            self.ctx.clone(),
            shard.shard_id(),
            iterator_type,
            self.stop_rx.clone(),
        );
        // Readers are never joined; their exit arrives on the channel
        drop(reader.spawn(self.exit_tx.clone()));
        self.running += 1;
    }

    /// Fetch the topology, backing off while rate limited.
    ///
    /// `Ok(None)` when shutdown arrives first.
    async fn list_shards(
        &mut self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<Option<Vec<Shard>>> {
        loop {
            let ctx = self.ctx.clone();
            let result = tokio::select! {
                biased;
                _ = shutdown_requested(shutdown) => return Ok(None),
                result = ctx.client.list_shards(&ctx.stream_name) => result,
            };

            match result {
                Ok(shards) => {
                    self.topology_throttle.reset();
                    return Ok(Some(shards));
                }
                Err(e) if e.is_retryable() => {
                    warn!(
                        stream = %ctx.stream_name,
                        delay_ms = self.topology_throttle.current_delay().as_millis() as u64,
                        error = %e,
                        "Shard listing throttled, backing off"
                    );
                    if self.topology_throttle.wait_or_shutdown(shutdown).await.is_none() {
                        return Ok(None);
                    }
                }
                Err(e) => {
                    error!(stream = %ctx.stream_name, error = %e, "Failed to list shards");
                    return Err(ConsumerError::Topology(e));
                }
            }
        }
    }

    /// Signal every reader and wait until each has reported its exit
    async fn stop_readers(&mut self) {
        if self.stop_tx.send(true).is_err() {
            debug!("No readers listening for stop signal");
        }
        while self.running > 0 {
            match self.exit_rx.recv().await {
                Some(exit) => {
                    self.running -= 1;
                    debug!(shard_id = %exit.shard_id, outcome = ?exit.outcome, "Reader stopped");
                }
                None => break,
            }
        }
    }
}
