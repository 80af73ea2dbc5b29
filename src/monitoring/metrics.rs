use super::types::{IteratorEventType, ProcessingEvent, ProcessingEventType, ShardEventType};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, RwLock};
use tokio::time::interval;
use tracing::{debug, info, warn};

/// Holds aggregated metrics for a single shard
#[derive(Debug, Clone)]
pub struct ShardMetrics {
    pub batches_delivered: u64,
    pub records_delivered: u64,
    pub processing_time: Duration,
    pub max_batch_time: Duration,

    pub throttles: u64,
    pub throttle_time: Duration,

    pub iterator_failures: u64,
    pub completed: bool,
    pub errored: bool,

    pub window_start: Instant,
    pub last_updated: Instant,
}

impl Default for ShardMetrics {
    fn default() -> Self {
        let now = Instant::now();
        Self {
            batches_delivered: 0,
            records_delivered: 0,
            processing_time: Duration::default(),
            max_batch_time: Duration::default(),
            throttles: 0,
            throttle_time: Duration::default(),
            iterator_failures: 0,
            completed: false,
            errored: false,
            window_start: now,
            last_updated: now,
        }
    }
}

/// Aggregates monitoring events into per-shard metrics
pub struct MetricsAggregator {
    metrics: Arc<RwLock<HashMap<String, ShardMetrics>>>,
    window_duration: Duration,
    monitoring_rx: mpsc::Receiver<ProcessingEvent>,
}

impl MetricsAggregator {
    pub fn new(window_duration: Duration, monitoring_rx: mpsc::Receiver<ProcessingEvent>) -> Self {
        Self {
            metrics: Arc::new(RwLock::new(HashMap::new())),
            window_duration,
            monitoring_rx,
        }
    }

    /// Shared view of the metrics, readable while [`run`](Self::run) owns the aggregator
    pub fn metrics(&self) -> Arc<RwLock<HashMap<String, ShardMetrics>>> {
        self.metrics.clone()
    }

    /// Fold events until the channel closes, logging a summary every window
    pub async fn run(mut self) {
        let mut ticker = interval(self.window_duration);

        loop {
            tokio::select! {
                event = self.monitoring_rx.recv() => match event {
                    Some(event) => self.process_event(event).await,
                    None => {
                        debug!("Monitoring channel closed");
                        self.emit_metrics().await;
                        return;
                    }
                },
                _ = ticker.tick() => self.emit_metrics().await,
            }
        }
    }

    pub async fn process_event(&self, event: ProcessingEvent) {
        let mut metrics = self.metrics.write().await;
        let shard = metrics.entry(event.shard_id.clone()).or_default();
        shard.last_updated = Instant::now();

        match event.event_type {
            ProcessingEventType::BatchDelivered {
                record_count,
                duration,
            } => {
                shard.batches_delivered += 1;
                shard.records_delivered += record_count as u64;
                shard.processing_time += duration;
                shard.max_batch_time = shard.max_batch_time.max(duration);
            }
            ProcessingEventType::Throttled { delay, .. } => {
                shard.throttles += 1;
                shard.throttle_time += delay;
            }
            ProcessingEventType::Iterator {
                event_type: IteratorEventType::Failed,
                ..
            } => {
                shard.iterator_failures += 1;
            }
            ProcessingEventType::Iterator { .. } => {}
            ProcessingEventType::ShardEvent { event_type, details } => match event_type {
                ShardEventType::Completed => shard.completed = true,
                ShardEventType::Error => {
                    shard.errored = true;
                    warn!(
                        shard_id = %event.shard_id,
                        details = ?details,
                        "Shard reader reported an error"
                    );
                }
                ShardEventType::Started | ShardEventType::Interrupted => {}
            },
        }
    }

    pub async fn snapshot(&self) -> HashMap<String, ShardMetrics> {
        self.metrics.read().await.clone()
    }

    async fn emit_metrics(&self) {
        let metrics = self.metrics.read().await;
        for (shard_id, m) in metrics.iter() {
            info!(
                shard_id = %shard_id,
                batches = m.batches_delivered,
                records = m.records_delivered,
                throttles = m.throttles,
                throttle_ms = m.throttle_time.as_millis() as u64,
                completed = m.completed,
                errored = m.errored,
                "Shard metrics"
            );
        }
    }
}
