#![allow(dead_code)]

use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use kinesis_toolkit::monitoring::{MonitoringConfig, ProcessingEvent, ShardEventType};
use kinesis_toolkit::test::mocks::{MockKinesisClient, MockRecordProcessor};
use kinesis_toolkit::{Consumer, ConsumerConfig, FixedBackoff, RecordProcessor, Result};

pub const TIMEOUT: Duration = Duration::from_secs(5);

pub fn create_test_config() -> ConsumerConfig {
    ConsumerConfig {
        stream_name: "test-stream".to_string(),
        empty_poll_delay: Duration::from_millis(5),
        monitoring: MonitoringConfig {
            enabled: true,
            channel_size: 1000,
        },
        ..Default::default()
    }
}

/// A consumer running on its own task
pub struct RunningConsumer {
    pub handle: JoinHandle<Result<()>>,
    pub shutdown_tx: watch::Sender<bool>,
    pub monitoring_rx: mpsc::Receiver<ProcessingEvent>,
    events: Vec<ProcessingEvent>,
}

impl RunningConsumer {
    pub fn start(
        config: ConsumerConfig,
        client: &MockKinesisClient,
        processor: &MockRecordProcessor,
    ) -> anyhow::Result<Self> {
        Self::start_with(config, client, processor.clone())
    }

    /// Like [`RunningConsumer::start`], for any processor
    pub fn start_with<P>(
        config: ConsumerConfig,
        client: &MockKinesisClient,
        processor: P,
    ) -> anyhow::Result<Self>
    where
        P: RecordProcessor + 'static,
    {
        let (consumer, monitoring_rx) = Consumer::new(config, processor, client.clone());
        let consumer = consumer.with_backoff(FixedBackoff::new(Duration::from_millis(5)));
        let monitoring_rx =
            monitoring_rx.ok_or_else(|| anyhow::anyhow!("monitoring must be enabled"))?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(async move { consumer.run(shutdown_rx).await });
        Ok(Self {
            handle,
            shutdown_tx,
            monitoring_rx,
            events: Vec::new(),
        })
    }

    /// Events received so far, including earlier calls
    pub fn events(&mut self) -> &[ProcessingEvent] {
        while let Ok(event) = self.monitoring_rx.try_recv() {
            self.events.push(event);
        }
        &self.events
    }

    pub fn shard_events(&mut self, shard_id: &str, kind: ShardEventType) -> usize {
        self.events()
            .iter()
            .filter(|e| e.shard_id == shard_id && e.is_shard_event(kind.clone()))
            .count()
    }

    /// Wait until `shard_id` has reported `kind`
    pub async fn wait_for_shard_event(
        &mut self,
        shard_id: &str,
        kind: ShardEventType,
    ) -> anyhow::Result<()> {
        let deadline = tokio::time::Instant::now() + TIMEOUT;
        while self.shard_events(shard_id, kind.clone()) == 0 {
            if tokio::time::Instant::now() > deadline {
                anyhow::bail!("{} never reported {:?}", shard_id, kind);
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        Ok(())
    }

    /// Signal shutdown and wait for `run` to return, along with every event sent
    pub async fn stop(self) -> anyhow::Result<(Result<()>, Vec<ProcessingEvent>)> {
        self.shutdown_tx.send(true)?;
        self.join().await
    }

    /// Wait for `run` to return without signalling shutdown
    pub async fn join(mut self) -> anyhow::Result<(Result<()>, Vec<ProcessingEvent>)> {
        let result = tokio::time::timeout(TIMEOUT, &mut self.handle).await??;
        self.events();
        Ok((result, self.events))
    }
}
