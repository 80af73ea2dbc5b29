//! Optional event stream describing what the consumer's readers are doing
//!
//! When enabled in [`ConsumerConfig`](crate::consumer::ConsumerConfig), the
//! consumer hands back the receiving end of a bounded channel of
//! [`ProcessingEvent`]s. [`MetricsAggregator`] folds them into per-shard counters.

mod metrics;
mod types;

pub use metrics::{MetricsAggregator, ShardMetrics};
pub use types::{
    IteratorEventType, MonitoringConfig, ProcessingEvent, ProcessingEventType, ShardEventType,
};
