use std::time::{Duration, SystemTime};

use crate::types::IteratorType;

/// Configuration for the monitoring system
#[derive(Debug, Clone)]
pub struct MonitoringConfig {
    /// Whether monitoring is enabled
    pub enabled: bool,
    /// Size of the monitoring channel buffer
    pub channel_size: usize,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            channel_size: 1000,
        }
    }
}

/// Represents a monitoring event from the consumer
#[derive(Debug, Clone)]
pub struct ProcessingEvent {
    /// When the event occurred
    pub timestamp: SystemTime,
    /// ID of the shard this event relates to
    pub shard_id: String,
    /// The type of event and its details
    pub event_type: ProcessingEventType,
}

/// The different types of events that can occur while tailing
#[derive(Debug, Clone)]
pub enum ProcessingEventType {
    /// A poll returned records and the processor handled them
    BatchDelivered {
        record_count: usize,
        duration: Duration,
    },
    /// A poll was rate limited and the reader is backing off
    Throttled { attempt: u32, delay: Duration },
    ShardEvent {
        event_type: ShardEventType,
        details: Option<String>,
    },
    Iterator {
        event_type: IteratorEventType,
        error: Option<String>,
    },
}

/// Types of shard-level events
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShardEventType {
    /// A reader was launched for the shard
    Started,
    /// The shard was drained and closed
    Completed,
    /// The reader stopped on a transport failure
    Error,
    /// The reader stopped on shutdown
    Interrupted,
}

/// Types of iterator events
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IteratorEventType {
    Acquired(IteratorType),
    Failed,
}

impl ProcessingEvent {
    fn new(shard_id: String, event_type: ProcessingEventType) -> Self {
        Self {
            timestamp: SystemTime::now(),
            shard_id,
            event_type,
        }
    }

    pub fn batch_delivered(shard_id: String, record_count: usize, duration: Duration) -> Self {
        Self::new(
            shard_id,
            ProcessingEventType::BatchDelivered {
                record_count,
                duration,
            },
        )
    }

    pub fn throttled(shard_id: String, attempt: u32, delay: Duration) -> Self {
        Self::new(shard_id, ProcessingEventType::Throttled { attempt, delay })
    }

    /// Create a new shard event
    pub fn shard_event(shard_id: String, event_type: ShardEventType, details: Option<String>) -> Self {
        Self::new(
            shard_id,
            ProcessingEventType::ShardEvent {
                event_type,
                details,
            },
        )
    }

    /// Create a new iterator event
    pub fn iterator(shard_id: String, event_type: IteratorEventType, error: Option<String>) -> Self {
        Self::new(shard_id, ProcessingEventType::Iterator { event_type, error })
    }

    /// Whether this is the shard lifecycle event `kind`
    pub fn is_shard_event(&self, kind: ShardEventType) -> bool {
        matches!(&self.event_type, ProcessingEventType::ShardEvent { event_type, .. } if *event_type == kind)
    }
}
