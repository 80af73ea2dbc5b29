//! Kinesis Toolkit - tail and publish to AWS Kinesis streams
//!
//! The [`Consumer`] tails every open shard of a stream and follows resharding,
//! starting child shards once their parents are drained. The [`Producer`]
//! buffers validated messages into batch submissions and retries rejected
//! entries until they are accepted. Both are written against
//! [`KinesisClientTrait`], implemented for the AWS SDK client.

pub mod client;
pub mod consumer;
pub mod error;
pub mod monitoring;
pub mod processor;
pub mod producer;
pub mod retry;
pub mod topology;
pub mod types;

// Make test utilities available for integration tests
#[cfg(any(test, feature = "test-utils"))]
pub mod test;

pub use client::KinesisClientTrait;
pub use consumer::{Consumer, ConsumerConfig, ReaderFailurePolicy};
pub use error::{ConsumerError, KinesisClientError, ProducerError, Result, ValidationError, ValidationErrors};
pub use processor::{FnProcessor, RecordProcessor};
pub use producer::{Producer, ProducerConfig, SendSummary, MAX_SEND_SIZE};
pub use retry::{Backoff, ExponentialBackoff, FixedBackoff};
pub use types::{FailedPut, IteratorType, Message, Record, Shard};
