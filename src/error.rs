//! Error types for the consumer, the producer and the client seam

use std::fmt;
use thiserror::Error;
use tokio::task::JoinError;

use crate::types::FailedPut;

/// Errors surfaced by a [`KinesisClientTrait`](crate::client::KinesisClientTrait) implementation
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KinesisClientError {
    #[error("Provisioned throughput exceeded: {0}")]
    ThroughputExceeded(String),

    #[error("Iterator expired")]
    ExpiredIterator,

    #[error("Access denied")]
    AccessDenied,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("{0}")]
    Other(String),
}

impl KinesisClientError {
    /// Rate limiting is the only condition worth retrying blindly.
    pub fn is_retryable(&self) -> bool {
        matches!(self, KinesisClientError::ThroughputExceeded(_))
    }

    /// Map a service error code onto a variant.
    pub fn from_code(code: Option<&str>, message: String) -> Self {
        match code {
            Some("ProvisionedThroughputExceededException") | Some("LimitExceededException") => {
                KinesisClientError::ThroughputExceeded(message)
            }
            Some("ExpiredIteratorException") => KinesisClientError::ExpiredIterator,
            Some("AccessDeniedException") => KinesisClientError::AccessDenied,
            Some("InvalidArgumentException") => KinesisClientError::InvalidArgument(message),
            Some("ResourceNotFoundException") => KinesisClientError::ResourceNotFound(message),
            _ => KinesisClientError::Other(message),
        }
    }
}

/// Main error type for consumer operations
#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error("Failed to list shards: {0}")]
    Topology(#[source] KinesisClientError),

    #[error("Failed to get iterator for shard {shard_id}: {source}")]
    GetIteratorFailed {
        shard_id: String,
        #[source]
        source: KinesisClientError,
    },

    #[error("Failed to get records for shard {shard_id}: {source}")]
    GetRecordsFailed {
        shard_id: String,
        #[source]
        source: KinesisClientError,
    },

    #[error("Reader for shard {shard_id} failed: {message}")]
    ReaderFailed { shard_id: String, message: String },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ConsumerError {
    /// The shard a reader-level error belongs to, if any.
    pub fn shard_id(&self) -> Option<&str> {
        match self {
            ConsumerError::GetIteratorFailed { shard_id, .. }
            | ConsumerError::GetRecordsFailed { shard_id, .. }
            | ConsumerError::ReaderFailed { shard_id, .. } => Some(shard_id),
            _ => None,
        }
    }
}

impl From<JoinError> for ConsumerError {
    fn from(err: JoinError) -> Self {
        ConsumerError::Other(err.into())
    }
}

/// A single rule a producer message broke
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Partition keys may not be empty")]
    EmptyPartitionKey,

    #[error("Partition key must be valid unicode")]
    InvalidUnicode,

    #[error("Partition key must be at most 256 bytes")]
    PartitionKeyTooLong,

    #[error("Value must not be empty")]
    EmptyValue,
}

/// Every rule a message broke, in check order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationErrors(pub Vec<ValidationError>);

impl ValidationErrors {
    pub fn contains(&self, error: &ValidationError) -> bool {
        self.0.contains(error)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ValidationError> {
        self.0.iter()
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} validation error(s): ", self.0.len())?;
        for (i, err) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{}", err)?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationErrors {}

/// Main error type for producer operations
#[derive(Debug, Error)]
pub enum ProducerError {
    #[error("Invalid message: {0}")]
    Validation(#[from] ValidationErrors),

    #[error("Batch submission failed, {} message(s) not sent: {source}", .failures.len())]
    Transport {
        failures: Vec<FailedPut>,
        #[source]
        source: KinesisClientError,
    },

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl ProducerError {
    /// Messages that were buffered when a submission failed outright.
    pub fn failures(&self) -> &[FailedPut] {
        match self {
            ProducerError::Transport { failures, .. } => failures,
            _ => &[],
        }
    }
}

/// Result type for consumer operations
pub type Result<T> = std::result::Result<T, ConsumerError>;
