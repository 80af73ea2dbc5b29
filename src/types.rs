//! Domain types shared by the consumer, the producer and the client seam.

use bytes::Bytes;
use std::fmt;

use crate::error::{ValidationError, ValidationErrors};

/// Maximum length of a partition key, in bytes.
pub const MAX_PARTITION_KEY_LEN: usize = 256;

/// One shard of a stream, as reported by a topology listing.
///
/// A shard with a `parent_two` was created by merging its two parents. A shard
/// is open exactly when no other shard in the same listing names it as a parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shard {
    pub shard_id: String,
    pub parent_one: Option<String>,
    pub parent_two: Option<String>,
}

impl Shard {
    pub fn new(shard_id: impl Into<String>) -> Self {
        Self {
            shard_id: shard_id.into(),
            parent_one: None,
            parent_two: None,
        }
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent_one = Some(parent.into());
        self
    }

    pub fn with_adjacent_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent_two = Some(parent.into());
        self
    }

    pub fn shard_id(&self) -> &str {
        &self.shard_id
    }

    /// Both parent ids, skipping absent ones.
    pub fn parents(&self) -> impl Iterator<Item = &str> {
        self.parent_one
            .as_deref()
            .into_iter()
            .chain(self.parent_two.as_deref())
    }

    pub fn has_parent(&self, shard_id: &str) -> bool {
        self.parents().any(|p| p == shard_id)
    }
}

/// Where a freshly acquired iterator starts reading within its shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IteratorType {
    /// Only records written after the iterator was acquired
    Latest,
    /// From the oldest record the shard still retains
    TrimHorizon,
}

impl fmt::Display for IteratorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IteratorType::Latest => write!(f, "LATEST"),
            IteratorType::TrimHorizon => write!(f, "TRIM_HORIZON"),
        }
    }
}

/// A record read from a shard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub partition_key: String,
    pub data: Bytes,
    pub sequence_number: String,
}

impl Record {
    pub fn new(
        partition_key: impl Into<String>,
        data: impl Into<Bytes>,
        sequence_number: impl Into<String>,
    ) -> Self {
        Self {
            partition_key: partition_key.into(),
            data: data.into(),
            sequence_number: sequence_number.into(),
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn sequence_number(&self) -> &str {
        &self.sequence_number
    }
}

/// One page of a poll: the records read plus the iterator to poll next.
///
/// A `None` next iterator means the shard is closed and fully drained.
#[derive(Debug, Clone, Default)]
pub struct RecordBatch {
    pub records: Vec<Record>,
    pub next_iterator: Option<String>,
}

/// A validated key/payload pair waiting to be published.
///
/// Construction validates, so a `Message` always carries a 1-256 byte UTF-8
/// partition key and a non-empty payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    partition_key: String,
    data: Bytes,
}

impl Message {
    /// Validate a raw key and payload.
    ///
    /// Every violated rule is reported, not just the first.
    pub fn new(partition_key: impl AsRef<[u8]>, data: impl Into<Bytes>) -> Result<Self, ValidationErrors> {
        let key = partition_key.as_ref();
        let data = data.into();
        let mut errors = Vec::new();

        if key.is_empty() {
            errors.push(ValidationError::EmptyPartitionKey);
        }
        if key.len() > MAX_PARTITION_KEY_LEN {
            errors.push(ValidationError::PartitionKeyTooLong);
        }
        let key = std::str::from_utf8(key);
        if key.is_err() {
            errors.push(ValidationError::InvalidUnicode);
        }
        if data.is_empty() {
            errors.push(ValidationError::EmptyValue);
        }

        match key {
            Ok(key) if errors.is_empty() => Ok(Self {
                partition_key: key.to_string(),
                data,
            }),
            _ => Err(ValidationErrors(errors)),
        }
    }

    /// Use a line of text as both key and payload.
    ///
    /// The key is the longest prefix of at most 256 bytes that ends on a
    /// character boundary.
    pub fn from_line(line: &str) -> Result<Self, ValidationErrors> {
        let mut end = line.len().min(MAX_PARTITION_KEY_LEN);
        while !line.is_char_boundary(end) {
            end -= 1;
        }
        Self::new(&line[..end], Bytes::copy_from_slice(line.as_bytes()))
    }

    pub fn partition_key(&self) -> &str {
        &self.partition_key
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }
}

/// Outcome of one entry in a batch submission.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PutResultEntry {
    pub sequence_number: Option<String>,
    pub shard_id: Option<String>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
}

impl PutResultEntry {
    pub fn success(sequence_number: impl Into<String>, shard_id: impl Into<String>) -> Self {
        Self {
            sequence_number: Some(sequence_number.into()),
            shard_id: Some(shard_id.into()),
            ..Default::default()
        }
    }

    pub fn failure(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error_code: Some(code.into()),
            error_message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn is_failure(&self) -> bool {
        self.error_code.is_some()
    }
}

/// A message that a submission did not accept.
///
/// The error code and message are absent when the whole submission failed
/// at the transport level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedPut {
    pub message: Message,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
}

impl FailedPut {
    pub fn transport(message: Message) -> Self {
        Self {
            message,
            error_code: None,
            error_message: None,
        }
    }
}
