//! The backend capability the consumer and producer are written against.
//!
//! [`KinesisClientTrait`] exposes exactly the four operations both halves
//! need. The AWS SDK client implements it for production use; the
//! `test-utils` feature provides a scripted stub.

use async_trait::async_trait;
use aws_sdk_kinesis::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_kinesis::types as kinesis;
use aws_sdk_kinesis::Client;
use aws_smithy_types::Blob;
use bytes::Bytes;
use tracing::{debug, trace};

use crate::error::KinesisClientError;
use crate::types::{IteratorType, Message, PutResultEntry, Record, RecordBatch, Shard};

#[async_trait]
pub trait KinesisClientTrait: Send + Sync {
    /// Every shard of the stream, open and closed, following pagination to the end.
    async fn list_shards(&self, stream_name: &str) -> Result<Vec<Shard>, KinesisClientError>;

    async fn get_shard_iterator(
        &self,
        stream_name: &str,
        shard_id: &str,
        iterator_type: IteratorType,
    ) -> Result<String, KinesisClientError>;

    /// One poll. Rate limiting comes back as [`KinesisClientError::ThroughputExceeded`].
    async fn get_records(
        &self,
        iterator: &str,
        limit: Option<i32>,
    ) -> Result<RecordBatch, KinesisClientError>;

    /// Submit a batch. The result has one entry per message, in order.
    async fn put_records(
        &self,
        stream_name: &str,
        messages: &[Message],
    ) -> Result<Vec<PutResultEntry>, KinesisClientError>;
}

fn classify<E, R>(err: SdkError<E, R>) -> KinesisClientError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    let message = DisplayErrorContext(&err).to_string();
    match &err {
        SdkError::TimeoutError(_) => KinesisClientError::Timeout(message),
        SdkError::DispatchFailure(_) => KinesisClientError::ConnectionError(message),
        _ => KinesisClientError::from_code(err.code(), message),
    }
}

impl From<&kinesis::Shard> for Shard {
    fn from(shard: &kinesis::Shard) -> Self {
        Shard {
            shard_id: shard.shard_id().to_string(),
            parent_one: shard.parent_shard_id().map(String::from),
            parent_two: shard.adjacent_parent_shard_id().map(String::from),
        }
    }
}

impl From<&kinesis::Record> for Record {
    fn from(record: &kinesis::Record) -> Self {
        Record {
            partition_key: record.partition_key().to_string(),
            data: Bytes::copy_from_slice(record.data().as_ref()),
            sequence_number: record.sequence_number().to_string(),
        }
    }
}

impl From<IteratorType> for kinesis::ShardIteratorType {
    fn from(iterator_type: IteratorType) -> Self {
        match iterator_type {
            IteratorType::Latest => kinesis::ShardIteratorType::Latest,
            IteratorType::TrimHorizon => kinesis::ShardIteratorType::TrimHorizon,
        }
    }
}

#[async_trait]
impl KinesisClientTrait for Client {
    async fn list_shards(&self, stream_name: &str) -> Result<Vec<Shard>, KinesisClientError> {
        let mut shards = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            // The stream name and a continuation token are mutually exclusive
            let request = match next_token.take() {
                Some(token) => self.list_shards().next_token(token),
                None => self.list_shards().stream_name(stream_name),
            };
            let response = request.send().await.map_err(classify)?;

            shards.extend(response.shards().iter().map(Shard::from));
            trace!(stream = %stream_name, count = shards.len(), "Listed shard page");

            match response.next_token() {
                Some(token) => next_token = Some(token.to_string()),
                None => break,
            }
        }

        debug!(stream = %stream_name, count = shards.len(), "Listed shards");
        Ok(shards)
    }

    async fn get_shard_iterator(
        &self,
        stream_name: &str,
        shard_id: &str,
        iterator_type: IteratorType,
    ) -> Result<String, KinesisClientError> {
        let response = self
            .get_shard_iterator()
            .stream_name(stream_name)
            .shard_id(shard_id)
            .shard_iterator_type(iterator_type.into())
            .send()
            .await
            .map_err(classify)?;

        response
            .shard_iterator()
            .map(String::from)
            .ok_or_else(|| KinesisClientError::Other(format!("No iterator returned for shard {}", shard_id)))
    }

    async fn get_records(
        &self,
        iterator: &str,
        limit: Option<i32>,
    ) -> Result<RecordBatch, KinesisClientError> {
        let response = self
            .get_records()
            .shard_iterator(iterator)
            .set_limit(limit)
            .send()
            .await
            .map_err(classify)?;

        Ok(RecordBatch {
            records: response.records().iter().map(Record::from).collect(),
            next_iterator: response.next_shard_iterator().map(String::from),
        })
    }

    async fn put_records(
        &self,
        stream_name: &str,
        messages: &[Message],
    ) -> Result<Vec<PutResultEntry>, KinesisClientError> {
        let entries = messages
            .iter()
            .map(|m| {
                kinesis::PutRecordsRequestEntry::builder()
                    .partition_key(m.partition_key())
                    .data(Blob::new(m.data().to_vec()))
                    .build()
                    .map_err(|e| KinesisClientError::InvalidArgument(e.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let response = self
            .put_records()
            .stream_name(stream_name)
            .set_records(Some(entries))
            .send()
            .await
            .map_err(classify)?;

        Ok(response
            .records()
            .iter()
            .map(|entry| PutResultEntry {
                sequence_number: entry.sequence_number().map(String::from),
                shard_id: entry.shard_id().map(String::from),
                error_code: entry.error_code().map(String::from),
                error_message: entry.error_message().map(String::from),
            })
            .collect())
    }
}

/// Names of every stream in the account, following pagination to the end.
pub async fn list_streams(client: &Client) -> Result<Vec<String>, KinesisClientError> {
    let mut streams: Vec<String> = Vec::new();

    loop {
        let response = client
            .list_streams()
            .set_exclusive_start_stream_name(streams.last().cloned())
            .send()
            .await
            .map_err(classify)?;

        streams.extend(response.stream_names().iter().cloned());

        if !response.has_more_streams() || response.stream_names().is_empty() {
            break;
        }
    }

    Ok(streams)
}
