use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::client::KinesisClientTrait;
use crate::error::KinesisClientError;
use crate::processor::RecordProcessor;
use crate::types::{IteratorType, Message, PutResultEntry, Record, RecordBatch, Shard};

/// A call the mock client received, in arrival order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCall {
    ListShards,
    GetShardIterator {
        shard_id: String,
        iterator_type: IteratorType,
    },
    GetRecords {
        shard_id: String,
    },
    PutRecords {
        count: usize,
    },
}

/// One scripted poll result
pub type Page = Result<Vec<Record>, KinesisClientError>;

#[derive(Debug, Default)]
struct MockShard {
    pages: VecDeque<Page>,
    closed: bool,
}

#[derive(Debug, Default)]
struct MockState {
    list_shards_responses: VecDeque<Result<Vec<Shard>, KinesisClientError>>,
    iterator_errors: HashMap<String, VecDeque<KinesisClientError>>,
    shards: HashMap<String, MockShard>,
    put_responses: VecDeque<Result<Vec<PutResultEntry>, KinesisClientError>>,
    submissions: Vec<Vec<Message>>,
    accepted: Vec<Message>,
    calls: Vec<ClientCall>,
    sequence: u64,
}

/// Scripted stand-in for the stream backend.
///
/// Iterators are the shard id itself. Each poll pops one scripted page; once
/// a closed shard has no pages left the poll carries no next iterator. Open
/// shards keep returning empty pages.
#[derive(Debug, Default, Clone)]
pub struct MockKinesisClient {
    state: Arc<Mutex<MockState>>,
}

impl MockKinesisClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a topology listing. The last queued listing repeats.
    pub fn mock_list_shards(&self, shards: Vec<Shard>) {
        self.state.lock().list_shards_responses.push_back(Ok(shards));
    }

    pub fn mock_list_shards_error(&self, error: KinesisClientError) {
        self.state.lock().list_shards_responses.push_back(Err(error));
    }

    /// Script the polls of a shard, replacing any earlier script
    pub fn mock_shard_pages(&self, shard_id: &str, pages: Vec<Page>, closed: bool) {
        self.state.lock().shards.insert(
            shard_id.to_string(),
            MockShard {
                pages: pages.into(),
                closed,
            },
        );
    }

    /// Append one page of records to a shard
    pub fn push_records(&self, shard_id: &str, records: Vec<Record>) {
        self.state
            .lock()
            .shards
            .entry(shard_id.to_string())
            .or_default()
            .pages
            .push_back(Ok(records));
    }

    pub fn close_shard(&self, shard_id: &str) {
        self.state
            .lock()
            .shards
            .entry(shard_id.to_string())
            .or_default()
            .closed = true;
    }

    /// Fail the next iterator request for a shard
    pub fn mock_get_iterator_error(&self, shard_id: &str, error: KinesisClientError) {
        self.state
            .lock()
            .iterator_errors
            .entry(shard_id.to_string())
            .or_default()
            .push_back(error);
    }

    /// Queue the result of the next submission.
    ///
    /// Entries beyond the end of a scripted response count as accepted;
    /// with nothing queued every message is accepted.
    pub fn mock_put_response(&self, response: Result<Vec<PutResultEntry>, KinesisClientError>) {
        self.state.lock().put_responses.push_back(response);
    }

    pub fn calls(&self) -> Vec<ClientCall> {
        self.state.lock().calls.clone()
    }

    pub fn get_records_calls(&self, shard_id: &str) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| matches!(c, ClientCall::GetRecords { shard_id: s } if s == shard_id))
            .count()
    }

    /// Iterator requests in arrival order
    pub fn iterator_requests(&self) -> Vec<(String, IteratorType)> {
        self.state
            .lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                ClientCall::GetShardIterator {
                    shard_id,
                    iterator_type,
                } => Some((shard_id.clone(), *iterator_type)),
                _ => None,
            })
            .collect()
    }

    /// Every batch submitted, in order
    pub fn submissions(&self) -> Vec<Vec<Message>> {
        self.state.lock().submissions.clone()
    }

    /// Messages the mock accepted across all submissions
    pub fn accepted(&self) -> Vec<Message> {
        self.state.lock().accepted.clone()
    }
}

#[async_trait]
impl KinesisClientTrait for MockKinesisClient {
    async fn list_shards(&self, _stream_name: &str) -> Result<Vec<Shard>, KinesisClientError> {
        let mut state = self.state.lock();
        state.calls.push(ClientCall::ListShards);

        let responses = &mut state.list_shards_responses;
        if responses.len() > 1 {
            responses.pop_front().unwrap_or_else(|| Ok(vec![]))
        } else {
            responses.front().cloned().unwrap_or_else(|| Ok(vec![]))
        }
    }

    async fn get_shard_iterator(
        &self,
        _stream_name: &str,
        shard_id: &str,
        iterator_type: IteratorType,
    ) -> Result<String, KinesisClientError> {
        let mut state = self.state.lock();
        state.calls.push(ClientCall::GetShardIterator {
            shard_id: shard_id.to_string(),
            iterator_type,
        });

        if let Some(error) = state
            .iterator_errors
            .get_mut(shard_id)
            .and_then(VecDeque::pop_front)
        {
            return Err(error);
        }
        Ok(shard_id.to_string())
    }

    async fn get_records(
        &self,
        iterator: &str,
        _limit: Option<i32>,
    ) -> Result<RecordBatch, KinesisClientError> {
        // Let other readers run between polls of an always-ready mock
        tokio::task::yield_now().await;

        let mut state = self.state.lock();
        state.calls.push(ClientCall::GetRecords {
            shard_id: iterator.to_string(),
        });

        let shard = state.shards.entry(iterator.to_string()).or_default();
        let records = match shard.pages.pop_front() {
            Some(Err(e)) => return Err(e),
            Some(Ok(records)) => records,
            None => Vec::new(),
        };
        let next_iterator = if shard.closed && shard.pages.is_empty() {
            None
        } else {
            Some(iterator.to_string())
        };

        Ok(RecordBatch {
            records,
            next_iterator,
        })
    }

    async fn put_records(
        &self,
        _stream_name: &str,
        messages: &[Message],
    ) -> Result<Vec<PutResultEntry>, KinesisClientError> {
        let mut state = self.state.lock();
        state.calls.push(ClientCall::PutRecords {
            count: messages.len(),
        });
        state.submissions.push(messages.to_vec());

        let scripted = match state.put_responses.pop_front() {
            Some(Err(e)) => return Err(e),
            Some(Ok(entries)) => entries,
            None => Vec::new(),
        };

        let mut results = Vec::with_capacity(messages.len());
        for (i, message) in messages.iter().enumerate() {
            let entry = match scripted.get(i) {
                Some(entry) => entry.clone(),
                None => {
                    state.sequence += 1;
                    PutResultEntry::success(state.sequence.to_string(), "shard-0")
                }
            };
            if !entry.is_failure() {
                state.accepted.push(message.clone());
            }
            results.push(entry);
        }
        Ok(results)
    }
}

/// Record processor that keeps every batch it receives
#[derive(Debug, Default, Clone)]
pub struct MockRecordProcessor {
    batches: Arc<Mutex<Vec<(String, Vec<Record>)>>>,
    delay: Arc<Mutex<Option<Duration>>>,
}

impl MockRecordProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long inside every call
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    pub fn batches(&self) -> Vec<(String, Vec<Record>)> {
        self.batches.lock().clone()
    }

    pub fn batch_count(&self) -> usize {
        self.batches.lock().len()
    }

    pub fn record_count(&self) -> usize {
        self.batches.lock().iter().map(|(_, r)| r.len()).sum()
    }

    /// Payloads delivered for one shard, as UTF-8, in delivery order
    pub fn payloads_for(&self, shard_id: &str) -> Vec<String> {
        self.batches
            .lock()
            .iter()
            .filter(|(s, _)| s == shard_id)
            .flat_map(|(_, records)| records.iter())
            .map(|r| String::from_utf8_lossy(r.data()).into_owned())
            .collect()
    }

    /// Shard ids in the order their first batch arrived
    pub fn shard_order(&self) -> Vec<String> {
        let mut order: Vec<String> = Vec::new();
        for (shard_id, _) in self.batches.lock().iter() {
            if !order.contains(shard_id) {
                order.push(shard_id.clone());
            }
        }
        order
    }

    pub async fn wait_for_batches(&self, count: usize, timeout: Duration) -> anyhow::Result<()> {
        self.wait_until(timeout, || self.batch_count() >= count)
            .await
            .map_err(|_| anyhow::anyhow!("expected {} batches, saw {}", count, self.batch_count()))
    }

    pub async fn wait_for_records(&self, count: usize, timeout: Duration) -> anyhow::Result<()> {
        self.wait_until(timeout, || self.record_count() >= count)
            .await
            .map_err(|_| anyhow::anyhow!("expected {} records, saw {}", count, self.record_count()))
    }

    async fn wait_until<F>(&self, timeout: Duration, check: F) -> anyhow::Result<()>
    where
        F: Fn() -> bool,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        while !check() {
            if tokio::time::Instant::now() > deadline {
                anyhow::bail!("condition not met within {:?}", timeout);
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        Ok(())
    }
}

#[async_trait]
impl RecordProcessor for MockRecordProcessor {
    async fn process_records(&self, shard_id: &str, records: &[Record]) {
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        debug!(shard_id = %shard_id, count = records.len(), "Mock processor received batch");
        self.batches
            .lock()
            .push((shard_id.to_string(), records.to_vec()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::TestUtils;

    #[tokio::test]
    async fn test_closed_shard_ends_with_last_page() -> anyhow::Result<()> {
        let client = MockKinesisClient::new();
        client.mock_shard_pages(
            "shard-1",
            vec![Ok(TestUtils::create_test_records(2))],
            true,
        );

        let batch = client.get_records("shard-1", None).await?;
        assert_eq!(batch.records.len(), 2);
        assert_eq!(batch.next_iterator, None);
        Ok(())
    }

    #[tokio::test]
    async fn test_open_shard_keeps_iterating() -> anyhow::Result<()> {
        let client = MockKinesisClient::new();
        client.push_records("shard-1", TestUtils::create_test_records(1));

        let first = client.get_records("shard-1", None).await?;
        let second = client.get_records("shard-1", None).await?;
        assert_eq!(first.records.len(), 1);
        assert!(second.records.is_empty());
        assert_eq!(second.next_iterator.as_deref(), Some("shard-1"));

        client.close_shard("shard-1");
        assert_eq!(client.get_records("shard-1", None).await?.next_iterator, None);
        Ok(())
    }

    #[tokio::test]
    async fn test_last_listing_repeats() -> anyhow::Result<()> {
        let client = MockKinesisClient::new();
        client.mock_list_shards(vec![TestUtils::create_test_shard("a")]);
        client.mock_list_shards(vec![TestUtils::create_test_shard("b")]);

        assert_eq!(client.list_shards("s").await?[0].shard_id, "a");
        assert_eq!(client.list_shards("s").await?[0].shard_id, "b");
        assert_eq!(client.list_shards("s").await?[0].shard_id, "b");
        Ok(())
    }

    #[tokio::test]
    async fn test_put_marks_scripted_failures() -> anyhow::Result<()> {
        let client = MockKinesisClient::new();
        client.mock_put_response(Ok(vec![
            PutResultEntry::success("1", "shard-0"),
            PutResultEntry::failure("InternalFailure", "try again"),
        ]));
        let messages = vec![
            Message::new("a", &b"1"[..])?,
            Message::new("b", &b"2"[..])?,
            Message::new("c", &b"3"[..])?,
        ];

        let results = client.put_records("s", &messages).await?;
        assert_eq!(results.len(), 3);
        assert!(results[1].is_failure());
        assert!(!results[2].is_failure());

        let accepted: Vec<String> = client
            .accepted()
            .iter()
            .map(|m| m.partition_key().to_string())
            .collect();
        assert_eq!(accepted, vec!["a", "c"]);
        assert_eq!(client.submissions().len(), 1);
        Ok(())
    }
}
