//! The caller's side of the consumer: what happens to records once read

use async_trait::async_trait;
use std::sync::Arc;

use crate::types::Record;

/// Trait for implementing record processing logic
///
/// The consumer calls [`process_records`](RecordProcessor::process_records)
/// once per non-empty poll, from one task per shard. Calls for the same shard
/// never overlap and arrive in sequence number order; calls for different
/// shards can run concurrently, so implementations must be safe to share.
///
/// # Examples
///
/// ```rust
/// use kinesis_toolkit::{Record, RecordProcessor};
///
/// struct Printer;
///
/// #[async_trait::async_trait]
/// impl RecordProcessor for Printer {
///     async fn process_records(&self, shard_id: &str, records: &[Record]) {
///         for record in records {
///             println!("{}: {}", shard_id, String::from_utf8_lossy(record.data()));
///         }
///     }
/// }
/// ```
#[async_trait]
pub trait RecordProcessor: Send + Sync {
    async fn process_records(&self, shard_id: &str, records: &[Record]);
}

#[async_trait]
impl<P: RecordProcessor + ?Sized> RecordProcessor for Arc<P> {
    async fn process_records(&self, shard_id: &str, records: &[Record]) {
        (**self).process_records(shard_id, records).await
    }
}

/// Adapter that lets a plain closure act as a [`RecordProcessor`]
pub struct FnProcessor<F>(pub F);

#[async_trait]
impl<F> RecordProcessor for FnProcessor<F>
where
    F: Fn(&str, &[Record]) + Send + Sync,
{
    async fn process_records(&self, shard_id: &str, records: &[Record]) {
        (self.0)(shard_id, records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[tokio::test]
    async fn test_fn_processor_sees_batches_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let processor = FnProcessor(move |shard_id: &str, records: &[Record]| {
            for record in records {
                sink.lock()
                    .push(format!("{}:{}", shard_id, record.sequence_number()));
            }
        });

        let records = vec![
            Record::new("pk", &b"a"[..], "1"),
            Record::new("pk", &b"b"[..], "2"),
        ];
        processor.process_records("shard-1", &records).await;

        let shared: Arc<dyn RecordProcessor> = Arc::new(processor);
        shared.process_records("shard-2", &records[..1]).await;

        assert_eq!(
            *seen.lock(),
            vec!["shard-1:1", "shard-1:2", "shard-2:1"]
        );
    }
}
