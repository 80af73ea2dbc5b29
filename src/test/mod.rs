//! Test utilities and mock implementations for the consumer and producer

pub mod mocks;

use std::sync::Once;

use crate::types::{Record, Shard};

static INIT: Once = Once::new();

/// Helper functions for creating test data
pub struct TestUtils;

impl TestUtils {
    /// Install a test-writer subscriber once per process
    pub fn init_logging() {
        INIT.call_once(|| {
            let filter = tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("kinesis_toolkit=debug"));
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_test_writer()
                .with_thread_ids(true)
                .with_line_number(true)
                .try_init()
                .ok();
        });
    }

    /// Create a test record with given sequence number and data
    pub fn create_test_record(sequence_number: &str, data: &[u8]) -> Record {
        Record::new("test-partition-key", data.to_vec(), sequence_number)
    }

    /// Create a vector of test records
    pub fn create_test_records(count: usize) -> Vec<Record> {
        (0..count)
            .map(|i| {
                Self::create_test_record(&format!("sequence-{}", i), format!("data-{}", i).as_bytes())
            })
            .collect()
    }

    /// Records whose payloads are the given strings, numbered from `first_sequence`
    pub fn records_from(payloads: &[&str], first_sequence: u64) -> Vec<Record> {
        payloads
            .iter()
            .zip(first_sequence..)
            .map(|(payload, seq)| Self::create_test_record(&seq.to_string(), payload.as_bytes()))
            .collect()
    }

    pub fn create_test_shard(shard_id: &str) -> Shard {
        Shard::new(shard_id)
    }

    /// A shard created by splitting `parent`
    pub fn create_child_shard(shard_id: &str, parent: &str) -> Shard {
        Shard::new(shard_id).with_parent(parent)
    }

    /// A shard created by merging `parent` and `adjacent`
    pub fn create_merged_shard(shard_id: &str, parent: &str, adjacent: &str) -> Shard {
        Shard::new(shard_id)
            .with_parent(parent)
            .with_adjacent_parent(adjacent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_test_records() {
        let records = TestUtils::create_test_records(3);
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].sequence_number(), "sequence-0");
        assert_eq!(records[2].data(), b"data-2");
        assert_eq!(records[0].partition_key, "test-partition-key");
    }

    #[test]
    fn test_records_from_payloads() {
        let records = TestUtils::records_from(&["hello", "world"], 7);
        assert_eq!(records[0].sequence_number(), "7");
        assert_eq!(records[1].sequence_number(), "8");
        assert_eq!(records[1].data(), b"world");
    }

    #[test]
    fn test_shard_builders() {
        let merged = TestUtils::create_merged_shard("c", "a", "b");
        assert_eq!(merged.parent_one.as_deref(), Some("a"));
        assert_eq!(merged.parent_two.as_deref(), Some("b"));
        assert_eq!(
            TestUtils::create_child_shard("b", "a").parent_one.as_deref(),
            Some("a")
        );
    }
}
