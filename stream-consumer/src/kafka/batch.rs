use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rdkafka::message::{BorrowedMessage, Headers, Message};

use crate::kafka::types::Partition;

/// An owned record pulled from one partition of the log.
///
/// Immutable once fetched; the poller only reads it and marks its offset.
#[derive(Debug, Clone)]
pub struct FetchedRecord {
    partition: Partition,
    offset: i64,
    pub key: Option<Vec<u8>>,
    pub payload: Option<Vec<u8>>,
    /// Ordered name/value header pairs, as they appeared on the wire.
    pub headers: Vec<(String, Vec<u8>)>,
    pub timestamp: SystemTime,
}

impl FetchedRecord {
    pub fn new(
        partition: Partition,
        offset: i64,
        key: Option<Vec<u8>>,
        payload: Option<Vec<u8>>,
        headers: Vec<(String, Vec<u8>)>,
        timestamp: SystemTime,
    ) -> Self {
        Self {
            partition,
            offset,
            key,
            payload,
            headers,
            timestamp,
        }
    }

    /// Detach an owned record from a borrowed rdkafka message.
    pub fn from_borrowed_message(msg: &BorrowedMessage<'_>) -> Self {
        let timestamp = msg
            .timestamp()
            .to_millis()
            .map(|ms| UNIX_EPOCH + Duration::from_millis(ms.max(0) as u64))
            .unwrap_or_else(SystemTime::now);

        let headers: Vec<(String, Vec<u8>)> = msg
            .headers()
            .map(|hdrs| {
                hdrs.iter()
                    .filter_map(|h| h.value.map(|v| (h.key.to_string(), v.to_vec())))
                    .collect()
            })
            .unwrap_or_default();

        Self {
            partition: Partition::new(msg.topic().to_owned(), msg.partition()),
            offset: msg.offset(),
            key: msg.key().map(|k| k.to_vec()),
            payload: msg.payload().map(|p| p.to_vec()),
            headers,
            timestamp,
        }
    }

    pub fn partition(&self) -> &Partition {
        &self.partition
    }

    pub fn topic(&self) -> &str {
        self.partition.topic()
    }

    pub fn offset(&self) -> i64 {
        self.offset
    }

    pub fn header(&self, name: &str) -> Option<&[u8]> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_slice())
    }
}

/// The records fetched from one partition in one poll cycle, plus whatever
/// log metadata the transport could observe for that partition.
#[derive(Debug, Clone, Default)]
pub struct PartitionMeta {
    pub log_start_offset: Option<i64>,
    pub high_watermark: Option<i64>,
    pub last_stable_offset: Option<i64>,
}

#[derive(Debug)]
pub struct PartitionBatch {
    partition: Partition,
    pub meta: PartitionMeta,
    records: Vec<FetchedRecord>,
}

impl PartitionBatch {
    pub fn new(partition: Partition) -> Self {
        Self {
            partition,
            meta: PartitionMeta::default(),
            records: Vec::new(),
        }
    }

    pub fn partition(&self) -> &Partition {
        &self.partition
    }

    pub fn records(&self) -> &[FetchedRecord] {
        &self.records
    }

    pub fn push_record(&mut self, record: FetchedRecord) {
        self.records.push(record);
    }
}

/// A fetch error the transport could not handle internally.
///
/// Partitions fail independently, so there may be one per affected
/// partition; the coordinates are optional because the consumer stream can
/// surface errors it cannot attribute to a single partition.
#[derive(Debug)]
pub struct PartitionFetchError {
    partition: Option<Partition>,
    cause: anyhow::Error,
    retriable: bool,
}

impl PartitionFetchError {
    pub fn new(partition: Option<Partition>, cause: anyhow::Error, retriable: bool) -> Self {
        Self {
            partition,
            cause,
            retriable,
        }
    }

    pub fn partition(&self) -> Option<&Partition> {
        self.partition.as_ref()
    }

    pub fn cause(&self) -> &anyhow::Error {
        &self.cause
    }

    pub fn is_retriable(&self) -> bool {
        self.retriable
    }
}

/// One poll cycle's worth of records, grouped by (topic, partition).
///
/// A batch may span multiple partitions and multiple topics. Surfaced
/// per-partition errors travel alongside the records so the classifier can
/// inspect the whole cycle at once.
#[derive(Debug, Default)]
pub struct FetchBatch {
    partitions: HashMap<Partition, PartitionBatch>,
    errors: Vec<PartitionFetchError>,
}

impl FetchBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty() && self.errors.is_empty()
    }

    pub fn record_count(&self) -> usize {
        self.partitions.values().map(|p| p.records().len()).sum()
    }

    pub fn error_count(&self) -> usize {
        self.errors.len()
    }

    pub fn partitions(&self) -> impl Iterator<Item = &PartitionBatch> {
        self.partitions.values()
    }

    pub fn errors(&self) -> &[PartitionFetchError] {
        &self.errors
    }

    pub fn push_record(&mut self, record: FetchedRecord) {
        self.partitions
            .entry(record.partition().clone())
            .or_insert_with(|| PartitionBatch::new(record.partition().clone()))
            .push_record(record);
    }

    pub fn push_error(&mut self, error: PartitionFetchError) {
        self.errors.push(error);
    }

    pub fn set_partition_meta(&mut self, partition: &Partition, meta: PartitionMeta) {
        self.partitions
            .entry(partition.clone())
            .or_insert_with(|| PartitionBatch::new(partition.clone()))
            .meta = meta;
    }

    /// Consume the batch and return its partition groups and errors.
    pub fn unpack(self) -> (Vec<PartitionBatch>, Vec<PartitionFetchError>) {
        (self.partitions.into_values().collect(), self.errors)
    }
}
