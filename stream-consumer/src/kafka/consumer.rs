use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use dashmap::DashMap;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::{ClientConfig, TopicPartitionList};
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

use crate::kafka::batch::{FetchBatch, FetchedRecord, PartitionFetchError, PartitionMeta};
use crate::kafka::classifier::{stream_error_kind, StreamErrorKind};
use crate::kafka::context::PollerContext;
use crate::kafka::offset_tracker::OffsetTracker;
use crate::kafka::rebalance::RebalanceGate;
use crate::kafka::transport::{ConsumerTransport, FetchOutcome, TransportError};
use crate::kafka::types::Partition;
use crate::metrics_const::{FETCH_BATCH_SIZE, FETCH_STREAM_RETRIES};

/// rdkafka-backed transport: collects size/time-bounded batches from a
/// `StreamConsumer` and commits explicit offsets with `CommitMode::Sync`.
///
/// Transient stream conditions (partition EOF, broker reconnects, fetch
/// timeouts) are retried here with a short backoff and never reach the
/// poller; everything else is surfaced in the batch for the classifier.
/// How long a cached watermark pair stays valid.
const WATERMARK_CACHE_TTL: Duration = Duration::from_secs(10);

/// Broker round-trip bound for one watermark query.
const WATERMARK_FETCH_TIMEOUT: Duration = Duration::from_secs(2);

/// Watermarks observed for one partition, with the time of observation.
struct CachedWatermarks {
    low: i64,
    high: i64,
    fetched_at: Instant,
}

impl CachedWatermarks {
    /// A cached pair is usable while it is fresh AND still above the highest
    /// offset just fetched. A record at or past the cached high watermark
    /// proves the cache is behind the log; marking against it would wrongly
    /// refuse real progress, so the caller must re-query instead.
    fn is_usable(&self, max_offset: i64, ttl: Duration) -> bool {
        self.fetched_at.elapsed() < ttl && max_offset < self.high
    }

    fn meta(&self) -> PartitionMeta {
        PartitionMeta {
            log_start_offset: Some(self.low),
            high_watermark: Some(self.high),
            // librdkafka's watermark API does not report the last stable
            // offset; other transports may fill it in.
            last_stable_offset: None,
        }
    }
}

pub struct KafkaTransport {
    consumer: StreamConsumer<PollerContext>,
    batch_size: usize,
    batch_timeout: Duration,
    watermarks: DashMap<Partition, CachedWatermarks>,
}

impl KafkaTransport {
    pub fn from_config(
        client_config: &ClientConfig,
        topics: &[String],
        gate: Arc<RebalanceGate>,
        tracker: Arc<OffsetTracker>,
        batch_size: usize,
        batch_timeout: Duration,
    ) -> anyhow::Result<Self> {
        let context = PollerContext::new(gate, tracker);
        let consumer: StreamConsumer<PollerContext> = client_config
            .create_with_context(context)
            .context("Failed to create Kafka consumer")?;

        let topic_refs: Vec<&str> = topics.iter().map(String::as_str).collect();
        consumer
            .subscribe(&topic_refs)
            .with_context(|| format!("Failed to subscribe to topics {topics:?}"))?;

        info!(topics = ?topics, "Kafka consumer subscribed");

        Ok(Self {
            consumer,
            batch_size,
            batch_timeout,
            watermarks: DashMap::new(),
        })
    }

    /// Resolve watermark metadata for one fetched partition, consulting the
    /// broker when the cache is stale or contradicted by a fetched offset.
    /// A failed query degrades to unset metadata rather than an error; the
    /// tracker simply skips its watermark check for that partition.
    fn partition_meta(&self, partition: &Partition, max_offset: i64) -> PartitionMeta {
        if let Some(cached) = self.watermarks.get(partition) {
            if cached.is_usable(max_offset, WATERMARK_CACHE_TTL) {
                return cached.meta();
            }
        }

        match self.consumer.fetch_watermarks(
            partition.topic(),
            partition.partition_number(),
            WATERMARK_FETCH_TIMEOUT,
        ) {
            Ok((low, high)) => {
                let cached = CachedWatermarks {
                    low,
                    high,
                    fetched_at: Instant::now(),
                };
                let meta = cached.meta();
                self.watermarks.insert(partition.clone(), cached);
                meta
            }
            Err(e) => {
                warn!(
                    topic = partition.topic(),
                    partition = partition.partition_number(),
                    error = %e,
                    "Failed to fetch watermarks; leaving partition metadata unset"
                );
                PartitionMeta::default()
            }
        }
    }
}

#[async_trait]
impl ConsumerTransport for KafkaTransport {
    async fn fetch(&self) -> Result<FetchOutcome, TransportError> {
        let deadline = Instant::now() + self.batch_timeout;
        let mut batch = FetchBatch::new();
        let mut retry_count: u32 = 0;

        while batch.record_count() < self.batch_size {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }

            match timeout(remaining, self.consumer.recv()).await {
                Ok(Ok(msg)) => {
                    batch.push_record(FetchedRecord::from_borrowed_message(&msg));
                    retry_count = 0;
                }
                Ok(Err(e)) => match stream_error_kind(&e) {
                    StreamErrorKind::Retriable => {
                        // Handled here; the loop above never sees these.
                        retry_count += 1;
                        warn!(error = %e, retry_count, "Transient consumer error, backing off");
                        metrics::counter!(FETCH_STREAM_RETRIES).increment(1);
                        sleep(Duration::from_millis(
                            100 * u64::from(retry_count.min(10)),
                        ))
                        .await;
                    }
                    StreamErrorKind::Closed => {
                        if batch.is_empty() {
                            return Ok(FetchOutcome::Closed);
                        }
                        // Hand over what we already collected; the closed
                        // state resurfaces on the next fetch.
                        break;
                    }
                    StreamErrorKind::Fatal => {
                        // The stream API cannot attribute this to one
                        // partition; surface it unattributed.
                        batch.push_error(PartitionFetchError::new(
                            None,
                            anyhow::Error::from(e),
                            false,
                        ));
                        break;
                    }
                },
                Err(_) => break, // batch window elapsed
            }
        }

        let fetched: Vec<(Partition, i64)> = batch
            .partitions()
            .filter_map(|group| {
                group
                    .records()
                    .last()
                    .map(|last| (group.partition().clone(), last.offset()))
            })
            .collect();
        for (partition, max_offset) in fetched {
            let meta = self.partition_meta(&partition, max_offset);
            batch.set_partition_meta(&partition, meta);
        }

        metrics::histogram!(FETCH_BATCH_SIZE).record(batch.record_count() as f64);
        for group in batch.partitions() {
            debug!(
                topic = group.partition().topic(),
                partition = group.partition().partition_number(),
                records = group.records().len(),
                log_start_offset = ?group.meta.log_start_offset,
                high_watermark = ?group.meta.high_watermark,
                last_stable_offset = ?group.meta.last_stable_offset,
                "Fetched partition records"
            );
        }
        debug!(
            records = batch.record_count(),
            errors = batch.error_count(),
            "Collected fetch batch"
        );

        Ok(FetchOutcome::Batch(batch))
    }

    async fn commit(&self, offsets: &HashMap<Partition, i64>) -> Result<(), TransportError> {
        let mut list = TopicPartitionList::new();
        for (partition, next_offset) in offsets {
            list.add_partition_offset(
                partition.topic(),
                partition.partition_number(),
                rdkafka::Offset::Offset(*next_offset),
            )
            .map_err(|e| TransportError::Commit {
                partitions: offsets.len(),
                source: e,
            })?;
        }

        // Synchronous commit so the release point below has a known durable
        // position; partial failure is total failure for the caller.
        self.consumer
            .commit(&list, CommitMode::Sync)
            .map_err(|e| TransportError::Commit {
                partitions: offsets.len(),
                source: e,
            })
    }
}
