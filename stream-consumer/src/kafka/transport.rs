use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;

use crate::kafka::batch::FetchBatch;
use crate::kafka::types::Partition;

/// What a blocking fetch resolved to.
///
/// The poller matches on these kinds instead of probing error identities;
/// "deliberate shutdown" and "client already closed" are both clean stops,
/// everything else arrives as a batch (possibly carrying surfaced
/// per-partition errors for the classifier).
#[derive(Debug)]
pub enum FetchOutcome {
    Batch(FetchBatch),
    /// The shutdown signal fired while the fetch was blocked.
    Cancelled,
    /// The transport reports the underlying client is already closed.
    Closed,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    #[error("commit failed for {partitions} partition(s): {source}")]
    Commit {
        partitions: usize,
        source: rdkafka::error::KafkaError,
    },

    #[error("transport error: {0}")]
    Other(#[from] anyhow::Error),
}

/// The seam between the poller and the broker.
///
/// The real implementation wraps an rdkafka `StreamConsumer`; tests script
/// an in-memory one. Both blocking points of the loop live here.
#[async_trait]
pub trait ConsumerTransport: Send + Sync {
    /// Block until the next batch is available, the client is closed, or
    /// the transport observes its own shutdown condition.
    async fn fetch(&self) -> Result<FetchOutcome, TransportError>;

    /// Commit the snapshot as the group's new position, atomically from the
    /// caller's perspective: partial failure is total failure.
    async fn commit(&self, offsets: &HashMap<Partition, i64>) -> Result<(), TransportError>;
}
