use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{info, warn};

use crate::kafka::batch::FetchedRecord;
use crate::metrics_const::RECORDS_DEAD_LETTERED;
use crate::schema::decoder::DecodedPayload;

/// Per-topic processing function, resolved once at startup.
#[async_trait]
pub trait RecordHandler: Send + Sync {
    async fn handle(&self, record: &FetchedRecord, payload: DecodedPayload) -> Result<()>;
}

/// Maps topic names to their handlers. Built at startup, read-only after.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn RecordHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, topic: impl Into<String>, handler: Arc<dyn RecordHandler>) {
        self.handlers.insert(topic.into(), handler);
    }

    pub fn get(&self, topic: &str) -> Option<&Arc<dyn RecordHandler>> {
        self.handlers.get(topic)
    }

    pub fn topics(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// Sink for records that could not be handled. The routing implementation
/// (producer to a DLQ topic, object store, ...) lives outside this crate;
/// the poller only guarantees every failed record reaches the sink before
/// its offset is marked.
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    async fn send(&self, record: &FetchedRecord, reason: &str) -> Result<()>;
}

/// Default sink: logs the failure and counts it. Keeps the loop honest
/// about skipped records until a real DLQ route is wired in.
pub struct LogDeadLetter;

#[async_trait]
impl DeadLetterSink for LogDeadLetter {
    async fn send(&self, record: &FetchedRecord, reason: &str) -> Result<()> {
        warn!(
            topic = record.topic(),
            partition = record.partition().partition_number(),
            offset = record.offset(),
            reason,
            "Dead-lettering record"
        );
        metrics::counter!(
            RECORDS_DEAD_LETTERED,
            "topic" => record.topic().to_string()
        )
        .increment(1);
        Ok(())
    }
}

/// Handler that logs each record it receives. Stands in for downstream
/// processing on topics consumed for observability only.
pub struct LoggingHandler;

#[async_trait]
impl RecordHandler for LoggingHandler {
    async fn handle(&self, record: &FetchedRecord, payload: DecodedPayload) -> Result<()> {
        match payload {
            DecodedPayload::Typed { schema_id, value } => {
                info!(
                    topic = record.topic(),
                    partition = record.partition().partition_number(),
                    offset = record.offset(),
                    schema_id,
                    value = %value,
                    "Received record"
                );
            }
            DecodedPayload::Raw(bytes) => {
                info!(
                    topic = record.topic(),
                    partition = record.partition().partition_number(),
                    offset = record.offset(),
                    bytes = bytes.len(),
                    "Received raw record"
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kafka::types::Partition;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::SystemTime;

    struct CountingHandler {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RecordHandler for CountingHandler {
        async fn handle(&self, _record: &FetchedRecord, _payload: DecodedPayload) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn record(topic: &str) -> FetchedRecord {
        FetchedRecord::new(
            Partition::new(topic.to_string(), 0),
            1,
            None,
            Some(b"{}".to_vec()),
            vec![],
            SystemTime::now(),
        )
    }

    #[tokio::test]
    async fn registry_dispatches_by_topic() {
        let handler = Arc::new(CountingHandler {
            calls: AtomicUsize::new(0),
        });

        let mut registry = HandlerRegistry::new();
        registry.register("events", handler.clone());

        assert!(registry.get("events").is_some());
        assert!(registry.get("other").is_none());

        let resolved = registry.get("events").unwrap();
        resolved
            .handle(&record("events"), DecodedPayload::Raw(vec![]))
            .await
            .unwrap();
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn log_dead_letter_accepts_records() {
        let sink = LogDeadLetter;
        sink.send(&record("events"), "decode failed").await.unwrap();
    }
}
