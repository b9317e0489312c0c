//! The consumption loop: fetch, classify, dispatch, mark, commit, release.
//!
//! One logical thread of control. All blocking happens in the transport;
//! shutdown is observed only at the fetch boundary, so a cycle that has
//! started dispatching always runs through its commit before stopping.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{error, info, warn};

use crate::handler::{DeadLetterSink, HandlerRegistry};
use crate::kafka::batch::{FetchedRecord, PartitionBatch, PartitionFetchError};
use crate::kafka::classifier::classify;
use crate::kafka::committer::OffsetCommitter;
use crate::kafka::offset_tracker::OffsetTracker;
use crate::kafka::rebalance::RebalanceGate;
use crate::kafka::transport::{ConsumerTransport, FetchOutcome, TransportError};
use crate::metrics_const::{POLL_CYCLES, RECORDS_HANDLED, RECORD_HANDLER_FAILURES};
use crate::schema::decoder::RecordDecoder;

#[derive(Debug, Error)]
pub enum PollerError {
    #[error("fetch failed: {0}")]
    Fetch(#[source] TransportError),

    #[error("{count} fatal partition error(s) surfaced in one poll cycle")]
    FatalPartitions { count: usize },

    #[error("commit failed: {0}")]
    Commit(#[source] TransportError),
}

/// Drives the loop until shutdown, a fatal partition error, or a failed
/// commit. Owns no I/O itself; the transport is the only blocking seam.
pub struct Poller {
    transport: Arc<dyn ConsumerTransport>,
    decoder: RecordDecoder,
    handlers: Arc<HandlerRegistry>,
    dead_letters: Arc<dyn DeadLetterSink>,
    tracker: Arc<OffsetTracker>,
    committer: OffsetCommitter<dyn ConsumerTransport>,
    gate: Arc<RebalanceGate>,
}

impl Poller {
    pub fn new(
        transport: Arc<dyn ConsumerTransport>,
        decoder: RecordDecoder,
        handlers: Arc<HandlerRegistry>,
        dead_letters: Arc<dyn DeadLetterSink>,
        tracker: Arc<OffsetTracker>,
        gate: Arc<RebalanceGate>,
    ) -> Self {
        let committer = OffsetCommitter::new(transport.clone(), tracker.clone());
        Self {
            transport,
            decoder,
            handlers,
            dead_letters,
            tracker,
            committer,
            gate,
        }
    }

    /// Run poll cycles until `shutdown` fires or the loop hits a condition
    /// it cannot continue past. Ok(()) is a clean stop; Err means the
    /// process should exit non-zero with uncommitted work left in place for
    /// the next owner of these partitions.
    pub async fn run_loop(&self, mut shutdown: oneshot::Receiver<()>) -> Result<(), PollerError> {
        info!("Poller starting");

        loop {
            // Held for the whole cycle; Released only below, after the
            // cycle's marks are durably committed.
            self.gate.hold();
            metrics::counter!(POLL_CYCLES).increment(1);

            let outcome = tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown signal received during fetch");
                    self.stop_cleanly();
                    return Ok(());
                }
                outcome = self.transport.fetch() => outcome.map_err(PollerError::Fetch)?,
            };

            let batch = match outcome {
                FetchOutcome::Batch(batch) => batch,
                FetchOutcome::Cancelled => {
                    info!("Fetch cancelled, stopping");
                    self.stop_cleanly();
                    return Ok(());
                }
                FetchOutcome::Closed => {
                    info!("Consumer closed, stopping");
                    self.stop_cleanly();
                    return Ok(());
                }
            };

            let (partitions, errors) = batch.unpack();

            let classification = classify(errors);
            if classification.is_fatal() {
                // No commit: partial progress from this cycle must not
                // become the group's durable position.
                return Err(self.fatal_cycle(classification.fatal));
            }

            for partition_batch in &partitions {
                self.dispatch_partition(partition_batch).await;
            }

            match self.committer.commit_marked().await {
                Ok(_) => self.gate.release(),
                Err(e) => {
                    error!(error = %e, "Offset commit failed, stopping");
                    return Err(PollerError::Commit(e));
                }
            }
        }
    }

    /// Handle one partition's records in fetch order. A record whose decode
    /// or handler fails goes to the dead-letter sink and is then marked like
    /// a success, so one poison record cannot wedge its partition. Only a
    /// failed dead-letter write leaves a record unmarked; marking stops
    /// there to keep the partition's committed prefix contiguous.
    async fn dispatch_partition(&self, batch: &PartitionBatch) {
        let partition = batch.partition();
        let high_watermark = batch.meta.high_watermark;

        for record in batch.records() {
            let handled = match self.decoder.decode(record) {
                Ok(payload) => match self.handlers.get(record.topic()) {
                    Some(handler) => match handler.handle(record, payload).await {
                        Ok(()) => true,
                        Err(e) => {
                            metrics::counter!(
                                RECORD_HANDLER_FAILURES,
                                "topic" => record.topic().to_string()
                            )
                            .increment(1);
                            self.dead_letter(record, &format!("handler failed: {e:#}"))
                                .await
                        }
                    },
                    None => {
                        self.dead_letter(record, "no handler registered for topic")
                            .await
                    }
                },
                Err(e) => self.dead_letter(record, &format!("decode failed: {e}")).await,
            };

            if !handled {
                warn!(
                    topic = partition.topic(),
                    partition = partition.partition_number(),
                    offset = record.offset(),
                    "Dead-letter write failed; leaving record unmarked for redelivery"
                );
                break;
            }

            self.tracker.mark(partition, record.offset(), high_watermark);
            metrics::counter!(RECORDS_HANDLED, "topic" => record.topic().to_string())
                .increment(1);
        }
    }

    /// Route a failed record to the dead-letter sink. Returns whether the
    /// record now counts as handled.
    async fn dead_letter(&self, record: &FetchedRecord, reason: &str) -> bool {
        match self.dead_letters.send(record, reason).await {
            Ok(()) => true,
            Err(e) => {
                error!(
                    topic = record.topic(),
                    offset = record.offset(),
                    error = %e,
                    "Dead-letter sink failed"
                );
                false
            }
        }
    }

    fn fatal_cycle(&self, fatal: Vec<PartitionFetchError>) -> PollerError {
        for err in &fatal {
            match err.partition() {
                Some(p) => error!(
                    topic = p.topic(),
                    partition = p.partition_number(),
                    error = ?err.cause(),
                    "Stopping loop on fatal partition error"
                ),
                None => error!(error = ?err.cause(), "Stopping loop on fatal fetch error"),
            }
        }
        PollerError::FatalPartitions { count: fatal.len() }
    }

    /// Best-effort shutdown path: nothing from an in-flight cycle has been
    /// committed, so the gate is released as-is and redelivery picks up any
    /// handled-but-uncommitted records.
    fn stop_cleanly(&self) {
        if self.tracker.partition_count() > 0 {
            info!(
                partitions = self.tracker.partition_count(),
                "Stopping with uncommitted marks; they will be redelivered"
            );
        }
        self.gate.release();
    }
}
