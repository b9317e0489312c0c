//! Offset tracker - per-partition high-water mark of safe-to-commit offsets.
//!
//! The poller marks records as it finishes handling them; the committer
//! takes a snapshot once per cycle and commits it. Only offsets for records
//! that were fully handled ever reach the snapshot.

use std::collections::HashMap;

use dashmap::DashMap;
use tracing::{debug, warn};

use crate::kafka::types::Partition;
use crate::metrics_const::OFFSET_MARKS_PAST_WATERMARK;

struct PartitionProgress {
    /// Next offset to resume consumption at (highest handled + 1).
    next_offset: i64,
    /// Last position durably committed for this partition, if any.
    committed: Option<i64>,
}

/// Tracks the highest fully-handled offset per partition.
///
/// Marks are monotonically non-decreasing within a partition's lifetime and
/// are dropped only once a commit of that exact position succeeds (or a
/// higher mark supersedes them). Backed by a concurrent map so rebalance
/// callbacks on librdkafka threads can clear revoked partitions.
#[derive(Default)]
pub struct OffsetTracker {
    progress: DashMap<Partition, PartitionProgress>,
}

impl OffsetTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that every record in `partition` up to and including `offset`
    /// has been handled this cycle.
    ///
    /// When the fetch exposed the partition's high watermark, a mark beyond
    /// it is refused: the record cannot have come from a visible position.
    pub fn mark(&self, partition: &Partition, offset: i64, high_watermark: Option<i64>) {
        if let Some(hw) = high_watermark {
            if offset >= hw {
                warn!(
                    topic = partition.topic(),
                    partition = partition.partition_number(),
                    offset,
                    high_watermark = hw,
                    "Refusing offset mark at or past the fetched high watermark"
                );
                metrics::counter!(
                    OFFSET_MARKS_PAST_WATERMARK,
                    "topic" => partition.topic().to_string()
                )
                .increment(1);
                return;
            }
        }

        let next_offset = offset + 1;
        self.progress
            .entry(partition.clone())
            .and_modify(|state| {
                // Only advance, never go backwards.
                if next_offset > state.next_offset {
                    debug!(
                        topic = partition.topic(),
                        partition = partition.partition_number(),
                        previous = state.next_offset,
                        next = next_offset,
                        "Advancing offset mark"
                    );
                    state.next_offset = next_offset;
                }
            })
            .or_insert(PartitionProgress {
                next_offset,
                committed: None,
            });
    }

    /// Positions ready for commit: partitions whose mark is ahead of the
    /// last durable commit. Re-marking an already-committed position is a
    /// no-op at this boundary, which keeps redelivered batches idempotent.
    pub fn snapshot(&self) -> HashMap<Partition, i64> {
        self.progress
            .iter()
            .filter(|entry| {
                entry
                    .value()
                    .committed
                    .is_none_or(|committed| entry.value().next_offset > committed)
            })
            .map(|entry| (entry.key().clone(), entry.value().next_offset))
            .collect()
    }

    /// Record that `offsets` were durably committed. Marks equal to the
    /// committed position are considered flushed; higher marks (raced in by
    /// a concurrent marker) stay pending for the next commit.
    pub fn mark_committed(&self, offsets: &HashMap<Partition, i64>) {
        for (partition, committed) in offsets {
            if let Some(mut state) = self.progress.get_mut(partition) {
                state.committed = Some(
                    state
                        .committed
                        .map_or(*committed, |prev| prev.max(*committed)),
                );
            }
        }
    }

    /// The next-offset mark for one partition, if any records were handled.
    pub fn partition_position(&self, partition: &Partition) -> Option<i64> {
        self.progress.get(partition).map(|s| s.value().next_offset)
    }

    /// Drop tracking for a revoked partition. Its offsets should already be
    /// committed; a new owner resumes from the durable position.
    pub fn clear_partition(&self, partition: &Partition) {
        if self.progress.remove(partition).is_some() {
            debug!(
                topic = partition.topic(),
                partition = partition.partition_number(),
                "Cleared offset tracking for revoked partition"
            );
        }
    }

    pub fn partition_count(&self) -> usize {
        self.progress.len()
    }
}
