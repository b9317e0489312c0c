use std::sync::Arc;

use tracing::{debug, info};

use crate::kafka::offset_tracker::OffsetTracker;
use crate::kafka::transport::{ConsumerTransport, TransportError};
use crate::metrics_const::{OFFSET_COMMITS, OFFSET_COMMIT_FAILURES};

/// Flushes tracked offsets to the broker's group-coordination metadata.
///
/// All-or-nothing from the caller's perspective: a failed commit leaves the
/// tracker untouched and the error propagates, because local and durable
/// state may now disagree and only the caller can decide what that means.
pub struct OffsetCommitter<T: ConsumerTransport + ?Sized> {
    transport: Arc<T>,
    tracker: Arc<OffsetTracker>,
}

impl<T: ConsumerTransport + ?Sized> OffsetCommitter<T> {
    pub fn new(transport: Arc<T>, tracker: Arc<OffsetTracker>) -> Self {
        Self { transport, tracker }
    }

    /// Commit every pending mark. Returns the number of partitions whose
    /// position advanced durably; zero when there was nothing to commit.
    pub async fn commit_marked(&self) -> Result<usize, TransportError> {
        let snapshot = self.tracker.snapshot();
        if snapshot.is_empty() {
            debug!("No pending offsets to commit");
            return Ok(0);
        }

        match self.transport.commit(&snapshot).await {
            Ok(()) => {
                info!(partitions = snapshot.len(), "Committed offsets");
                metrics::counter!(OFFSET_COMMITS).increment(1);
                self.tracker.mark_committed(&snapshot);
                Ok(snapshot.len())
            }
            Err(e) => {
                metrics::counter!(OFFSET_COMMIT_FAILURES).increment(1);
                Err(e)
            }
        }
    }
}
