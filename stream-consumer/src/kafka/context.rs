use std::sync::Arc;

use rdkafka::consumer::{BaseConsumer, ConsumerContext, Rebalance};
use rdkafka::{ClientContext, TopicPartitionList};
use tracing::{debug, error, info, warn};

use crate::kafka::offset_tracker::OffsetTracker;
use crate::kafka::rebalance::RebalanceGate;
use crate::kafka::types::Partition;
use crate::metrics_const::{REBALANCE_EVENTS, REBALANCE_WHILE_HELD};

/// Consumer context wiring librdkafka's rebalance and commit callbacks to
/// the gate and the offset tracker.
///
/// These callbacks run on librdkafka threads and must stay fast and
/// non-blocking; they only touch atomics and concurrent maps.
pub struct PollerContext {
    gate: Arc<RebalanceGate>,
    tracker: Arc<OffsetTracker>,
}

impl PollerContext {
    pub fn new(gate: Arc<RebalanceGate>, tracker: Arc<OffsetTracker>) -> Self {
        Self { gate, tracker }
    }

    fn partitions_of(list: &TopicPartitionList) -> Vec<Partition> {
        list.elements().into_iter().map(Partition::from).collect()
    }
}

impl ClientContext for PollerContext {}

impl ConsumerContext for PollerContext {
    fn pre_rebalance(&self, _base_consumer: &BaseConsumer<Self>, rebalance: &Rebalance) {
        match rebalance {
            Rebalance::Revoke(partitions) => {
                // Cooperative-sticky triggers empty revokes on any group
                // membership change; nothing to do for those.
                if partitions.count() == 0 {
                    debug!("Skipping empty revoke rebalance");
                    return;
                }

                if self.gate.is_held() {
                    // A batch is mid-flight: the broker's liveness bound
                    // has overridden our hold. Progress past the last
                    // commit will be redelivered to the new owner.
                    warn!(
                        partitions = partitions.count(),
                        "Broker forced a rebalance while the gate was held"
                    );
                    metrics::counter!(REBALANCE_WHILE_HELD).increment(1);
                }

                info!(partitions = partitions.count(), "Revoking partitions");
                metrics::counter!(REBALANCE_EVENTS, "event_type" => "revoke").increment(1);

                let revoked = Self::partitions_of(partitions);
                self.gate.remove_owned_partitions(&revoked);
                for partition in &revoked {
                    self.tracker.clear_partition(partition);
                }
            }
            Rebalance::Assign(partitions) => {
                debug!(
                    partitions = partitions.count(),
                    "Pre-rebalance assign event"
                );
            }
            Rebalance::Error(e) => {
                error!(error = %e, "Rebalance error");
            }
        }
    }

    fn post_rebalance(&self, _base_consumer: &BaseConsumer<Self>, rebalance: &Rebalance) {
        match rebalance {
            Rebalance::Assign(partitions) => {
                if partitions.count() == 0 {
                    debug!("Skipping empty assign rebalance");
                    return;
                }

                info!(partitions = partitions.count(), "Assigned partitions");
                metrics::counter!(REBALANCE_EVENTS, "event_type" => "assign").increment(1);
                self.gate
                    .add_owned_partitions(&Self::partitions_of(partitions));
            }
            Rebalance::Revoke(_) => {
                debug!("Post-rebalance revoke event");
            }
            Rebalance::Error(e) => {
                error!(error = %e, "Post-rebalance error");
            }
        }
    }

    fn commit_callback(
        &self,
        result: rdkafka::error::KafkaResult<()>,
        offsets: &TopicPartitionList,
    ) {
        match result {
            Ok(_) => {
                debug!(
                    partitions = offsets.count(),
                    "Broker acknowledged offset commit"
                );
            }
            Err(e) => {
                warn!(error = %e, "Broker rejected offset commit");
            }
        }
    }
}
