//! Rebalance gate - the Held/Released state machine around each poll cycle.
//!
//! The gate starts Held at the top of every cycle (the fetch re-acquires
//! it) and transitions to Released only after a successful commit. While
//! Held, offsets this client commits reflect exactly the records it - and
//! no concurrently-active peer - has processed for its partitions. The
//! broker can still force a rebalance past a held gate after its own
//! liveness timeout (`max.poll.interval.ms`); the consumer context logs
//! that, it is not an error the gate can observe.

use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashSet;
use tracing::{debug, info};

use crate::kafka::types::Partition;
use crate::metrics_const::{OWNED_PARTITIONS, REBALANCE_GATE_HELD};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    /// A batch is mid-flight; partitions must not move.
    Held,
    /// The last batch's progress is durable; safe to reassign.
    Released,
}

/// Tracks the Held/Released state plus the broker-driven partition
/// assignment. Ownership is mutated only by the rebalance callbacks, never
/// by application code.
pub struct RebalanceGate {
    held: AtomicBool,
    owned_partitions: DashSet<Partition>,
}

impl RebalanceGate {
    pub fn new() -> Self {
        Self {
            held: AtomicBool::new(false),
            owned_partitions: DashSet::new(),
        }
    }

    /// Re-acquire the hold at the top of a poll cycle.
    pub fn hold(&self) {
        if !self.held.swap(true, Ordering::SeqCst) {
            debug!("Rebalance gate held");
            metrics::gauge!(REBALANCE_GATE_HELD).set(1.0);
        }
    }

    /// Release the hold. Only the poller calls this, and only after a
    /// successful commit (or best-effort during shutdown).
    pub fn release(&self) {
        if self.held.swap(false, Ordering::SeqCst) {
            debug!("Rebalance gate released");
            metrics::gauge!(REBALANCE_GATE_HELD).set(0.0);
        }
    }

    pub fn state(&self) -> GateState {
        if self.held.load(Ordering::SeqCst) {
            GateState::Held
        } else {
            GateState::Released
        }
    }

    pub fn is_held(&self) -> bool {
        self.state() == GateState::Held
    }

    // Ownership updates below run on librdkafka callback threads.

    pub fn add_owned_partitions(&self, partitions: &[Partition]) {
        for partition in partitions {
            self.owned_partitions.insert(partition.clone());
        }
        metrics::gauge!(OWNED_PARTITIONS).set(self.owned_partitions.len() as f64);
        if !partitions.is_empty() {
            info!(
                added = partitions.len(),
                total_owned = self.owned_partitions.len(),
                "Partitions assigned"
            );
        }
    }

    pub fn remove_owned_partitions(&self, partitions: &[Partition]) {
        for partition in partitions {
            self.owned_partitions.remove(partition);
        }
        metrics::gauge!(OWNED_PARTITIONS).set(self.owned_partitions.len() as f64);
        if !partitions.is_empty() {
            info!(
                removed = partitions.len(),
                total_owned = self.owned_partitions.len(),
                "Partitions revoked"
            );
        }
    }

    pub fn is_partition_owned(&self, partition: &Partition) -> bool {
        self.owned_partitions.contains(partition)
    }

    pub fn owned_partitions(&self) -> Vec<Partition> {
        self.owned_partitions.iter().map(|p| p.clone()).collect()
    }
}

impl Default for RebalanceGate {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_released() {
        let gate = RebalanceGate::new();
        assert_eq!(gate.state(), GateState::Released);
        assert!(!gate.is_held());
    }

    #[test]
    fn hold_then_release() {
        let gate = RebalanceGate::new();

        gate.hold();
        assert_eq!(gate.state(), GateState::Held);

        gate.release();
        assert_eq!(gate.state(), GateState::Released);
    }

    #[test]
    fn hold_is_idempotent() {
        let gate = RebalanceGate::new();
        gate.hold();
        gate.hold();
        assert!(gate.is_held());
        gate.release();
        assert!(!gate.is_held());
    }

    #[test]
    fn ownership_tracks_assign_and_revoke() {
        let gate = RebalanceGate::new();
        let p0 = Partition::new("events".to_string(), 0);
        let p1 = Partition::new("events".to_string(), 1);

        gate.add_owned_partitions(&[p0.clone(), p1.clone()]);
        assert!(gate.is_partition_owned(&p0));
        assert_eq!(gate.owned_partitions().len(), 2);

        gate.remove_owned_partitions(std::slice::from_ref(&p1));
        assert!(gate.is_partition_owned(&p0));
        assert!(!gate.is_partition_owned(&p1));
    }

    #[test]
    fn rapid_revoke_assign_keeps_ownership() {
        let gate = RebalanceGate::new();
        let p0 = Partition::new("events".to_string(), 0);

        gate.add_owned_partitions(std::slice::from_ref(&p0));
        gate.remove_owned_partitions(std::slice::from_ref(&p0));
        gate.add_owned_partitions(std::slice::from_ref(&p0));

        assert!(gate.is_partition_owned(&p0));
    }
}
