//! Cluster membership and protocol timing.

use std::time::Duration;

use lodestone_types::ReplicaId;
use rand::Rng;
use serde::{Deserialize, Serialize};

// ============================================================================
// Cluster Configuration
// ============================================================================

/// The fixed replica set of the cluster.
///
/// Membership changes are out of scope; the set is established once at
/// startup and shared by every replica.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfig {
    replicas: Vec<ReplicaId>,
}

impl ClusterConfig {
    pub fn new(replicas: Vec<ReplicaId>) -> Self {
        debug_assert!(!replicas.is_empty(), "cluster must have at least one replica");
        Self { replicas }
    }

    pub fn replicas(&self) -> &[ReplicaId] {
        &self.replicas
    }

    pub fn cluster_size(&self) -> usize {
        self.replicas.len()
    }

    /// Votes needed for a strict majority of the cluster.
    pub fn quorum_size(&self) -> usize {
        self.cluster_size() / 2 + 1
    }

    /// Replica failures the cluster can survive.
    pub fn max_failures(&self) -> usize {
        (self.cluster_size() - 1) / 2
    }

    pub fn contains(&self, id: ReplicaId) -> bool {
        self.replicas.contains(&id)
    }

    /// All replicas except `me`.
    pub fn peers(&self, me: ReplicaId) -> impl Iterator<Item = ReplicaId> + '_ {
        self.replicas.iter().copied().filter(move |&r| r != me)
    }
}

// ============================================================================
// Timing Configuration
// ============================================================================

/// Protocol timing knobs.
///
/// The heartbeat period must sit strictly below the election-timeout
/// window's minimum, or healthy leaders get deposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Interval between leader heartbeats.
    pub heartbeat_period: Duration,

    /// Lower bound of the randomized election timeout.
    pub election_timeout_min: Duration,

    /// Upper bound of the randomized election timeout.
    pub election_timeout_max: Duration,

    /// How long a client waits for a matching response.
    pub client_deadline: Duration,

    /// Interval between lease-expiry sweeps.
    pub lease_sweep_period: Duration,

    /// Idle sleep between mailbox polls.
    pub mailbox_poll: Duration,
}

impl TimingConfig {
    /// Draws a fresh election timeout uniformly from the configured window.
    ///
    /// Redrawn on every timer reset so replicas desynchronize and split
    /// votes resolve.
    pub fn draw_election_timeout<R: Rng>(&self, rng: &mut R) -> Duration {
        debug_assert!(self.heartbeat_period < self.election_timeout_min);
        let min = self.election_timeout_min.as_millis() as u64;
        let max = self.election_timeout_max.as_millis() as u64;
        Duration::from_millis(rng.gen_range(min..=max))
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            heartbeat_period: Duration::from_millis(500),
            election_timeout_min: Duration::from_secs(1),
            election_timeout_max: Duration::from_secs(2),
            client_deadline: Duration::from_secs(5),
            lease_sweep_period: Duration::from_secs(1),
            mailbox_poll: Duration::from_millis(100),
        }
    }
}
