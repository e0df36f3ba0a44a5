//! End-to-end cluster scenarios.
//!
//! Each test spins up a real three-replica cluster in-process (threads,
//! bus, memory sink) and drives it through the client stub. Reads that
//! depend on replication poll until the expected content lands, bounded by
//! the 5 s client deadline.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use lodestone_bus::Bus;
use lodestone_client::Client;
use lodestone_raft::{ClusterConfig, Role, TimingConfig};
use lodestone_server::ReplicaHandle;
use lodestone_store::{FileSink, MemorySink};
use lodestone_types::{ClientId, ReplicaId};

// ============================================================================
// Test Cluster
// ============================================================================

struct TestCluster {
    bus: Arc<Bus>,
    sink: Arc<MemorySink>,
    replicas: Vec<ReplicaHandle>,
    timing: TimingConfig,
}

impl TestCluster {
    /// Three replicas, r1 designated leader, followers given time to hear
    /// the first heartbeat so forwarding works immediately.
    fn start() -> Self {
        let bus = Arc::new(Bus::new());
        let sink = Arc::new(MemorySink::new());
        let timing = TimingConfig::default();
        let ids: Vec<ReplicaId> = (1..=3).map(ReplicaId::new).collect();
        let cluster = ClusterConfig::new(ids.clone());

        let replicas: Vec<ReplicaHandle> = ids
            .iter()
            .map(|&id| {
                let sink = Arc::clone(&sink) as Arc<dyn FileSink>;
                ReplicaHandle::spawn(id, cluster.clone(), timing, Arc::clone(&bus), sink)
            })
            .collect();

        replicas[0].become_leader();
        thread::sleep(Duration::from_secs(1));

        Self {
            bus,
            sink,
            replicas,
            timing,
        }
    }

    fn replica(&self, id: u8) -> &ReplicaHandle {
        self.replicas
            .iter()
            .find(|r| r.replica_id() == ReplicaId::new(id))
            .expect("unknown replica")
    }

    fn client(&self, id: u64, bound_to: u8) -> Client {
        Client::new(
            ClientId::new(id),
            ReplicaId::new(bound_to),
            Arc::clone(&self.bus),
            self.timing.client_deadline,
        )
    }

    /// Polls `client`'s bound replica until a read returns `expected`.
    fn read_until(&self, client: &Client, filename: &str, expected: &[u8]) -> bool {
        let deadline = Instant::now() + self.timing.client_deadline;
        while Instant::now() < deadline {
            if let Ok(content) = client.read_file(filename) {
                if content == Bytes::copy_from_slice(expected) {
                    return true;
                }
            }
            thread::sleep(Duration::from_millis(200));
        }
        false
    }

    /// Waits for a leader other than `failed`, within three election
    /// windows.
    fn await_new_leader(&self, failed: u8) -> Option<&ReplicaHandle> {
        let deadline = Instant::now() + 3 * self.timing.election_timeout_max;
        while Instant::now() < deadline {
            for replica in &self.replicas {
                if replica.replica_id() != ReplicaId::new(failed)
                    && replica.role() == Role::Leader
                {
                    return Some(replica);
                }
            }
            thread::sleep(Duration::from_millis(100));
        }
        None
    }

    fn stop_all(&self) {
        for replica in &self.replicas {
            replica.stop();
        }
    }
}

// ============================================================================
// Scenarios
// ============================================================================

/// S1: create through a follower, then read back empty content.
#[test]
fn s1_create_and_read_through_follower() {
    let cluster = TestCluster::start();
    let c1 = cluster.client(1, 2);

    assert!(c1.create_file("test.txt").unwrap());
    assert_eq!(c1.read_file("test.txt").unwrap(), Bytes::new());

    cluster.stop_all();
}

/// S2: a write through a follower becomes readable from that follower.
#[test]
fn s2_write_replicates_to_bound_follower() {
    let cluster = TestCluster::start();
    let c1 = cluster.client(1, 2);

    assert!(c1.create_file("test.txt").unwrap());
    assert!(c1.write_file("test.txt", "Hello from Client 1!").unwrap());

    assert!(
        cluster.read_until(&c1, "test.txt", b"Hello from Client 1!"),
        "write did not replicate to r2 within the deadline"
    );

    // The acknowledged write is on the leader's sink.
    let record = cluster
        .sink
        .load("test.txt", ReplicaId::new(1))
        .unwrap()
        .expect("leader must have persisted the file");
    assert_eq!(
        record.versions.last().unwrap().content,
        Bytes::from_static(b"Hello from Client 1!")
    );

    cluster.stop_all();
}

/// S3: a second client bound to a different replica sees the same content.
#[test]
fn s3_cross_client_replication() {
    let cluster = TestCluster::start();
    let c1 = cluster.client(1, 2);
    let c2 = cluster.client(2, 3);

    assert!(c1.create_file("test.txt").unwrap());
    assert!(c1.write_file("test.txt", "Hello from Client 1!").unwrap());

    assert!(
        cluster.read_until(&c2, "test.txt", b"Hello from Client 1!"),
        "write did not replicate to r3 within the deadline"
    );

    cluster.stop_all();
}

/// S4: after a delete, reads from either client return empty.
#[test]
fn s4_delete_then_read_empty() {
    let cluster = TestCluster::start();
    let c1 = cluster.client(1, 2);
    let c2 = cluster.client(2, 3);

    assert!(c1.create_file("test.txt").unwrap());
    assert!(c1.write_file("test.txt", "Hello from Client 1!").unwrap());
    assert!(cluster.read_until(&c2, "test.txt", b"Hello from Client 1!"));

    assert!(c1.delete_file("test.txt").unwrap());

    assert!(cluster.read_until(&c1, "test.txt", b""));
    assert!(cluster.read_until(&c2, "test.txt", b""));

    cluster.stop_all();
}

/// S5: stopping the leader yields a new leader in a strictly higher term,
/// and the cluster still takes writes.
#[test]
fn s5_leader_failover() {
    let cluster = TestCluster::start();
    let c1 = cluster.client(1, 2);
    let c2 = cluster.client(2, 3);

    assert!(c2.create_file("test.txt").unwrap());
    // Let the create replicate before the leader dies with it.
    assert!(cluster.read_until(&c2, "test.txt", b""));
    thread::sleep(Duration::from_secs(1));

    let old_term = cluster.replica(1).current_term();
    cluster.replica(1).stop();

    let new_leader = cluster
        .await_new_leader(1)
        .expect("no new leader within three election windows");
    assert!(new_leader.current_term() > old_term);
    assert_eq!(cluster.replica(1).role(), Role::Stopped);

    // Give the new leader a heartbeat round so the other survivor learns
    // of it and forwards correctly.
    thread::sleep(Duration::from_secs(1));

    assert!(
        c2.write_file("test.txt", "New content after leader failure")
            .unwrap(),
        "write after failover must succeed"
    );
    assert!(
        cluster.read_until(&c1, "test.txt", b"New content after leader failure"),
        "post-failover write did not reach r2 within the deadline"
    );

    cluster.stop_all();
}

/// S6: leases are exclusive until they expire, then sweep away.
#[test]
fn s6_lease_grant_deny_and_expiry() {
    let cluster = TestCluster::start();
    let x = cluster.client(10, 2);
    let y = cluster.client(11, 2);

    assert!(x.create_file("test.txt").unwrap());
    // Leases are local to the contacted replica; wait until r2 has the file.
    assert!(cluster.read_until(&x, "test.txt", b""));

    assert!(x.request_lease("test.txt", Duration::from_secs(1)).unwrap());
    assert!(!y.request_lease("test.txt", Duration::from_secs(1)).unwrap());

    // Past expiry (and a sweeper period), Y gets the lease.
    thread::sleep(Duration::from_millis(1500));
    assert!(y.request_lease("test.txt", Duration::from_secs(1)).unwrap());

    cluster.stop_all();
}

/// Releasing a lease immediately frees it for the next lessee.
#[test]
fn lease_release_frees_immediately() {
    let cluster = TestCluster::start();
    let x = cluster.client(10, 3);
    let y = cluster.client(11, 3);

    assert!(x.create_file("test.txt").unwrap());
    assert!(cluster.read_until(&x, "test.txt", b""));

    assert!(x.request_lease("test.txt", Duration::from_secs(30)).unwrap());
    assert!(!y.release_lease("test.txt").unwrap());
    assert!(x.release_lease("test.txt").unwrap());
    assert!(y.request_lease("test.txt", Duration::from_secs(30)).unwrap());

    cluster.stop_all();
}

/// A mutation through a follower that knows no leader times out client-side.
#[test]
fn mutation_with_no_leader_times_out() {
    let bus = Arc::new(Bus::new());
    let sink: Arc<dyn FileSink> = Arc::new(MemorySink::new());
    let ids: Vec<ReplicaId> = (1..=3).map(ReplicaId::new).collect();
    let timing = TimingConfig {
        // Park elections far out so nobody becomes leader during the test.
        election_timeout_min: Duration::from_secs(60),
        election_timeout_max: Duration::from_secs(120),
        client_deadline: Duration::from_secs(2),
        ..TimingConfig::default()
    };

    let replicas: Vec<ReplicaHandle> = ids
        .iter()
        .map(|&id| {
            ReplicaHandle::spawn(
                id,
                ClusterConfig::new(ids.clone()),
                timing,
                Arc::clone(&bus),
                Arc::clone(&sink),
            )
        })
        .collect();

    let client = Client::new(
        ClientId::new(1),
        ReplicaId::new(2),
        Arc::clone(&bus),
        timing.client_deadline,
    );
    assert!(client.create_file("test.txt").is_err());

    for replica in &replicas {
        replica.stop();
    }
}
