//! Integration tests for lodestone-server.
//!
//! The server state machine is pure - handlers take `now` and return the
//! messages and sink operations they want executed - so the full client
//! surface is exercised here without threads or disks.

use std::time::Duration;

use bytes::Bytes;
use lodestone_bus::{Message, Payload};
use lodestone_raft::{ClusterConfig, Role};
use lodestone_types::{ClientId, EndpointId, ReplicaId, Timestamp};

use crate::{ServerOutput, ServerState, SinkOp};

// ============================================================================
// Helper Functions
// ============================================================================

fn r(n: u8) -> ReplicaId {
    ReplicaId::new(n)
}

fn c(n: u64) -> ClientId {
    ClientId::new(n)
}

fn ts(secs: u64) -> Timestamp {
    Timestamp::from_nanos(secs * 1_000_000_000)
}

fn leader() -> ServerState {
    ServerState::new(r(1), ClusterConfig::new(vec![r(1), r(2), r(3)])).become_leader()
}

fn follower(id: u8) -> ServerState {
    ServerState::new(r(id), ClusterConfig::new(vec![r(1), r(2), r(3)]))
}

fn from_client(n: u64, payload: Payload) -> Message {
    Message::targeted(c(n), r(1), payload)
}

fn create(filename: &str, client: u64) -> Message {
    from_client(
        client,
        Payload::CreateFile {
            filename: filename.to_owned(),
            client_id: c(client),
        },
    )
}

fn write(filename: &str, content: &str, client: u64) -> Message {
    from_client(
        client,
        Payload::WriteFile {
            filename: filename.to_owned(),
            content: Bytes::from(content.to_owned()),
            client_id: c(client),
        },
    )
}

fn read(filename: &str, client: u64) -> Message {
    from_client(
        client,
        Payload::ReadFile {
            filename: filename.to_owned(),
            client_id: c(client),
        },
    )
}

fn delete(filename: &str, client: u64) -> Message {
    from_client(
        client,
        Payload::DeleteFile {
            filename: filename.to_owned(),
            client_id: c(client),
        },
    )
}

/// The single reply in an output, with its recipient.
fn reply_of(output: &ServerOutput) -> (EndpointId, &Payload) {
    match &output.messages[..] {
        [m] => (m.to.expect("reply must be targeted"), &m.payload),
        other => panic!("expected exactly one reply, got {}", other.len()),
    }
}

// ============================================================================
// Create / Read / Write / Delete (Leader)
// ============================================================================

#[test]
fn create_makes_an_empty_versioned_file() {
    let (server, output) = leader().on_message(create("test.txt", 1), ts(1));

    let (to, payload) = reply_of(&output);
    assert_eq!(to, EndpointId::Client(c(1)));
    assert_eq!(*payload, Payload::CreateFileResponse { success: true });

    let file = server.file("test.txt").unwrap();
    assert_eq!(file.versions.len(), 1);
    assert!(file.versions[0].content.is_empty());

    // Write-through happened, and the log recorded the create.
    assert!(matches!(&output.sink_ops[..], [SinkOp::Persist(rec)] if rec.filename == "test.txt"));
    assert_eq!(server.node().log().len(), 1);
}

#[test]
fn duplicate_create_fails_without_mutating() {
    let (server, _) = leader().on_message(create("test.txt", 1), ts(1));
    let (server, output) = server.on_message(create("test.txt", 1), ts(2));

    assert_eq!(
        *reply_of(&output).1,
        Payload::CreateFileResponse { success: false }
    );
    assert!(output.sink_ops.is_empty());
    assert_eq!(server.file("test.txt").unwrap().versions.len(), 1);
    assert_eq!(server.node().log().len(), 1);
}

#[test]
fn read_returns_latest_content() {
    let (server, _) = leader().on_message(create("test.txt", 1), ts(1));
    let (server, output) = server.on_message(read("test.txt", 1), ts(2));
    assert_eq!(
        *reply_of(&output).1,
        Payload::ReadFileResponse { content: Bytes::new() }
    );

    let (server, _) = server.on_message(write("test.txt", "Hello from Client 1!", 1), ts(3));
    let (_, output) = server.on_message(read("test.txt", 1), ts(4));
    assert_eq!(
        *reply_of(&output).1,
        Payload::ReadFileResponse {
            content: Bytes::from_static(b"Hello from Client 1!")
        }
    );
}

#[test]
fn read_of_missing_file_is_empty() {
    let (_, output) = leader().on_message(read("nope.txt", 1), ts(1));
    assert_eq!(
        *reply_of(&output).1,
        Payload::ReadFileResponse { content: Bytes::new() }
    );
}

#[test]
fn write_appends_a_version_and_persists_before_replying() {
    let (server, _) = leader().on_message(create("test.txt", 1), ts(1));
    let (server, output) = server.on_message(write("test.txt", "Hello from Client 1!", 1), ts(2));

    assert_eq!(
        *reply_of(&output).1,
        Payload::WriteFileResponse { success: true }
    );
    match &output.sink_ops[..] {
        [SinkOp::Persist(record)] => {
            assert_eq!(record.versions.len(), 2);
            assert_eq!(
                record.versions[1].content,
                Bytes::from_static(b"Hello from Client 1!")
            );
        }
        other => panic!("expected one persist, got {other:?}"),
    }
    assert_eq!(server.file("test.txt").unwrap().versions.len(), 2);
    assert_eq!(server.node().log().len(), 2);
}

#[test]
fn write_to_missing_file_is_denied() {
    let (server, output) = leader().on_message(write("ghost.txt", "boo", 1), ts(1));

    assert_eq!(
        *reply_of(&output).1,
        Payload::WriteFileResponse { success: false }
    );
    assert!(output.sink_ops.is_empty());
    assert!(server.node().log().is_empty());
}

#[test]
fn delete_removes_file_and_blob() {
    let (server, _) = leader().on_message(create("test.txt", 1), ts(1));
    let (server, output) = server.on_message(delete("test.txt", 1), ts(2));

    assert_eq!(
        *reply_of(&output).1,
        Payload::DeleteFileResponse { success: true }
    );
    assert_eq!(output.sink_ops, vec![SinkOp::Remove("test.txt".to_owned())]);
    assert!(server.file("test.txt").is_none());

    let (_, output) = server.on_message(delete("test.txt", 1), ts(3));
    assert_eq!(
        *reply_of(&output).1,
        Payload::DeleteFileResponse { success: false }
    );
}

// ============================================================================
// Forwarding (Follower)
// ============================================================================

/// Teaches a follower who the leader is by delivering one beacon.
fn follower_knowing_leader(id: u8) -> ServerState {
    let beacons = leader().heartbeat_messages();
    let beacon = beacons
        .into_iter()
        .find(|m| m.to == Some(EndpointId::Replica(r(id))))
        .unwrap();
    let (server, _) = follower(id).on_message(beacon, ts(0));
    assert_eq!(server.leader_id(), Some(r(1)));
    server
}

#[test]
fn follower_forwards_mutations_to_leader() {
    let (_, output) = follower_knowing_leader(2).on_message(write("test.txt", "hi", 1), ts(1));

    match &output.messages[..] {
        [m] => {
            assert_eq!(m.to, Some(EndpointId::Replica(r(1))));
            assert_eq!(m.from, EndpointId::Replica(r(2)));
            // Payload unchanged: the client id inside is the reply address.
            assert_eq!(
                m.payload,
                Payload::WriteFile {
                    filename: "test.txt".to_owned(),
                    content: Bytes::from_static(b"hi"),
                    client_id: c(1),
                }
            );
        }
        other => panic!("expected one forwarded message, got {}", other.len()),
    }
    assert!(output.sink_ops.is_empty());
}

#[test]
fn follower_without_leader_drops_mutation() {
    let (_, output) = follower(2).on_message(create("test.txt", 1), ts(1));
    assert!(output.messages.is_empty());
}

#[test]
fn follower_serves_reads_locally() {
    let (_, output) = follower(2).on_message(read("test.txt", 1), ts(1));
    assert_eq!(
        *reply_of(&output).1,
        Payload::ReadFileResponse { content: Bytes::new() }
    );
}

// ============================================================================
// Replicated Apply (Follower)
// ============================================================================

#[test]
fn follower_applies_shipped_entries_to_its_file_map() {
    let (leader, _) = leader().on_message(create("test.txt", 1), ts(1));
    let (leader, _) = leader.on_message(write("test.txt", "Hello from Client 1!", 1), ts(2));

    let beacon = leader
        .heartbeat_messages()
        .into_iter()
        .find(|m| m.to == Some(EndpointId::Replica(r(3))))
        .unwrap();
    let (follower, output) = follower(3).on_message(beacon, ts(3));

    assert_eq!(
        follower.read_local("test.txt"),
        Bytes::from_static(b"Hello from Client 1!")
    );
    // Both applies wrote through.
    let persists = output
        .sink_ops
        .iter()
        .filter(|op| matches!(op, SinkOp::Persist(_)))
        .count();
    assert_eq!(persists, 2);
    assert_eq!(follower.node().log().len(), 2);
    assert_eq!(follower.role(), Role::Follower);
}

#[test]
fn follower_applies_delete_and_removes_blob() {
    let (leader, _) = leader().on_message(create("test.txt", 1), ts(1));
    let beacon_of = |l: &ServerState| {
        l.heartbeat_messages()
            .into_iter()
            .find(|m| m.to == Some(EndpointId::Replica(r(2))))
            .unwrap()
    };

    let (follower, _) = follower(2).on_message(beacon_of(&leader), ts(2));
    assert!(follower.file("test.txt").is_some());

    let (leader, _) = leader.on_message(delete("test.txt", 1), ts(3));
    let (follower, output) = follower.on_message(beacon_of(&leader), ts(4));

    assert!(follower.file("test.txt").is_none());
    assert!(output
        .sink_ops
        .iter()
        .any(|op| *op == SinkOp::Remove("test.txt".to_owned())));
}

// ============================================================================
// Leases
// ============================================================================

fn lease_request(filename: &str, lessee: u64, secs: u64) -> Message {
    from_client(
        lessee,
        Payload::RequestLease {
            filename: filename.to_owned(),
            duration: Duration::from_secs(secs),
            lessee_id: EndpointId::Client(c(lessee)),
        },
    )
}

fn lease_release(filename: &str, lessee: u64) -> Message {
    from_client(
        lessee,
        Payload::ReleaseLease {
            filename: filename.to_owned(),
            lessee_id: EndpointId::Client(c(lessee)),
        },
    )
}

#[test]
fn lease_is_exclusive_until_expiry() {
    let (server, _) = leader().on_message(create("test.txt", 1), ts(1));

    let (server, output) = server.on_message(lease_request("test.txt", 10, 1), ts(10));
    assert_eq!(
        *reply_of(&output).1,
        Payload::RequestLeaseResponse { granted: true }
    );

    // Property 7: a second grant fails while the first is live.
    let (server, output) = server.on_message(lease_request("test.txt", 11, 1), ts(10));
    let (to, payload) = reply_of(&output);
    assert_eq!(to, EndpointId::Client(c(11)));
    assert_eq!(*payload, Payload::RequestLeaseResponse { granted: false });

    // Past expiry the dead lease is invisible and Y succeeds.
    let (_, output) = server.on_message(lease_request("test.txt", 11, 1), ts(12));
    assert_eq!(
        *reply_of(&output).1,
        Payload::RequestLeaseResponse { granted: true }
    );
}

#[test]
fn lease_on_missing_file_is_denied() {
    let (_, output) = leader().on_message(lease_request("ghost.txt", 10, 1), ts(1));
    assert_eq!(
        *reply_of(&output).1,
        Payload::RequestLeaseResponse { granted: false }
    );
}

#[test]
fn release_requires_the_holding_lessee() {
    let (server, _) = leader().on_message(create("test.txt", 1), ts(1));
    let (server, _) = server.on_message(lease_request("test.txt", 10, 5), ts(2));

    let (server, output) = server.on_message(lease_release("test.txt", 11), ts(3));
    assert_eq!(
        *reply_of(&output).1,
        Payload::ReleaseLeaseResponse { released: false }
    );

    let (_, output) = server.on_message(lease_release("test.txt", 10), ts(3));
    assert_eq!(
        *reply_of(&output).1,
        Payload::ReleaseLeaseResponse { released: true }
    );
}

#[test]
fn sweeper_clears_only_expired_leases() {
    let (server, _) = leader().on_message(create("a.txt", 1), ts(1));
    let (server, _) = server.on_message(create("b.txt", 1), ts(1));
    let (server, _) = server.on_message(lease_request("a.txt", 10, 1), ts(2));
    let (server, _) = server.on_message(lease_request("b.txt", 10, 60), ts(2));

    let (server, cleared) = server.sweep_leases(ts(5));
    assert_eq!(cleared, 1);
    assert!(server.file("a.txt").unwrap().lease.is_none());
    assert!(server.file("b.txt").unwrap().lease.is_some());
}

// ============================================================================
// Misrouted Messages
// ============================================================================

#[test]
fn client_directed_responses_are_ignored_at_a_replica() {
    let stray = Message::targeted(c(9), r(1), Payload::WriteFileResponse { success: true });
    let (server, output) = leader().on_message(stray, ts(1));
    assert!(output.messages.is_empty());
    assert!(output.sink_ops.is_empty());
    assert_eq!(server.role(), Role::Leader);
}
