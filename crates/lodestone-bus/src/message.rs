//! Protocol messages.
//!
//! All traffic between endpoints - consensus messages between replicas and
//! file operations between clients and replicas - travels as a [`Message`]:
//! a sender, an optional recipient, and a [`Payload`] tagged union.
//!
//! ## Consensus
//! - [`RequestVote`] - candidate → all: elect me for this term
//! - [`VoteResponse`] - voter → candidate: granted or denied
//! - [`AppendEntries`] - leader → backup: liveness beacon, carrying any log
//!   entries the peer has not acknowledged yet
//! - [`AppendEntriesResponse`] - backup → leader: acceptance plus the
//!   backup's log length for progress bookkeeping
//!
//! ## File operations
//! Client-originated requests (`create_file`, `read_file`, `write_file`,
//! `delete_file`, `request_lease`, `release_lease`) and their responses.
//! Requests carry the client id so a forwarding follower can hand them to
//! the leader without losing the reply address.

use std::time::Duration;

use bytes::Bytes;
use lodestone_types::{ClientId, EndpointId, LogEntry, LogIndex, ReplicaId, Term};
use serde::{Deserialize, Serialize};

// ============================================================================
// Message Envelope
// ============================================================================

/// A protocol message with routing information.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// The endpoint that sent this message.
    pub from: EndpointId,

    /// The intended recipient. `None` for a broadcast to all peers.
    pub to: Option<EndpointId>,

    /// The message payload.
    pub payload: Payload,
}

impl Message {
    /// Creates a new targeted message.
    pub fn targeted(
        from: impl Into<EndpointId>,
        to: impl Into<EndpointId>,
        payload: Payload,
    ) -> Self {
        Self {
            from: from.into(),
            to: Some(to.into()),
            payload,
        }
    }

    /// Creates a new broadcast message.
    pub fn broadcast(from: impl Into<EndpointId>, payload: Payload) -> Self {
        Self {
            from: from.into(),
            to: None,
            payload,
        }
    }

    /// Returns true if this message is a broadcast.
    pub fn is_broadcast(&self) -> bool {
        self.to.is_none()
    }
}

// ============================================================================
// Consensus Payloads
// ============================================================================

/// A candidate's request for a vote in a new term.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestVote {
    pub term: Term,
    pub candidate_id: ReplicaId,
    pub last_log_index: LogIndex,
    pub last_log_term: Term,
}

/// A voter's answer to a [`RequestVote`].
///
/// The term is the voter's current term *after* any adoption of the
/// candidate's; a candidate counts the vote only when it equals its own
/// election term.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteResponse {
    pub term: Term,
    pub vote_granted: bool,
}

/// The leader's periodic beacon, doubling as the log-shipping vehicle.
///
/// `entries` holds the suffix of the leader's log the recipient has not
/// acknowledged; it is empty when the peer is fully caught up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendEntries {
    pub term: Term,
    pub leader_id: ReplicaId,
    pub prev_log_index: LogIndex,
    pub prev_log_term: Term,
    pub entries: Vec<LogEntry>,
    pub leader_commit: LogIndex,
}

/// A backup's answer to an [`AppendEntries`].
///
/// `match_index` is the backup's log length after appending, which the
/// leader uses to advance `next_index`/`match_index` for that peer. The
/// responder's identity comes from the envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendEntriesResponse {
    pub term: Term,
    pub success: bool,
    pub match_index: LogIndex,
}

// ============================================================================
// Payload Union
// ============================================================================

/// Every message the system exchanges, as one tagged union.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Payload {
    // Consensus.
    RequestVote(RequestVote),
    VoteResponse(VoteResponse),
    AppendEntries(AppendEntries),
    AppendEntriesResponse(AppendEntriesResponse),

    // File operations.
    CreateFile {
        filename: String,
        client_id: ClientId,
    },
    CreateFileResponse {
        success: bool,
    },
    ReadFile {
        filename: String,
        client_id: ClientId,
    },
    ReadFileResponse {
        content: Bytes,
    },
    WriteFile {
        filename: String,
        content: Bytes,
        client_id: ClientId,
    },
    WriteFileResponse {
        success: bool,
    },
    DeleteFile {
        filename: String,
        client_id: ClientId,
    },
    DeleteFileResponse {
        success: bool,
    },

    // Leases (local to the contacted replica).
    RequestLease {
        filename: String,
        duration: Duration,
        lessee_id: EndpointId,
    },
    RequestLeaseResponse {
        granted: bool,
    },
    ReleaseLease {
        filename: String,
        lessee_id: EndpointId,
    },
    ReleaseLeaseResponse {
        released: bool,
    },
}

impl Payload {
    /// The symbolic discriminator name, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Payload::RequestVote(_) => "request_vote",
            Payload::VoteResponse(_) => "vote_response",
            Payload::AppendEntries(_) => "append_entries",
            Payload::AppendEntriesResponse(_) => "append_entries_response",
            Payload::CreateFile { .. } => "create_file",
            Payload::CreateFileResponse { .. } => "create_file_response",
            Payload::ReadFile { .. } => "read_file",
            Payload::ReadFileResponse { .. } => "read_file_response",
            Payload::WriteFile { .. } => "write_file",
            Payload::WriteFileResponse { .. } => "write_file_response",
            Payload::DeleteFile { .. } => "delete_file",
            Payload::DeleteFileResponse { .. } => "delete_file_response",
            Payload::RequestLease { .. } => "request_lease",
            Payload::RequestLeaseResponse { .. } => "request_lease_response",
            Payload::ReleaseLease { .. } => "release_lease",
            Payload::ReleaseLeaseResponse { .. } => "release_lease_response",
        }
    }
}
