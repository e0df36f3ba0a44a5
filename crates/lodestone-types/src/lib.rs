//! # lodestone-types: Core types for Lodestone
//!
//! This crate contains the shared types used across the Lodestone system:
//! - Entity IDs ([`ReplicaId`], [`ClientId`], [`EndpointId`])
//! - Consensus bookkeeping ([`Term`], [`LogIndex`])
//! - Temporal types ([`Timestamp`])
//! - Replicated log types ([`Operation`], [`LogEntry`])
//! - The file state model ([`File`], [`FileVersion`], [`Lease`])

use std::fmt::{self, Display};
use std::ops::Add;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

// ============================================================================
// Entity IDs - All Copy (cheap small-integer values)
// ============================================================================

/// Unique identifier for a replica in the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ReplicaId(u8);

impl ReplicaId {
    pub fn new(id: u8) -> Self {
        Self(id)
    }

    pub fn as_u8(self) -> u8 {
        self.0
    }

    /// Returns the id as a `usize` for indexing.
    pub fn as_usize(self) -> usize {
        usize::from(self.0)
    }
}

impl Display for ReplicaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u8> for ReplicaId {
    fn from(value: u8) -> Self {
        Self(value)
    }
}

/// Unique identifier for a client endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClientId(u64);

impl ClientId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ClientId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// A transport endpoint: either a replica or a client.
///
/// The bus keys its mailboxes by endpoint, and every message names the
/// endpoint it came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EndpointId {
    Replica(ReplicaId),
    Client(ClientId),
}

impl EndpointId {
    /// Returns the replica id if this endpoint is a replica.
    pub fn as_replica(self) -> Option<ReplicaId> {
        match self {
            EndpointId::Replica(id) => Some(id),
            EndpointId::Client(_) => None,
        }
    }
}

impl Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndpointId::Replica(id) => write!(f, "r{id}"),
            EndpointId::Client(id) => write!(f, "c{id}"),
        }
    }
}

impl From<ReplicaId> for EndpointId {
    fn from(id: ReplicaId) -> Self {
        EndpointId::Replica(id)
    }
}

impl From<ClientId> for EndpointId {
    fn from(id: ClientId) -> Self {
        EndpointId::Client(id)
    }
}

// ============================================================================
// Consensus Bookkeeping
// ============================================================================

/// A consensus term: a monotonically increasing epoch during which at most
/// one leader exists.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Term(u64);

impl Term {
    pub const ZERO: Term = Term(0);

    pub fn new(term: u64) -> Self {
        Self(term)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// The next term.
    pub fn next(self) -> Term {
        Term(self.0 + 1)
    }
}

impl Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Position of an entry within the replicated log.
///
/// Indices are 1-based; `LogIndex::ZERO` means "before the first entry" and
/// is the value of `prev_log_index` on an empty log.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct LogIndex(u64);

impl LogIndex {
    pub const ZERO: LogIndex = LogIndex(0);

    pub fn new(index: u64) -> Self {
        Self(index)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the index as a `usize`.
    ///
    /// # Panics
    ///
    /// Panics on 32-bit platforms if the index exceeds `usize::MAX`.
    pub fn as_usize(self) -> usize {
        usize::try_from(self.0).expect("log index exceeds usize")
    }

    pub fn next(self) -> LogIndex {
        LogIndex(self.0 + 1)
    }

    /// The previous index, saturating at zero.
    pub fn prev(self) -> LogIndex {
        LogIndex(self.0.saturating_sub(1))
    }
}

impl Display for LogIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Timestamps
// ============================================================================

/// Nanoseconds since the Unix epoch.
///
/// Version ordering never relies on the wall clock alone: callers that
/// append versions clamp each new stamp to `max(now, previous)`, so a
/// backwards clock step can never produce a decreasing sequence. The raw
/// wall-clock value is kept for display and persistence.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Timestamp(u64);

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp(0);

    /// The current wall-clock time.
    pub fn now() -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_nanos();
        Self(u64::try_from(nanos).unwrap_or(u64::MAX))
    }

    pub fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    pub fn as_nanos(self) -> u64 {
        self.0
    }

    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / 1e9
    }
}

impl Add<Duration> for Timestamp {
    type Output = Timestamp;

    fn add(self, rhs: Duration) -> Timestamp {
        let rhs = u64::try_from(rhs.as_nanos()).unwrap_or(u64::MAX);
        Timestamp(self.0.saturating_add(rhs))
    }
}

impl Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}", self.as_secs_f64())
    }
}

// ============================================================================
// Replicated Log
// ============================================================================

/// A state-machine command ordered through the replicated log.
///
/// Reads are served locally and never enter the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    CreateFile { filename: String },
    WriteFile { filename: String, content: Bytes },
    DeleteFile { filename: String },
}

impl Operation {
    /// The symbolic name of this operation, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Operation::CreateFile { .. } => "create_file",
            Operation::WriteFile { .. } => "write_file",
            Operation::DeleteFile { .. } => "delete_file",
        }
    }

    /// The file this operation targets.
    pub fn filename(&self) -> &str {
        match self {
            Operation::CreateFile { filename }
            | Operation::WriteFile { filename, .. }
            | Operation::DeleteFile { filename } => filename,
        }
    }
}

/// One entry of the replicated log: an operation tagged with the term in
/// which the leader appended it.
///
/// Entries are append-only; an entry's index is its 1-based position in the
/// log, and terms are non-decreasing with index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub term: Term,
    pub operation: Operation,
}

impl LogEntry {
    pub fn new(term: Term, operation: Operation) -> Self {
        Self { term, operation }
    }
}

// ============================================================================
// File State Model
// ============================================================================

/// One immutable version of a file's content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileVersion {
    pub content: Bytes,
    pub timestamp: Timestamp,
    /// 1-based version number; equals the version's position in the file's
    /// version sequence.
    pub version: u32,
}

/// A time-bounded exclusive hold on a file by a named lessee.
///
/// An expired lease is functionally absent: every accessor that matters
/// takes `now` and treats `now > expiry` as "no lease".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub lessee: EndpointId,
    pub expiry: Timestamp,
}

impl Lease {
    pub fn new(lessee: EndpointId, expiry: Timestamp) -> Self {
        Self { lessee, expiry }
    }

    pub fn is_expired(&self, now: Timestamp) -> bool {
        now > self.expiry
    }
}

/// A named file: an append-only sequence of versions plus an optional lease.
///
/// The file itself is a pure container. All mutation is serialized
/// externally by the owning replica, and every time-dependent operation
/// takes `now` explicitly so the model can be exercised without a clock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct File {
    pub filename: String,
    pub owner: ReplicaId,
    pub versions: Vec<FileVersion>,
    pub lease: Option<Lease>,
}

impl File {
    /// Creates an empty file record with no versions yet.
    pub fn new(filename: impl Into<String>, owner: ReplicaId) -> Self {
        Self {
            filename: filename.into(),
            owner,
            versions: Vec::new(),
            lease: None,
        }
    }

    /// Appends a new version numbered `len + 1`.
    ///
    /// The stored timestamp is clamped to `max(now, previous timestamp)` so
    /// the sequence stays non-decreasing even if the wall clock steps back.
    pub fn add_version(&mut self, content: Bytes, now: Timestamp) -> &FileVersion {
        let timestamp = match self.versions.last() {
            Some(prev) => now.max(prev.timestamp),
            None => now,
        };
        let version = u32::try_from(self.versions.len() + 1).expect("version count exceeds u32");
        self.versions.push(FileVersion {
            content,
            timestamp,
            version,
        });
        self.versions.last().expect("just pushed")
    }

    /// The latest version, or `None` before the first append.
    pub fn latest(&self) -> Option<&FileVersion> {
        self.versions.last()
    }

    /// The current logical content: the latest version's bytes, or empty.
    pub fn current_content(&self) -> Bytes {
        self.latest()
            .map(|v| v.content.clone())
            .unwrap_or_else(Bytes::new)
    }

    /// The lease currently in force, if any. Expired leases are invisible.
    pub fn active_lease(&self, now: Timestamp) -> Option<&Lease> {
        self.lease.as_ref().filter(|lease| !lease.is_expired(now))
    }

    /// Grants a lease to `lessee` iff no unexpired lease is held.
    pub fn try_grant_lease(
        &mut self,
        lessee: EndpointId,
        duration: Duration,
        now: Timestamp,
    ) -> bool {
        if self.active_lease(now).is_some() {
            return false;
        }
        self.lease = Some(Lease::new(lessee, now + duration));
        true
    }

    /// Releases the lease iff one exists and `lessee` holds it.
    pub fn release_lease(&mut self, lessee: EndpointId) -> bool {
        match &self.lease {
            Some(lease) if lease.lessee == lessee => {
                self.lease = None;
                true
            }
            _ => false,
        }
    }

    /// Drops the lease if it has expired. Returns true if one was dropped.
    pub fn clear_expired_lease(&mut self, now: Timestamp) -> bool {
        if self.lease.as_ref().is_some_and(|l| l.is_expired(now)) {
            self.lease = None;
            true
        } else {
            false
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
