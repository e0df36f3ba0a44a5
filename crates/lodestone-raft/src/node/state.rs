//! Node state structure and role transitions.

use std::collections::{HashMap, HashSet};

use lodestone_types::{LogEntry, LogIndex, Operation, ReplicaId, Term};

use crate::config::ClusterConfig;

// ============================================================================
// Role
// ============================================================================

/// The role a replica currently plays in the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Passive: accepts entries from the leader, votes in elections.
    Follower,

    /// Campaigning for leadership after an election timeout.
    Candidate,

    /// Sole writer of new log entries; beacons heartbeats.
    Leader,

    /// Terminal sink simulating failure. Processes nothing.
    Stopped,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Follower => "follower",
            Role::Candidate => "candidate",
            Role::Leader => "leader",
            Role::Stopped => "stopped",
        }
    }
}

// ============================================================================
// Node State
// ============================================================================

/// The consensus state of one replica.
///
/// # State Categories
///
/// 1. **Identity**: `replica_id`, `config`
/// 2. **Term state**: `role`, `current_term`, `voted_for`, `leader_id`
/// 3. **Log state**: `log`, `commit_index`, `last_applied`
/// 4. **Leader tracking**: `votes_received`, `next_index`, `match_index`
///
/// `current_term` is monotonically non-decreasing for the lifetime of the
/// replica, and `last_applied <= commit_index <= log.len()` always holds.
#[derive(Debug, Clone)]
pub struct NodeState {
    pub(crate) replica_id: ReplicaId,
    pub(crate) config: ClusterConfig,

    pub(crate) role: Role,
    pub(crate) current_term: Term,
    pub(crate) voted_for: Option<ReplicaId>,
    /// Best-known leader for the current term, if any.
    pub(crate) leader_id: Option<ReplicaId>,

    pub(crate) log: Vec<LogEntry>,
    pub(crate) commit_index: LogIndex,
    pub(crate) last_applied: LogIndex,

    /// Votes collected while campaigning (includes our own).
    pub(crate) votes_received: HashSet<ReplicaId>,
    /// Next log index to ship to each peer (leader only).
    pub(crate) next_index: HashMap<ReplicaId, LogIndex>,
    /// Highest log index each peer has acknowledged (leader only).
    pub(crate) match_index: HashMap<ReplicaId, LogIndex>,
}

impl NodeState {
    /// Creates a fresh follower at term zero.
    pub fn new(replica_id: ReplicaId, config: ClusterConfig) -> Self {
        debug_assert!(config.contains(replica_id));
        Self {
            replica_id,
            config,
            role: Role::Follower,
            current_term: Term::ZERO,
            voted_for: None,
            leader_id: None,
            log: Vec::new(),
            commit_index: LogIndex::ZERO,
            last_applied: LogIndex::ZERO,
            votes_received: HashSet::new(),
            next_index: HashMap::new(),
            match_index: HashMap::new(),
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn replica_id(&self) -> ReplicaId {
        self.replica_id
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_leader(&self) -> bool {
        self.role == Role::Leader
    }

    pub fn current_term(&self) -> Term {
        self.current_term
    }

    pub fn voted_for(&self) -> Option<ReplicaId> {
        self.voted_for
    }

    pub fn leader_id(&self) -> Option<ReplicaId> {
        self.leader_id
    }

    pub fn log(&self) -> &[LogEntry] {
        &self.log
    }

    pub fn commit_index(&self) -> LogIndex {
        self.commit_index
    }

    pub fn last_applied(&self) -> LogIndex {
        self.last_applied
    }

    /// Index of the last log entry (`ZERO` on an empty log).
    pub fn last_log_index(&self) -> LogIndex {
        LogIndex::new(self.log.len() as u64)
    }

    /// Term of the last log entry (`ZERO` on an empty log).
    pub fn last_log_term(&self) -> Term {
        self.log.last().map_or(Term::ZERO, |entry| entry.term)
    }

    /// The leader's shipping cursor for `peer`. Test/inspection helper.
    pub fn next_index_of(&self, peer: ReplicaId) -> Option<LogIndex> {
        self.next_index.get(&peer).copied()
    }

    /// The highest index `peer` has acknowledged. Test/inspection helper.
    pub fn match_index_of(&self, peer: ReplicaId) -> Option<LogIndex> {
        self.match_index.get(&peer).copied()
    }

    // ========================================================================
    // Role Transitions
    // ========================================================================

    /// Assumes leadership of the current term.
    ///
    /// Reached through vote counting, or directly by the harness when it
    /// designates the initial leader. Shipping cursors start at the end of
    /// our log; peers that are behind report their length and we back up.
    pub fn become_leader(mut self) -> Self {
        self.role = Role::Leader;
        self.leader_id = Some(self.replica_id);
        let next = self.last_log_index().next();
        for peer in self.config.peers(self.replica_id).collect::<Vec<_>>() {
            self.next_index.insert(peer, next);
            self.match_index.insert(peer, LogIndex::ZERO);
        }
        tracing::info!(
            replica = %self.replica_id,
            term = %self.current_term,
            "became leader"
        );
        self
    }

    /// Marks the replica stopped. Sticky: no handler or timer runs again.
    pub fn stop(mut self) -> Self {
        tracing::info!(replica = %self.replica_id, "replica stopped");
        self.role = Role::Stopped;
        self
    }

    /// Adopts a strictly higher term observed in any message: demote to
    /// follower, forget our vote and the old leader.
    pub(crate) fn observe_term(&mut self, term: Term) {
        if term > self.current_term {
            if self.role != Role::Follower {
                tracing::debug!(
                    replica = %self.replica_id,
                    role = self.role.as_str(),
                    old_term = %self.current_term,
                    new_term = %term,
                    "stepping down to follower"
                );
            }
            self.current_term = term;
            self.voted_for = None;
            self.leader_id = None;
            self.role = Role::Follower;
        }
    }

    // ========================================================================
    // Local Append (Leader)
    // ========================================================================

    /// Appends a client operation to the leader's log.
    ///
    /// This variant applies on append: the caller has already executed the
    /// operation against its state machine, so the applied/committed
    /// cursors advance with the log. Replication to peers rides the next
    /// heartbeat.
    pub fn append_local(mut self, operation: Operation) -> (Self, LogIndex) {
        debug_assert!(self.is_leader(), "only the leader appends new entries");
        debug_assert!(
            self.log.last().is_none_or(|e| e.term <= self.current_term),
            "log terms must be non-decreasing"
        );
        self.log.push(LogEntry::new(self.current_term, operation));
        let index = self.last_log_index();
        self.commit_index = index;
        self.last_applied = index;
        tracing::debug!(
            replica = %self.replica_id,
            term = %self.current_term,
            index = %index,
            "appended entry to log"
        );
        (self, index)
    }
}
