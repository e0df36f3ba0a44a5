//! Heartbeat and log replication handlers.
//!
//! The leader beacons `append_entries` to every peer each heartbeat
//! period. Each beacon carries the log suffix that peer has not yet
//! acknowledged (empty when caught up), so replication needs no separate
//! message flow. Followers append in order, apply immediately, and answer
//! with their log length; the leader uses the answer to advance or back up
//! its shipping cursor.

use lodestone_bus::{AppendEntries, AppendEntriesResponse, Message, Payload};
use lodestone_types::{LogIndex, ReplicaId, Term};

use super::state::Role;
use super::{NodeEffect, NodeOutput, NodeState};

impl NodeState {
    // ========================================================================
    // Heartbeat Construction (Leader)
    // ========================================================================

    /// Builds one `append_entries` per peer, carrying any unacknowledged
    /// log suffix. Returns nothing unless we are the leader.
    pub fn heartbeat_messages(&self) -> Vec<Message> {
        if self.role != Role::Leader {
            return Vec::new();
        }

        self.config
            .peers(self.replica_id)
            .map(|peer| {
                let next = self
                    .next_index
                    .get(&peer)
                    .copied()
                    .unwrap_or_else(|| self.last_log_index().next());
                let prev_log_index = next.prev();
                let prev_log_term = if prev_log_index == LogIndex::ZERO {
                    Term::ZERO
                } else {
                    self.log[prev_log_index.as_usize() - 1].term
                };
                let entries = if next.as_usize() <= self.log.len() {
                    self.log[next.as_usize() - 1..].to_vec()
                } else {
                    Vec::new()
                };

                let beacon = AppendEntries {
                    term: self.current_term,
                    leader_id: self.replica_id,
                    prev_log_index,
                    prev_log_term,
                    entries,
                    leader_commit: self.commit_index,
                };
                Message::targeted(self.replica_id, peer, Payload::AppendEntries(beacon))
            })
            .collect()
    }

    // ========================================================================
    // AppendEntries Handler (Follower)
    // ========================================================================

    /// Accepts a heartbeat from a current-or-newer leader.
    ///
    /// On acceptance: adopt the term, record the leader, reset the election
    /// timer, append any entries we are missing, and apply them in order.
    /// Entries we already hold are skipped - the leader re-ships until it
    /// sees our acknowledgment. A beacon whose entries start past our log
    /// end is answered with our actual length so the leader backs up.
    pub fn on_append_entries(mut self, beacon: AppendEntries) -> (Self, NodeOutput) {
        if self.role == Role::Stopped {
            return (self, NodeOutput::empty());
        }

        if beacon.term < self.current_term {
            let response = AppendEntriesResponse {
                term: self.current_term,
                success: false,
                match_index: self.last_log_index(),
            };
            let message = Message::targeted(
                self.replica_id,
                beacon.leader_id,
                Payload::AppendEntriesResponse(response),
            );
            return (self, NodeOutput::with_messages(vec![message]));
        }

        self.observe_term(beacon.term);
        self.role = Role::Follower;
        self.leader_id = Some(beacon.leader_id);

        let mut effects = vec![NodeEffect::ResetElectionTimer];
        let mut index = beacon.prev_log_index;
        for entry in beacon.entries {
            index = index.next();
            if index <= self.last_log_index() {
                // Re-shipped entry we already hold.
                continue;
            }
            if index != self.last_log_index().next() {
                tracing::debug!(
                    replica = %self.replica_id,
                    expected = %self.last_log_index().next(),
                    got = %index,
                    "gap in shipped entries, reporting log length for catch-up"
                );
                break;
            }
            debug_assert!(entry.term <= self.current_term);
            let operation = entry.operation.clone();
            self.log.push(entry);
            self.commit_index = self.last_log_index();
            self.last_applied = self.commit_index;
            effects.push(NodeEffect::Apply { index, operation });
        }

        debug_assert!(self.last_applied <= self.commit_index);
        debug_assert!(self.commit_index <= self.last_log_index());

        let response = AppendEntriesResponse {
            term: self.current_term,
            success: true,
            match_index: self.last_log_index(),
        };
        let message = Message::targeted(
            self.replica_id,
            beacon.leader_id,
            Payload::AppendEntriesResponse(response),
        );
        (self, NodeOutput { messages: vec![message], effects })
    }

    // ========================================================================
    // AppendEntriesResponse Handler (Leader)
    // ========================================================================

    /// Advances the shipping cursors for an acknowledging peer, or steps
    /// down if the peer is in a higher term.
    pub fn on_append_entries_response(
        mut self,
        from: ReplicaId,
        response: AppendEntriesResponse,
    ) -> (Self, NodeOutput) {
        if self.role == Role::Stopped {
            return (self, NodeOutput::empty());
        }

        if response.term > self.current_term {
            self.observe_term(response.term);
            return (self, NodeOutput::empty());
        }
        if self.role != Role::Leader || response.term < self.current_term {
            return (self, NodeOutput::empty());
        }

        if response.success {
            self.match_index.insert(from, response.match_index);
            self.next_index.insert(from, response.match_index.next());
        }
        (self, NodeOutput::empty())
    }
}
