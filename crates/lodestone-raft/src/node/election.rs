//! Leader election handlers.
//!
//! A follower that hears nothing from a leader within its election timeout
//! campaigns: it increments the term, votes for itself, and broadcasts
//! `request_vote`. Votes are granted at most once per term; a strict
//! majority makes the candidate leader.

use lodestone_bus::{Message, Payload, RequestVote, VoteResponse};
use lodestone_types::ReplicaId;

use super::state::Role;
use super::{NodeEffect, NodeOutput, NodeState};

impl NodeState {
    // ========================================================================
    // Election Timeout
    // ========================================================================

    /// Starts a new election.
    ///
    /// Fired by the runtime's election timer. Leaders are exempt (they
    /// assert liveness by heartbeating) and stopped replicas stay stopped.
    pub fn on_election_timeout(mut self) -> (Self, NodeOutput) {
        if matches!(self.role, Role::Leader | Role::Stopped) {
            return (self, NodeOutput::empty());
        }

        self.role = Role::Candidate;
        self.current_term = self.current_term.next();
        self.voted_for = Some(self.replica_id);
        self.leader_id = None;
        self.votes_received.clear();
        self.votes_received.insert(self.replica_id);

        tracing::debug!(
            replica = %self.replica_id,
            term = %self.current_term,
            "election timeout, starting election"
        );

        let request = RequestVote {
            term: self.current_term,
            candidate_id: self.replica_id,
            last_log_index: self.last_log_index(),
            last_log_term: self.last_log_term(),
        };
        let message = Message::broadcast(self.replica_id, Payload::RequestVote(request));

        let output = NodeOutput {
            messages: vec![message],
            effects: vec![NodeEffect::ResetElectionTimer],
        };
        (self, output)
    }

    // ========================================================================
    // RequestVote Handler
    // ========================================================================

    /// Votes for a candidate iff its term is current and we have not voted
    /// for anyone else this term.
    ///
    /// The response carries our term *after* adopting the candidate's, so
    /// a granted vote always counts toward the candidate's tally.
    pub fn on_request_vote(mut self, request: RequestVote) -> (Self, NodeOutput) {
        if self.role == Role::Stopped {
            return (self, NodeOutput::empty());
        }

        let mut reset_timer = false;
        if request.term > self.current_term {
            self.observe_term(request.term);
            reset_timer = true;
        }

        let may_vote =
            self.voted_for.is_none() || self.voted_for == Some(request.candidate_id);
        let vote_granted = if may_vote && request.term >= self.current_term {
            self.voted_for = Some(request.candidate_id);
            reset_timer = true;
            tracing::debug!(
                replica = %self.replica_id,
                candidate = %request.candidate_id,
                term = %self.current_term,
                "vote granted"
            );
            true
        } else {
            tracing::debug!(
                replica = %self.replica_id,
                candidate = %request.candidate_id,
                term = %self.current_term,
                voted_for = ?self.voted_for,
                "vote denied"
            );
            false
        };

        let response = VoteResponse {
            term: self.current_term,
            vote_granted,
        };
        let message = Message::targeted(
            self.replica_id,
            request.candidate_id,
            Payload::VoteResponse(response),
        );

        let effects = if reset_timer {
            vec![NodeEffect::ResetElectionTimer]
        } else {
            Vec::new()
        };
        (self, NodeOutput { messages: vec![message], effects })
    }

    // ========================================================================
    // VoteResponse Handler
    // ========================================================================

    /// Tallies a vote. Only responses from our own election term count;
    /// stale terms are discarded and higher terms demote us.
    pub fn on_vote_response(mut self, from: ReplicaId, response: VoteResponse) -> (Self, NodeOutput) {
        if self.role != Role::Candidate {
            return (self, NodeOutput::empty());
        }

        if response.term > self.current_term {
            self.observe_term(response.term);
            return (self, NodeOutput::empty());
        }
        if response.term < self.current_term || !response.vote_granted {
            return (self, NodeOutput::empty());
        }

        self.votes_received.insert(from);
        tracing::debug!(
            replica = %self.replica_id,
            from = %from,
            term = %self.current_term,
            votes = self.votes_received.len(),
            "vote received"
        );

        if self.votes_received.len() >= self.config.quorum_size() {
            self = self.become_leader();
        }
        (self, NodeOutput::empty())
    }
}
