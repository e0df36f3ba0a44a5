//! File server state machine.
//!
//! Every inbound message lands in [`ServerState::on_message`], an
//! exhaustive match over the payload union: consensus traffic goes to the
//! node state machine, file operations are handled here. Mutations are
//! leader-only - a follower forwards them to its best-known leader, or
//! drops them (the client times out) when it knows none. Reads and leases
//! are served locally by whichever replica was contacted.

use std::collections::HashMap;
use std::time::Duration;

use bytes::Bytes;
use lodestone_bus::{Message, Payload};
use lodestone_raft::{ClusterConfig, NodeEffect, NodeOutput, NodeState, Role};
use lodestone_store::FileRecord;
use lodestone_types::{ClientId, EndpointId, File, Operation, ReplicaId, Term, Timestamp};

// ============================================================================
// Server Output
// ============================================================================

/// A sink operation the runtime must execute.
///
/// Ordered before reply dispatch: a mutation is written through before the
/// client hears about it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkOp {
    Persist(FileRecord),
    Remove(String),
}

/// Output of one server state transition.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ServerOutput {
    /// Messages to send (sink ops run first).
    pub messages: Vec<Message>,

    /// Write-through operations for the persistence sink.
    pub sink_ops: Vec<SinkOp>,

    /// Restart the election timer with a fresh draw.
    pub reset_election_timer: bool,
}

impl ServerOutput {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_messages(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Self::default()
        }
    }

    pub fn merge(&mut self, other: ServerOutput) {
        self.messages.extend(other.messages);
        self.sink_ops.extend(other.sink_ops);
        self.reset_election_timer |= other.reset_election_timer;
    }
}

// ============================================================================
// Server State
// ============================================================================

/// The full state of one replica: consensus node plus the file map.
#[derive(Debug, Clone)]
pub struct ServerState {
    node: NodeState,
    files: HashMap<String, File>,
}

impl ServerState {
    pub fn new(replica_id: ReplicaId, config: ClusterConfig) -> Self {
        Self {
            node: NodeState::new(replica_id, config),
            files: HashMap::new(),
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn replica_id(&self) -> ReplicaId {
        self.node.replica_id()
    }

    pub fn node(&self) -> &NodeState {
        &self.node
    }

    pub fn role(&self) -> Role {
        self.node.role()
    }

    pub fn current_term(&self) -> Term {
        self.node.current_term()
    }

    pub fn leader_id(&self) -> Option<ReplicaId> {
        self.node.leader_id()
    }

    pub fn file(&self, filename: &str) -> Option<&File> {
        self.files.get(filename)
    }

    /// Current content of `filename` on this replica; empty if absent.
    pub fn read_local(&self, filename: &str) -> Bytes {
        self.files
            .get(filename)
            .map(File::current_content)
            .unwrap_or_default()
    }

    // ========================================================================
    // Role Control
    // ========================================================================

    /// Harness hook: designate this replica the initial leader.
    pub fn become_leader(mut self) -> Self {
        self.node = self.node.become_leader();
        self
    }

    /// Marks the replica stopped (terminal).
    pub fn stop(mut self) -> Self {
        self.node = self.node.stop();
        self
    }

    /// Builds the leader's periodic beacons. Empty unless we lead.
    pub fn heartbeat_messages(&self) -> Vec<Message> {
        self.node.heartbeat_messages()
    }

    /// Election timer fired.
    pub fn on_election_timeout(mut self) -> (Self, ServerOutput) {
        let (node, node_output) = self.node.on_election_timeout();
        self.node = node;
        // Campaigns never carry Apply effects, so no clock is needed.
        self.absorb_node_output(node_output, Timestamp::ZERO)
    }

    // ========================================================================
    // Message Dispatch
    // ========================================================================

    /// Handles one inbound message.
    ///
    /// The stopped check lives in the node handlers for consensus traffic;
    /// for file operations the runtime has already exited its pump loop by
    /// the time a replica is stopped, so no check is needed here.
    pub fn on_message(mut self, message: Message, now: Timestamp) -> (Self, ServerOutput) {
        let from = message.from;
        match message.payload {
            // Consensus traffic is the node's business.
            Payload::RequestVote(request) => {
                let (node, output) = self.node.on_request_vote(request);
                self.node = node;
                self.absorb_node_output(output, now)
            }
            Payload::VoteResponse(response) => match from.as_replica() {
                Some(peer) => {
                    let (node, output) = self.node.on_vote_response(peer, response);
                    self.node = node;
                    self.absorb_node_output(output, now)
                }
                None => self.ignore(from, "vote_response"),
            },
            Payload::AppendEntries(beacon) => {
                let (node, output) = self.node.on_append_entries(beacon);
                self.node = node;
                self.absorb_node_output(output, now)
            }
            Payload::AppendEntriesResponse(response) => match from.as_replica() {
                Some(peer) => {
                    let (node, output) = self.node.on_append_entries_response(peer, response);
                    self.node = node;
                    self.absorb_node_output(output, now)
                }
                None => self.ignore(from, "append_entries_response"),
            },

            // File operations.
            Payload::CreateFile { filename, client_id } => {
                self.handle_create_file(filename, client_id, now)
            }
            Payload::ReadFile { filename, client_id } => self.handle_read_file(&filename, client_id),
            Payload::WriteFile {
                filename,
                content,
                client_id,
            } => self.handle_write_file(filename, content, client_id, now),
            Payload::DeleteFile { filename, client_id } => {
                self.handle_delete_file(filename, client_id)
            }
            Payload::RequestLease {
                filename,
                duration,
                lessee_id,
            } => self.handle_request_lease(&filename, duration, lessee_id, now),
            Payload::ReleaseLease { filename, lessee_id } => {
                self.handle_release_lease(&filename, lessee_id)
            }

            // Client-directed responses have no business at a replica.
            Payload::CreateFileResponse { .. }
            | Payload::ReadFileResponse { .. }
            | Payload::WriteFileResponse { .. }
            | Payload::DeleteFileResponse { .. }
            | Payload::RequestLeaseResponse { .. }
            | Payload::ReleaseLeaseResponse { .. } => self.ignore(from, "client response"),
        }
    }

    fn ignore(self, from: EndpointId, what: &str) -> (Self, ServerOutput) {
        tracing::warn!(
            replica = %self.replica_id(),
            from = %from,
            "ignoring unexpected {what}"
        );
        (self, ServerOutput::empty())
    }

    /// Folds a consensus output into a server output, executing any
    /// replicated-apply effects against the file map.
    fn absorb_node_output(mut self, output: NodeOutput, now: Timestamp) -> (Self, ServerOutput) {
        let NodeOutput { messages, effects } = output;
        let mut result = ServerOutput::with_messages(messages);
        for effect in effects {
            match effect {
                NodeEffect::ResetElectionTimer => result.reset_election_timer = true,
                NodeEffect::Apply { index, operation } => {
                    tracing::debug!(
                        replica = %self.replica_id(),
                        index = %index,
                        kind = operation.kind(),
                        "applying replicated entry"
                    );
                    result.sink_ops.extend(self.apply_operation(operation, now));
                }
            }
        }
        (self, result)
    }

    // ========================================================================
    // Replicated Apply (Follower Path)
    // ========================================================================

    /// Applies one log entry shipped by the leader to the local file map.
    fn apply_operation(&mut self, operation: Operation, now: Timestamp) -> Vec<SinkOp> {
        let replica = self.replica_id();
        match operation {
            Operation::CreateFile { filename } => {
                if self.files.contains_key(&filename) {
                    tracing::debug!(
                        replica = %replica,
                        filename = %filename,
                        "replicated create for existing file, skipping"
                    );
                    return Vec::new();
                }
                let mut file = File::new(filename.clone(), replica);
                file.add_version(Bytes::new(), now);
                let record = FileRecord::snapshot(&file);
                self.files.insert(filename, file);
                vec![SinkOp::Persist(record)]
            }
            Operation::WriteFile { filename, content } => match self.files.get_mut(&filename) {
                Some(file) => {
                    file.add_version(content, now);
                    vec![SinkOp::Persist(FileRecord::snapshot(file))]
                }
                None => {
                    tracing::warn!(
                        replica = %replica,
                        filename = %filename,
                        "replicated write to missing file, skipping"
                    );
                    Vec::new()
                }
            },
            Operation::DeleteFile { filename } => {
                if self.files.remove(&filename).is_some() {
                    vec![SinkOp::Remove(filename)]
                } else {
                    tracing::warn!(
                        replica = %replica,
                        filename = %filename,
                        "replicated delete of missing file, skipping"
                    );
                    Vec::new()
                }
            }
        }
    }

    // ========================================================================
    // Client Operations
    // ========================================================================

    fn handle_create_file(
        mut self,
        filename: String,
        client_id: ClientId,
        now: Timestamp,
    ) -> (Self, ServerOutput) {
        if !self.node.is_leader() {
            return self.forward(Payload::CreateFile { filename, client_id });
        }

        let mut output = ServerOutput::empty();
        let success = !self.files.contains_key(&filename);
        if success {
            let mut file = File::new(filename.clone(), self.replica_id());
            file.add_version(Bytes::new(), now);
            output.sink_ops.push(SinkOp::Persist(FileRecord::snapshot(&file)));
            self.files.insert(filename.clone(), file);
            let (node, _) = self.node.append_local(Operation::CreateFile {
                filename: filename.clone(),
            });
            self.node = node;
            tracing::info!(
                replica = %self.replica_id(),
                filename = %filename,
                "file created"
            );
        } else {
            tracing::warn!(
                replica = %self.replica_id(),
                filename = %filename,
                "create failed, file already exists"
            );
        }

        output
            .messages
            .push(self.reply(client_id, Payload::CreateFileResponse { success }));
        (self, output)
    }

    fn handle_read_file(self, filename: &str, client_id: ClientId) -> (Self, ServerOutput) {
        let content = self.read_local(filename);
        tracing::info!(
            replica = %self.replica_id(),
            filename = %filename,
            bytes = content.len(),
            "file read"
        );
        let reply = self.reply(client_id, Payload::ReadFileResponse { content });
        (self, ServerOutput::with_messages(vec![reply]))
    }

    fn handle_write_file(
        mut self,
        filename: String,
        content: Bytes,
        client_id: ClientId,
        now: Timestamp,
    ) -> (Self, ServerOutput) {
        if !self.node.is_leader() {
            return self.forward(Payload::WriteFile {
                filename,
                content,
                client_id,
            });
        }

        let mut output = ServerOutput::empty();
        let success = match self.files.get_mut(&filename) {
            Some(file) => {
                file.add_version(content.clone(), now);
                output.sink_ops.push(SinkOp::Persist(FileRecord::snapshot(file)));
                let (node, _) = self.node.append_local(Operation::WriteFile {
                    filename: filename.clone(),
                    content,
                });
                self.node = node;
                tracing::info!(
                    replica = %self.replica_id(),
                    filename = %filename,
                    "file updated"
                );
                true
            }
            None => {
                tracing::warn!(
                    replica = %self.replica_id(),
                    filename = %filename,
                    "write failed, file not found"
                );
                false
            }
        };

        output
            .messages
            .push(self.reply(client_id, Payload::WriteFileResponse { success }));
        (self, output)
    }

    fn handle_delete_file(mut self, filename: String, client_id: ClientId) -> (Self, ServerOutput) {
        if !self.node.is_leader() {
            return self.forward(Payload::DeleteFile { filename, client_id });
        }

        let mut output = ServerOutput::empty();
        let success = self.files.remove(&filename).is_some();
        if success {
            output.sink_ops.push(SinkOp::Remove(filename.clone()));
            let (node, _) = self.node.append_local(Operation::DeleteFile {
                filename: filename.clone(),
            });
            self.node = node;
            tracing::info!(
                replica = %self.replica_id(),
                filename = %filename,
                "file deleted"
            );
        } else {
            tracing::warn!(
                replica = %self.replica_id(),
                filename = %filename,
                "delete failed, file not found"
            );
        }

        output
            .messages
            .push(self.reply(client_id, Payload::DeleteFileResponse { success }));
        (self, output)
    }

    // ========================================================================
    // Leases (local to the contacted replica)
    // ========================================================================

    fn handle_request_lease(
        mut self,
        filename: &str,
        duration: Duration,
        lessee_id: EndpointId,
        now: Timestamp,
    ) -> (Self, ServerOutput) {
        let granted = match self.files.get_mut(filename) {
            Some(file) => file.try_grant_lease(lessee_id, duration, now),
            None => {
                tracing::warn!(
                    replica = %self.replica_id(),
                    filename = %filename,
                    "lease requested for missing file"
                );
                false
            }
        };
        if granted {
            tracing::info!(
                replica = %self.replica_id(),
                filename = %filename,
                lessee = %lessee_id,
                "lease granted"
            );
        } else {
            tracing::warn!(
                replica = %self.replica_id(),
                filename = %filename,
                lessee = %lessee_id,
                "lease denied"
            );
        }

        let reply = Message::targeted(
            EndpointId::Replica(self.replica_id()),
            lessee_id,
            Payload::RequestLeaseResponse { granted },
        );
        (self, ServerOutput::with_messages(vec![reply]))
    }

    fn handle_release_lease(
        mut self,
        filename: &str,
        lessee_id: EndpointId,
    ) -> (Self, ServerOutput) {
        let released = match self.files.get_mut(filename) {
            Some(file) => file.release_lease(lessee_id),
            None => false,
        };
        if released {
            tracing::info!(
                replica = %self.replica_id(),
                filename = %filename,
                lessee = %lessee_id,
                "lease released"
            );
        } else {
            tracing::warn!(
                replica = %self.replica_id(),
                filename = %filename,
                lessee = %lessee_id,
                "lease release denied"
            );
        }

        let reply = Message::targeted(
            EndpointId::Replica(self.replica_id()),
            lessee_id,
            Payload::ReleaseLeaseResponse { released },
        );
        (self, ServerOutput::with_messages(vec![reply]))
    }

    /// Clears expired leases. Returns how many were cleared.
    pub fn sweep_leases(mut self, now: Timestamp) -> (Self, usize) {
        let mut cleared = 0;
        for file in self.files.values_mut() {
            if file.clear_expired_lease(now) {
                tracing::info!(
                    replica = %self.node.replica_id(),
                    filename = %file.filename,
                    "lease expired"
                );
                cleared += 1;
            }
        }
        (self, cleared)
    }

    // ========================================================================
    // Routing Helpers
    // ========================================================================

    /// Hands a mutation to the best-known leader, or drops it.
    ///
    /// The payload travels unchanged - the client id inside it is the reply
    /// address, so the leader answers the client directly.
    fn forward(self, payload: Payload) -> (Self, ServerOutput) {
        match self.leader_id().filter(|&l| l != self.replica_id()) {
            Some(leader) => {
                tracing::debug!(
                    replica = %self.replica_id(),
                    leader = %leader,
                    kind = payload.kind(),
                    "forwarding to leader"
                );
                let message =
                    Message::targeted(EndpointId::Replica(self.replica_id()), leader, payload);
                (self, ServerOutput::with_messages(vec![message]))
            }
            None => {
                tracing::error!(
                    replica = %self.replica_id(),
                    kind = payload.kind(),
                    "no known leader, dropping request"
                );
                (self, ServerOutput::empty())
            }
        }
    }

    fn reply(&self, client_id: ClientId, payload: Payload) -> Message {
        Message::targeted(EndpointId::Replica(self.replica_id()), client_id, payload)
    }
}
