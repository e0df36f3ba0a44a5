//! The threaded replica runtime.
//!
//! One replica runs four loops, each on its own thread:
//! - **election timer**: polls every 100 ms; fires a campaign when nothing
//!   has reset the timer within the randomized election timeout
//! - **message pump**: drains the replica's mailbox and dispatches each
//!   message through the server state machine
//! - **heartbeat loop**: while leader, beacons `append_entries` to every
//!   peer each heartbeat period (send first, then sleep, so a fresh leader
//!   announces itself immediately)
//! - **lease sweeper**: clears expired leases every sweep period
//!
//! All four serialize through the replica's single mutex and exit when the
//! role becomes `Stopped`. Lock order is replica then bus; sink writes and
//! message dispatch happen after the state transition, with sink ops first
//! so a mutation is on the sink before its acknowledgment is readable.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use lodestone_bus::{Bus, Message};
use lodestone_raft::{ClusterConfig, Role, TimingConfig};
use lodestone_store::FileSink;
use lodestone_types::{EndpointId, ReplicaId, Term, Timestamp};

use crate::server::{ServerOutput, ServerState, SinkOp};

// ============================================================================
// Shared Replica Cell
// ============================================================================

/// The mutex-guarded heart of a replica: the state machine plus the
/// election timer bookkeeping the state machine cannot own (it is pure).
struct Cell {
    /// Absent only inside a state transition.
    server: Option<ServerState>,
    last_reset: Instant,
    election_timeout: Duration,
}

impl Cell {
    /// Runs one state transition, applying any timer-reset effect.
    fn with_state(
        &mut self,
        timing: &TimingConfig,
        f: impl FnOnce(ServerState) -> (ServerState, ServerOutput),
    ) -> ServerOutput {
        let state = self.server.take().expect("replica state held across transition");
        let (state, output) = f(state);
        self.server = Some(state);
        if output.reset_election_timer {
            self.last_reset = Instant::now();
            self.election_timeout = timing.draw_election_timeout(&mut rand::thread_rng());
        }
        output
    }

    fn state(&self) -> &ServerState {
        self.server.as_ref().expect("replica state held across transition")
    }

    fn role(&self) -> Role {
        self.state().role()
    }
}

struct Shared {
    replica_id: ReplicaId,
    cluster: ClusterConfig,
    timing: TimingConfig,
    bus: Arc<Bus>,
    sink: Arc<dyn FileSink>,
    cell: Mutex<Cell>,
}

// ============================================================================
// Replica Handle
// ============================================================================

/// A running replica: its four duty loops plus probes for the harness.
///
/// Dropping the handle does not stop the replica; call [`stop`] to
/// terminate it. Stop is sticky - the loops observe the role and exit.
///
/// [`stop`]: ReplicaHandle::stop
pub struct ReplicaHandle {
    shared: Arc<Shared>,
}

impl ReplicaHandle {
    /// Builds the replica state and spawns its duty loops.
    pub fn spawn(
        replica_id: ReplicaId,
        cluster: ClusterConfig,
        timing: TimingConfig,
        bus: Arc<Bus>,
        sink: Arc<dyn FileSink>,
    ) -> Self {
        let election_timeout = timing.draw_election_timeout(&mut rand::thread_rng());
        let shared = Arc::new(Shared {
            replica_id,
            cluster: cluster.clone(),
            timing,
            bus,
            sink,
            cell: Mutex::new(Cell {
                server: Some(ServerState::new(replica_id, cluster)),
                last_reset: Instant::now(),
                election_timeout,
            }),
        });

        {
            let shared = Arc::clone(&shared);
            thread::spawn(move || run_election_timer(&shared));
        }
        {
            let shared = Arc::clone(&shared);
            thread::spawn(move || run_message_pump(&shared));
        }
        {
            let shared = Arc::clone(&shared);
            thread::spawn(move || run_heartbeats(&shared));
        }
        {
            let shared = Arc::clone(&shared);
            thread::spawn(move || run_lease_sweeper(&shared));
        }

        tracing::info!(replica = %replica_id, "replica started");
        Self { shared }
    }

    pub fn replica_id(&self) -> ReplicaId {
        self.shared.replica_id
    }

    /// Harness hook: designate this replica the initial leader.
    pub fn become_leader(&self) {
        let mut cell = self.shared.lock_cell();
        let _ = cell.with_state(&self.shared.timing, |s| (s.become_leader(), ServerOutput::empty()));
    }

    /// Marks the replica stopped. All duty loops exit; mail accumulates
    /// harmlessly.
    pub fn stop(&self) {
        let mut cell = self.shared.lock_cell();
        let _ = cell.with_state(&self.shared.timing, |s| (s.stop(), ServerOutput::empty()));
    }

    pub fn role(&self) -> Role {
        self.shared.lock_cell().role()
    }

    pub fn current_term(&self) -> Term {
        self.shared.lock_cell().state().current_term()
    }

    pub fn leader_id(&self) -> Option<ReplicaId> {
        self.shared.lock_cell().state().leader_id()
    }

    /// Reads `filename` from this replica's local state, bypassing the
    /// client path. Harness/test probe.
    pub fn read_local(&self, filename: &str) -> Bytes {
        self.shared.lock_cell().state().read_local(filename)
    }
}

impl Shared {
    fn lock_cell(&self) -> std::sync::MutexGuard<'_, Cell> {
        self.cell.lock().expect("replica mutex poisoned")
    }

    /// Executes a transition's output: sink ops first, then messages.
    fn execute(&self, output: ServerOutput) {
        for op in output.sink_ops {
            let result = match &op {
                SinkOp::Persist(record) => self.sink.persist(record, self.replica_id),
                SinkOp::Remove(filename) => self.sink.remove(filename, self.replica_id),
            };
            if let Err(err) = result {
                // Logged only: the in-memory change stands (crash recovery
                // is out of scope, so an unacknowledged blob is tolerable).
                tracing::error!(
                    replica = %self.replica_id,
                    error = %err,
                    "persistence failure"
                );
            }
        }
        for message in output.messages {
            self.dispatch(message);
        }
    }

    /// Sends a message, expanding broadcasts to every peer.
    fn dispatch(&self, message: Message) {
        match message.to {
            Some(recipient) => self.bus.send(message, recipient),
            None => {
                for peer in self.cluster.peers(self.replica_id) {
                    self.bus.send(message.clone(), EndpointId::Replica(peer));
                }
            }
        }
    }
}

// ============================================================================
// Duty Loops
// ============================================================================

fn run_election_timer(shared: &Shared) {
    loop {
        thread::sleep(shared.timing.mailbox_poll);
        let output = {
            let mut cell = shared.lock_cell();
            match cell.role() {
                Role::Stopped => break,
                Role::Leader => continue,
                Role::Follower | Role::Candidate => {}
            }
            if cell.last_reset.elapsed() < cell.election_timeout {
                continue;
            }
            cell.with_state(&shared.timing, ServerState::on_election_timeout)
        };
        shared.execute(output);
    }
    tracing::debug!(replica = %shared.replica_id, "election timer exited");
}

fn run_message_pump(shared: &Shared) {
    let inbox = EndpointId::Replica(shared.replica_id);
    'outer: loop {
        while let Some(message) = shared.bus.receive(inbox) {
            let output = {
                let mut cell = shared.lock_cell();
                if cell.role() == Role::Stopped {
                    break 'outer;
                }
                let now = Timestamp::now();
                cell.with_state(&shared.timing, |s| s.on_message(message, now))
            };
            shared.execute(output);
        }
        if shared.lock_cell().role() == Role::Stopped {
            break;
        }
        thread::sleep(shared.timing.mailbox_poll);
    }
    tracing::debug!(replica = %shared.replica_id, "message pump exited");
}

fn run_heartbeats(shared: &Shared) {
    loop {
        let beacons = {
            let cell = shared.lock_cell();
            match cell.role() {
                Role::Stopped => break,
                Role::Leader => cell.state().heartbeat_messages(),
                Role::Follower | Role::Candidate => Vec::new(),
            }
        };
        for beacon in beacons {
            shared.dispatch(beacon);
        }
        thread::sleep(shared.timing.heartbeat_period);
    }
    tracing::debug!(replica = %shared.replica_id, "heartbeat loop exited");
}

fn run_lease_sweeper(shared: &Shared) {
    loop {
        thread::sleep(shared.timing.lease_sweep_period);
        let mut cell = shared.lock_cell();
        if cell.role() == Role::Stopped {
            break;
        }
        let now = Timestamp::now();
        let _ = cell.with_state(&shared.timing, |s| {
            let (s, _cleared) = s.sweep_leases(now);
            (s, ServerOutput::empty())
        });
    }
    tracing::debug!(replica = %shared.replica_id, "lease sweeper exited");
}
