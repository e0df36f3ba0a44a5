//! # lodestone-server: the replicated file server
//!
//! Composes the consensus node with the per-file versioned state machine.
//!
//! The core ([`ServerState`]) is pure in the same sense as the consensus
//! node: handlers take `now` explicitly and return a [`ServerOutput`] of
//! messages to send and sink operations to execute, so every client-facing
//! behavior is testable without threads, clocks, or disks.
//!
//! The runtime ([`ReplicaHandle`]) owns the impure half: one thread per
//! long-running duty (election timer, message pump, heartbeat loop, lease
//! sweeper), all serialized through a single per-replica mutex, with sink
//! writes executed before reply dispatch so acknowledged mutations are
//! already on the sink.

mod runtime;
mod server;

pub use runtime::ReplicaHandle;
pub use server::{ServerOutput, ServerState, SinkOp};

#[cfg(test)]
mod tests;
