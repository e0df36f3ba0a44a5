//! # lodestone-raft: the consensus core
//!
//! This crate implements the Raft-style consensus node as a pure,
//! deterministic state machine:
//! - Takes messages and timer events as input
//! - Produces new state, outgoing messages, and effects as output
//! - No I/O, no clocks, no randomness
//!
//! The runtime (in `lodestone-server`) owns the timers, draws the
//! randomized election timeout, sends the messages, and executes the
//! effects. Keeping the protocol pure makes every election and replication
//! scenario testable as plain function calls.
//!
//! # Protocol Overview
//!
//! ```text
//! Follower ──election timeout──► Candidate ──quorum of votes──► Leader
//!     ▲                             │                             │
//!     └──────── higher term ────────┴───────── higher term ───────┘
//! ```
//!
//! The leader beacons `append_entries` every heartbeat period; each beacon
//! carries the log suffix the peer has not acknowledged, so replication
//! rides the heartbeat. In this variant entries are applied on append -
//! the leader applies before quorum acknowledgment, and
//! `commit_index`/`match_index` are bookkeeping only.
//!
//! `Stopped` is a terminal sink used to simulate failure: a stopped node
//! processes no timers and no messages.

mod config;
mod node;

pub use config::{ClusterConfig, TimingConfig};
pub use node::{NodeEffect, NodeOutput, NodeState, Role};
