//! The consensus node state machine.
//!
//! # Key Types
//!
//! - [`NodeState`]: the per-replica consensus state
//! - [`NodeOutput`]: messages and effects produced by processing an event
//! - [`NodeEffect`]: what the caller must do with its own resources
//!
//! Handlers consume the state and return the successor plus an output; the
//! caller (the replica runtime) sends the messages over the bus and
//! executes the effects.

mod election;
mod replication;
mod state;

pub use state::{NodeState, Role};

use lodestone_bus::Message;
use lodestone_types::{LogIndex, Operation};

// ============================================================================
// Node Output
// ============================================================================

/// Output produced by the node state machine.
///
/// The caller is responsible for:
/// 1. Sending the outgoing messages via the bus (expanding broadcasts)
/// 2. Executing the effects against its own resources
#[derive(Debug, Default, PartialEq, Eq)]
pub struct NodeOutput {
    /// Messages to send.
    pub messages: Vec<Message>,

    /// Effects for the caller to execute.
    pub effects: Vec<NodeEffect>,
}

impl NodeOutput {
    /// Creates an empty output (no messages, no effects).
    pub fn empty() -> Self {
        Self::default()
    }

    /// Creates output with only messages.
    pub fn with_messages(messages: Vec<Message>) -> Self {
        Self {
            messages,
            effects: Vec::new(),
        }
    }

    /// Returns true if there are no messages or effects.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty() && self.effects.is_empty()
    }

    /// Merges another output into this one, preserving order.
    pub fn merge(&mut self, other: NodeOutput) {
        self.messages.extend(other.messages);
        self.effects.extend(other.effects);
    }
}

// ============================================================================
// Node Effects
// ============================================================================

/// Side effects the state machine cannot perform itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeEffect {
    /// Restart the election timer with a freshly drawn timeout.
    ResetElectionTimer,

    /// Apply a replicated operation to the local state machine.
    ///
    /// Emitted in log order as entries arrive from the leader.
    Apply {
        index: LogIndex,
        operation: Operation,
    },
}
