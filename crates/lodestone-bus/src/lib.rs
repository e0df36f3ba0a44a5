//! # lodestone-bus: message envelope and in-process transport
//!
//! The bus delivers [`Message`]s between named endpoints inside one
//! process. It is deliberately dumb: per-recipient FIFO mailboxes behind a
//! single mutex, lazy mailbox creation, no loss, no duplication, and no
//! ordering guarantees across recipients. Messages are opaque to it.
//!
//! Routing intent lives on the envelope: a [`Message`] names its sender and
//! either one recipient or "all peers" (broadcast, expanded by the replica
//! runtime). Dispatch on arrival is an exhaustive `match` over [`Payload`]
//! in the receiving replica's message pump; the bus holds no handler
//! registry.

mod bus;
mod message;

pub use bus::Bus;
pub use message::{
    AppendEntries, AppendEntriesResponse, Message, Payload, RequestVote, VoteResponse,
};
