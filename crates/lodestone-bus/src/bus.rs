//! Per-endpoint FIFO mailboxes.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use lodestone_types::EndpointId;

use crate::Message;

/// The process-local transport: one FIFO mailbox per endpoint.
///
/// `send` and `receive` are non-blocking and individually atomic. Mailboxes
/// are created lazily on first send, so messages to endpoints that never
/// come up accumulate without error. There is no bound on queue depth.
#[derive(Debug, Default)]
pub struct Bus {
    mailboxes: Mutex<HashMap<EndpointId, VecDeque<Message>>>,
}

impl Bus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `message` to `recipient`'s mailbox. Never fails.
    pub fn send(&self, message: Message, recipient: EndpointId) {
        let mut mailboxes = self.mailboxes.lock().expect("bus mutex poisoned");
        tracing::trace!(
            kind = message.payload.kind(),
            from = %message.from,
            to = %recipient,
            "message sent"
        );
        mailboxes.entry(recipient).or_default().push_back(message);
    }

    /// Pops the oldest message addressed to `self_id`, if any.
    pub fn receive(&self, self_id: EndpointId) -> Option<Message> {
        let mut mailboxes = self.mailboxes.lock().expect("bus mutex poisoned");
        let message = mailboxes.get_mut(&self_id)?.pop_front()?;
        tracing::trace!(
            kind = message.payload.kind(),
            to = %self_id,
            "message received"
        );
        Some(message)
    }

    /// Number of messages queued for `self_id`. Test/inspection helper.
    pub fn queued(&self, self_id: EndpointId) -> usize {
        let mailboxes = self.mailboxes.lock().expect("bus mutex poisoned");
        mailboxes.get(&self_id).map_or(0, VecDeque::len)
    }
}
