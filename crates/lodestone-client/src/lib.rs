//! # lodestone-client: the client stub
//!
//! A [`Client`] is bound to one replica at construction. Each call sends a
//! single typed request over the bus and then drains the client's own
//! mailbox until the matching response discriminator arrives or the
//! deadline expires. Unexpected response types (stragglers from an earlier
//! timed-out call, usually) are logged and skipped.
//!
//! The stub holds no consensus state: if the bound replica is a follower,
//! forwarding happens server-side and the reply still comes straight back
//! here.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use lodestone_bus::{Bus, Message, Payload};
use lodestone_types::{ClientId, EndpointId, ReplicaId};
use thiserror::Error;

/// Idle sleep between mailbox polls while waiting for a response.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Client-side failures.
#[derive(Error, Debug)]
pub enum ClientError {
    /// No matching response arrived within the deadline. The request may
    /// still have executed server-side.
    #[error("no {expected} received within {deadline:?}")]
    Timeout {
        expected: &'static str,
        deadline: Duration,
    },
}

/// A thin sender/receiver mediating user-level calls and one replica.
pub struct Client {
    client_id: ClientId,
    server_id: ReplicaId,
    bus: Arc<Bus>,
    deadline: Duration,
}

impl Client {
    pub fn new(
        client_id: ClientId,
        server_id: ReplicaId,
        bus: Arc<Bus>,
        deadline: Duration,
    ) -> Self {
        Self {
            client_id,
            server_id,
            bus,
            deadline,
        }
    }

    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    // ========================================================================
    // File Operations
    // ========================================================================

    /// Creates `filename` with empty initial content.
    pub fn create_file(&self, filename: &str) -> Result<bool, ClientError> {
        self.request(Payload::CreateFile {
            filename: filename.to_owned(),
            client_id: self.client_id,
        });
        self.await_response("create_file_response", |payload| match payload {
            Payload::CreateFileResponse { success } => Some(*success),
            _ => None,
        })
    }

    /// Reads the current content of `filename` (empty if absent).
    pub fn read_file(&self, filename: &str) -> Result<Bytes, ClientError> {
        self.request(Payload::ReadFile {
            filename: filename.to_owned(),
            client_id: self.client_id,
        });
        self.await_response("read_file_response", |payload| match payload {
            Payload::ReadFileResponse { content } => Some(content.clone()),
            _ => None,
        })
    }

    /// Writes a new version of `filename`.
    pub fn write_file(&self, filename: &str, content: impl Into<Bytes>) -> Result<bool, ClientError> {
        self.request(Payload::WriteFile {
            filename: filename.to_owned(),
            content: content.into(),
            client_id: self.client_id,
        });
        self.await_response("write_file_response", |payload| match payload {
            Payload::WriteFileResponse { success } => Some(*success),
            _ => None,
        })
    }

    /// Deletes `filename`.
    pub fn delete_file(&self, filename: &str) -> Result<bool, ClientError> {
        self.request(Payload::DeleteFile {
            filename: filename.to_owned(),
            client_id: self.client_id,
        });
        self.await_response("delete_file_response", |payload| match payload {
            Payload::DeleteFileResponse { success } => Some(*success),
            _ => None,
        })
    }

    // ========================================================================
    // Leases
    // ========================================================================

    /// Requests an exclusive lease on `filename` for `duration`.
    pub fn request_lease(&self, filename: &str, duration: Duration) -> Result<bool, ClientError> {
        self.request(Payload::RequestLease {
            filename: filename.to_owned(),
            duration,
            lessee_id: EndpointId::Client(self.client_id),
        });
        self.await_response("request_lease_response", |payload| match payload {
            Payload::RequestLeaseResponse { granted } => Some(*granted),
            _ => None,
        })
    }

    /// Releases a lease this client holds on `filename`.
    pub fn release_lease(&self, filename: &str) -> Result<bool, ClientError> {
        self.request(Payload::ReleaseLease {
            filename: filename.to_owned(),
            lessee_id: EndpointId::Client(self.client_id),
        });
        self.await_response("release_lease_response", |payload| match payload {
            Payload::ReleaseLeaseResponse { released } => Some(*released),
            _ => None,
        })
    }

    // ========================================================================
    // Plumbing
    // ========================================================================

    fn request(&self, payload: Payload) {
        tracing::debug!(
            client = %self.client_id,
            server = %self.server_id,
            kind = payload.kind(),
            "sending request"
        );
        let message = Message::targeted(self.client_id, self.server_id, payload);
        self.bus.send(message, EndpointId::Replica(self.server_id));
    }

    /// Drains this client's mailbox until `extract` matches, or times out.
    fn await_response<T>(
        &self,
        expected: &'static str,
        extract: impl Fn(&Payload) -> Option<T>,
    ) -> Result<T, ClientError> {
        let start = Instant::now();
        let inbox = EndpointId::Client(self.client_id);
        while start.elapsed() < self.deadline {
            match self.bus.receive(inbox) {
                Some(message) => match extract(&message.payload) {
                    Some(value) => return Ok(value),
                    None => {
                        tracing::warn!(
                            client = %self.client_id,
                            got = message.payload.kind(),
                            expected,
                            "skipping unexpected response"
                        );
                    }
                },
                None => thread::sleep(POLL_INTERVAL),
            }
        }
        tracing::warn!(client = %self.client_id, expected, "request timed out");
        Err(ClientError::Timeout {
            expected,
            deadline: self.deadline,
        })
    }
}
