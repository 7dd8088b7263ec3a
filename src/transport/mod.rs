//! Transaction transport abstraction.
//!
//! The server loop talks to a [`Transport`]: receive one request, send one
//! response for it. The real implementation is
//! [`AtpEndpoint`](crate::atp::AtpEndpoint); [`memory`] provides an
//! in-process pair for tests and local runs without AppleTalk.
//!
//! # Architecture
//!
//! ```text
//! TransactionServer
//!     │
//!     └── Transport (trait)
//!         ├── AtpEndpoint      (AF_APPLETALK socket, ATP)
//!         └── MemoryTransport  (tokio channels)
//! ```

pub mod memory;

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use crate::ddp::AtAddress;

/// Who asked, and how to answer them.
///
/// Captured when a request is received and handed back unchanged when the
/// response is sent, so both phases address the same transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Requester {
    /// Requesting socket.
    pub address: AtAddress,
    /// ATP transaction id.
    pub tid: u16,
    /// Response packets the requester has buffers for.
    pub bitmap: u8,
    /// Exactly-once transaction.
    pub exactly_once: bool,
    /// How long an exactly-once response is retained.
    pub release_timeout: Duration,
}

impl Requester {
    /// Bit 0 of the bitmap: the requester has a buffer for response packet 0.
    pub fn wants_response(&self) -> bool {
        self.bitmap & 0x01 != 0
    }
}

/// Outcome of one receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Received {
    /// Bytes written into the caller's buffer.
    pub len: usize,
    /// Context for the reply.
    pub requester: Requester,
}

/// What became of a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Sent to the requester.
    Sent,
    /// Not sent: the requester left no buffer for response packet 0.
    NoBuffer,
}

/// A request/response transport bound to one local address.
#[async_trait]
pub trait Transport: Send {
    /// Address this endpoint is reachable at (what gets registered).
    fn address(&self) -> AtAddress;

    /// Wait for the next request and copy its payload into `buf`.
    ///
    /// Payloads longer than `buf` are truncated; [`Received::len`] is the
    /// number of bytes actually copied.
    async fn receive_request(&mut self, buf: &mut [u8]) -> Result<Received>;

    /// Send `payload` as the response to `requester`'s transaction.
    ///
    /// A requester whose bitmap does not ask for packet 0 gets nothing and
    /// the call reports [`Delivery::NoBuffer`].
    async fn send_response(&mut self, requester: &Requester, payload: &[u8]) -> Result<Delivery>;
}
