//! In-process transport backed by tokio channels.
//!
//! [`pair`] returns the server half ([`MemoryTransport`]) and a client half
//! ([`MemoryClient`]) that issues requests and collects responses. Used by the
//! test suite and by anyone wanting to drive the server without an AppleTalk
//! stack.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use super::{Delivery, Received, Requester, Transport};
use crate::ddp::AtAddress;

/// Address the client half sends from.
const CLIENT_ADDRESS: AtAddress = AtAddress {
    net: 1,
    node: 2,
    port: 200,
};

/// Server half of an in-memory transport.
#[derive(Debug)]
pub struct MemoryTransport {
    address: AtAddress,
    requests: UnboundedReceiver<(Requester, Vec<u8>)>,
    responses: UnboundedSender<(Requester, Vec<u8>)>,
    send_failures: Arc<AtomicUsize>,
}

/// Client half of an in-memory transport.
#[derive(Debug)]
pub struct MemoryClient {
    next_tid: u16,
    requests: UnboundedSender<(Requester, Vec<u8>)>,
    responses: UnboundedReceiver<(Requester, Vec<u8>)>,
    send_failures: Arc<AtomicUsize>,
}

/// Create a connected server/client pair. The server reports `address`.
pub fn pair(address: AtAddress) -> (MemoryTransport, MemoryClient) {
    let (request_tx, request_rx) = mpsc::unbounded_channel();
    let (response_tx, response_rx) = mpsc::unbounded_channel();
    let send_failures = Arc::new(AtomicUsize::new(0));

    let transport = MemoryTransport {
        address,
        requests: request_rx,
        responses: response_tx,
        send_failures: Arc::clone(&send_failures),
    };
    let client = MemoryClient {
        next_tid: 1,
        requests: request_tx,
        responses: response_rx,
        send_failures,
    };
    (transport, client)
}

#[async_trait]
impl Transport for MemoryTransport {
    fn address(&self) -> AtAddress {
        self.address
    }

    async fn receive_request(&mut self, buf: &mut [u8]) -> Result<Received> {
        let Some((requester, payload)) = self.requests.recv().await else {
            // No clients left: behave like an idle network.
            return std::future::pending().await;
        };
        let len = payload.len().min(buf.len());
        buf[..len].copy_from_slice(&payload[..len]);
        Ok(Received { len, requester })
    }

    async fn send_response(&mut self, requester: &Requester, payload: &[u8]) -> Result<Delivery> {
        if !requester.wants_response() {
            return Ok(Delivery::NoBuffer);
        }
        let failing = self
            .send_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            bail!("simulated send failure for tid {}", requester.tid);
        }
        if self.responses.send((*requester, payload.to_vec())).is_err() {
            bail!("client for tid {} has gone away", requester.tid);
        }
        Ok(Delivery::Sent)
    }
}

impl MemoryClient {
    /// Queue a request; returns its transaction id.
    ///
    /// # Errors
    ///
    /// Returns an error if the server half was dropped.
    pub fn send_request(&mut self, payload: &[u8]) -> Result<u16> {
        self.send_request_with_bitmap(payload, 0x01)
    }

    /// Queue a request announcing response buffers `bitmap`.
    pub fn send_request_with_bitmap(&mut self, payload: &[u8], bitmap: u8) -> Result<u16> {
        let tid = self.next_tid;
        self.next_tid = self.next_tid.wrapping_add(1);
        let requester = Requester {
            address: CLIENT_ADDRESS,
            tid,
            bitmap,
            exactly_once: false,
            release_timeout: Duration::from_secs(30),
        };
        if self.requests.send((requester, payload.to_vec())).is_err() {
            bail!("server transport has been dropped");
        }
        Ok(tid)
    }

    /// Wait for the next response: `(tid, payload)`.
    pub async fn next_response(&mut self) -> Option<(u16, Vec<u8>)> {
        self.responses
            .recv()
            .await
            .map(|(requester, payload)| (requester.tid, payload))
    }

    /// Make the next `count` server sends fail.
    pub fn fail_next_sends(&self, count: usize) {
        self.send_failures.store(count, Ordering::SeqCst);
    }
}
