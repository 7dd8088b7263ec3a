//! Transaction server loop.
//!
//! Each iteration is one transaction:
//!
//! ```text
//! Idle → Receiving → Extracting → Forwarding (if a sink is set) → Responding → Idle
//! ```
//!
//! A transaction owns its buffers ([`Request`], [`Response`]) and drops them
//! before the next one starts. Errors end the transaction, never the loop.

use std::fmt;
use std::sync::Arc;

use anyhow::Result;

use crate::constants::{REQUEST_BUFFER_SIZE, REQUEST_MARKER, RESPONSE_MARKER, RESPONSE_TERMINATOR};
use crate::sink::Sink;
use crate::transport::{Delivery, Requester, Transport};

/// An inbound request: who sent it and exactly the bytes received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    requester: Requester,
    payload: Vec<u8>,
}

impl Request {
    /// Wrap a received payload.
    pub fn new(requester: Requester, payload: Vec<u8>) -> Self {
        Self { requester, payload }
    }

    /// Transaction context for the reply.
    pub fn requester(&self) -> &Requester {
        &self.requester
    }

    /// Received bytes.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// What the sink gets: the payload minus a leading `REQS`.
    ///
    /// A payload without the marker is passed through untouched.
    pub fn sink_payload(&self) -> &[u8] {
        self.payload
            .strip_prefix(REQUEST_MARKER.as_slice())
            .unwrap_or(&self.payload)
    }
}

/// An outbound reply: `RESP` + text + terminator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    payload: Vec<u8>,
}

impl Response {
    /// The reply every request gets.
    pub fn standard(text: &str) -> Self {
        let mut payload = Vec::with_capacity(RESPONSE_MARKER.len() + text.len() + 1);
        payload.extend_from_slice(RESPONSE_MARKER);
        payload.extend_from_slice(text.as_bytes());
        payload.push(RESPONSE_TERMINATOR);
        Self { payload }
    }

    /// Bytes to send.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}

/// Serves transactions one at a time on a [`Transport`].
pub struct TransactionServer<T: Transport> {
    transport: T,
    standard_response: String,
    sink: Option<Arc<dyn Sink>>,
}

impl<T: Transport> fmt::Debug for TransactionServer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionServer")
            .field("address", &self.transport.address())
            .field("standard_response", &self.standard_response)
            .field("forwarding", &self.sink.is_some())
            .finish()
    }
}

impl<T: Transport> TransactionServer<T> {
    /// Create a server. `sink: None` disables forwarding.
    pub fn new(transport: T, standard_response: impl Into<String>, sink: Option<Arc<dyn Sink>>) -> Self {
        Self {
            transport,
            standard_response: standard_response.into(),
            sink,
        }
    }

    /// Process exactly one transaction.
    ///
    /// # Errors
    ///
    /// Returns receive and send failures. Sink failures are logged here and
    /// do not fail the transaction.
    pub async fn handle_one(&mut self) -> Result<()> {
        log::info!("Awaiting next request");
        let request = self.receive().await?;
        log::info!("Got request: {}", String::from_utf8_lossy(request.payload()));

        if let Some(sink) = &self.sink {
            if let Err(e) = sink.forward(request.sink_payload()).await {
                log::error!("Error forwarding request: {e:#}");
            }
        }

        let response = Response::standard(&self.standard_response);
        let requester = request.requester();
        match self
            .transport
            .send_response(requester, response.payload())
            .await?
        {
            Delivery::Sent => log::info!("Responded with: {}", self.standard_response),
            Delivery::NoBuffer => log::debug!(
                "No response buffer at {} for tid {}, nothing sent",
                requester.address,
                requester.tid
            ),
        }
        Ok(())
    }

    /// Serve forever.
    pub async fn run(mut self) {
        loop {
            if let Err(e) = self.handle_one().await {
                log::error!("Error handling request: {e:#}");
            }
        }
    }

    async fn receive(&mut self) -> Result<Request> {
        let mut buf = vec![0u8; REQUEST_BUFFER_SIZE];
        let received = self.transport.receive_request(&mut buf).await?;
        Ok(Request::new(received.requester, buf[..received.len].to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ddp::AtAddress;
    use crate::transport::memory;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    const SERVER: AtAddress = AtAddress {
        net: 1,
        node: 1,
        port: 128,
    };

    fn requester() -> Requester {
        Requester {
            address: AtAddress {
                net: 1,
                node: 9,
                port: 200,
            },
            tid: 1,
            bitmap: 1,
            exactly_once: false,
            release_timeout: Duration::from_secs(30),
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        payloads: Mutex<Vec<Vec<u8>>>,
    }

    #[async_trait]
    impl Sink for RecordingSink {
        async fn forward(&self, payload: &[u8]) -> Result<()> {
            self.payloads.lock().unwrap().push(payload.to_vec());
            Ok(())
        }
    }

    #[test]
    fn test_sink_payload_strips_marker() {
        let request = Request::new(requester(), b"REQSping".to_vec());
        assert_eq!(request.sink_payload(), b"ping");
    }

    #[test]
    fn test_sink_payload_without_marker_is_unchanged() {
        let request = Request::new(requester(), b"hello".to_vec());
        assert_eq!(request.sink_payload(), b"hello");

        let short = Request::new(requester(), b"REQ".to_vec());
        assert_eq!(short.sink_payload(), b"REQ");
    }

    #[test]
    fn test_sink_payload_strips_marker_once() {
        let request = Request::new(requester(), b"REQSREQSx".to_vec());
        assert_eq!(request.sink_payload(), b"REQSx");
    }

    #[test]
    fn test_standard_response_bytes() {
        assert_eq!(Response::standard("hi").payload(), b"RESPhi\0");
        assert_eq!(Response::standard("").payload(), b"RESP\0");
    }

    #[tokio::test]
    async fn test_handle_one_forwards_and_replies() {
        let (transport, mut client) = memory::pair(SERVER);
        let sink = Arc::new(RecordingSink::default());
        let mut server = TransactionServer::new(transport, "hi", Some(sink.clone() as Arc<dyn Sink>));

        let tid = client.send_request(b"REQSping").unwrap();
        server.handle_one().await.unwrap();

        assert_eq!(client.next_response().await, Some((tid, b"RESPhi\0".to_vec())));
        assert_eq!(*sink.payloads.lock().unwrap(), vec![b"ping".to_vec()]);
    }

    #[tokio::test]
    async fn test_handle_one_reports_send_failure() {
        let (transport, mut client) = memory::pair(SERVER);
        let mut server = TransactionServer::new(transport, "hi", None);

        client.fail_next_sends(1);
        client.send_request(b"hello").unwrap();
        assert!(server.handle_one().await.is_err());
    }

    #[tokio::test]
    async fn test_requester_without_buffer_gets_nothing() {
        let (transport, mut client) = memory::pair(SERVER);
        let sink = Arc::new(RecordingSink::default());
        let mut server = TransactionServer::new(transport, "hi", Some(sink.clone() as Arc<dyn Sink>));

        client.send_request_with_bitmap(b"REQSquiet", 0x00).unwrap();
        server.handle_one().await.unwrap();
        drop(server);

        assert_eq!(client.next_response().await, None);
        assert_eq!(*sink.payloads.lock().unwrap(), vec![b"quiet".to_vec()]);
    }

    #[tokio::test]
    async fn test_extracted_length_is_reported_length() {
        let (transport, mut client) = memory::pair(SERVER);
        let mut server = TransactionServer::new(transport, "hi", None);

        client.send_request(&[7u8; 10]).unwrap();
        let request = server.receive().await.unwrap();
        assert_eq!(request.payload().len(), 10);

        client.send_request(&vec![1u8; REQUEST_BUFFER_SIZE + 100]).unwrap();
        let request = server.receive().await.unwrap();
        assert_eq!(request.payload().len(), REQUEST_BUFFER_SIZE);
    }
}
