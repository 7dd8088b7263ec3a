//! End-to-end transaction tests over the in-memory transport.
//!
//! The server runs as its own task, exactly as in production; the test plays
//! the HyperCard client.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use atalk_memo::transport::memory::{self, MemoryClient};
use atalk_memo::{AtAddress, Sink, TransactionServer};

const SERVER: AtAddress = AtAddress {
    net: 65280,
    node: 12,
    port: 129,
};

/// Records payloads; optionally fails every call.
#[derive(Default)]
struct StubSink {
    payloads: Mutex<Vec<Vec<u8>>>,
    fail: bool,
}

impl StubSink {
    fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    fn payloads(&self) -> Vec<Vec<u8>> {
        self.payloads.lock().unwrap().clone()
    }
}

#[async_trait]
impl Sink for StubSink {
    async fn forward(&self, payload: &[u8]) -> Result<()> {
        self.payloads.lock().unwrap().push(payload.to_vec());
        if self.fail {
            anyhow::bail!("stub sink is down");
        }
        Ok(())
    }
}

/// Start a server task and hand back the client half.
fn start(standard_response: &str, sink: Option<Arc<dyn Sink>>) -> MemoryClient {
    let (transport, client) = memory::pair(SERVER);
    let server = TransactionServer::new(transport, standard_response, sink);
    tokio::spawn(server.run());
    client
}

async fn response(client: &mut MemoryClient) -> (u16, Vec<u8>) {
    tokio::time::timeout(Duration::from_secs(5), client.next_response())
        .await
        .expect("timed out waiting for a response")
        .expect("server went away")
}

#[tokio::test]
async fn test_reply_without_forwarding() {
    let mut client = start("hi", None);

    let tid = client.send_request(b"hello").unwrap();
    assert_eq!(response(&mut client).await, (tid, b"RESPhi\0".to_vec()));
}

#[tokio::test]
async fn test_forwarding_strips_request_marker() {
    let sink = Arc::new(StubSink::default());
    let mut client = start("hi", Some(sink.clone() as Arc<dyn Sink>));

    let tid = client.send_request(b"REQSping").unwrap();
    assert_eq!(response(&mut client).await, (tid, b"RESPhi\0".to_vec()));
    assert_eq!(sink.payloads(), vec![b"ping".to_vec()]);
}

#[tokio::test]
async fn test_sink_failure_still_replies() {
    let sink = Arc::new(StubSink::failing());
    let mut client = start("hi", Some(sink.clone() as Arc<dyn Sink>));

    let first = client.send_request(b"REQSone").unwrap();
    let second = client.send_request(b"REQStwo").unwrap();
    assert_eq!(response(&mut client).await, (first, b"RESPhi\0".to_vec()));
    assert_eq!(response(&mut client).await, (second, b"RESPhi\0".to_vec()));
    assert_eq!(sink.payloads(), vec![b"one".to_vec(), b"two".to_vec()]);
}

#[tokio::test]
async fn test_send_failure_does_not_block_next_transaction() {
    let mut client = start("hi", None);

    client.fail_next_sends(1);
    let _lost = client.send_request(b"first").unwrap();
    let second = client.send_request(b"second").unwrap();

    assert_eq!(response(&mut client).await, (second, b"RESPhi\0".to_vec()));
}

#[tokio::test]
async fn test_response_ignores_request_content() {
    let mut client = start("Gophers in your HyperCard!", None);
    let expected = b"RESPGophers in your HyperCard!\0".to_vec();

    let requests: [&[u8]; 4] = [b"", b"REQS", &[0xff; 600], &[b'x'; 4624]];
    for request in requests {
        let tid = client.send_request(request).unwrap();
        assert_eq!(response(&mut client).await, (tid, expected.clone()));
    }
}

#[tokio::test]
async fn test_unmarked_request_forwarded_verbatim() {
    let sink = Arc::new(StubSink::default());
    let mut client = start("hi", Some(sink.clone() as Arc<dyn Sink>));

    client.send_request(b"hello").unwrap();
    response(&mut client).await;
    assert_eq!(sink.payloads(), vec![b"hello".to_vec()]);
}
