//! ATP responder endpoint over an `AF_APPLETALK` socket.
//!
//! Opens a DDP socket on a dynamic port, drives it through tokio's
//! [`AsyncFd`], and implements the responder side of ATP: hand out TReqs,
//! answer with single-packet TResps, and keep exactly-once responses around
//! until the requester releases them.

use std::collections::HashMap;
use std::io;
use std::time::Instant;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::unix::AsyncFd;

use super::packet::{self, Function};
use crate::ddp::{AtAddress, DdpSocket, ADDR_ANY_PORT, DDP_MAX_PAYLOAD};
use crate::transport::{Delivery, Received, Requester, Transport};

/// The process's single ATP endpoint.
#[derive(Debug)]
pub struct AtpEndpoint {
    socket: AsyncFd<DdpSocket>,
    address: AtAddress,
    responder: Responder,
}

impl AtpEndpoint {
    /// Open an endpoint on any free port of the local node.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if AppleTalk is not available or the socket cannot be
    /// registered with the reactor.
    pub fn open() -> Result<Self> {
        let socket = DdpSocket::open(ADDR_ANY_PORT).context("atp_open: cannot open DDP socket")?;
        let address = socket
            .local_addr()
            .context("atp_open: cannot read bound address")?;
        socket.set_nonblocking(true)?;
        let socket = AsyncFd::new(socket).context("atp_open: cannot watch DDP socket")?;

        log::info!("ATP endpoint open at {address}");
        Ok(Self {
            socket,
            address,
            responder: Responder::default(),
        })
    }

    async fn recv_datagram(&self, buf: &mut [u8]) -> io::Result<(usize, AtAddress)> {
        loop {
            let mut guard = self.socket.readable().await?;
            match guard.try_io(|inner| inner.get_ref().recv_from(buf)) {
                Ok(result) => return result,
                Err(_would_block) => continue,
            }
        }
    }

    async fn send_datagram(&self, datagram: &[u8], to: AtAddress) -> io::Result<()> {
        loop {
            let mut guard = self.socket.writable().await?;
            match guard.try_io(|inner| inner.get_ref().send_to(datagram, to)) {
                Ok(result) => return result.map(drop),
                Err(_would_block) => continue,
            }
        }
    }
}

#[async_trait]
impl Transport for AtpEndpoint {
    fn address(&self) -> AtAddress {
        self.address
    }

    async fn receive_request(&mut self, buf: &mut [u8]) -> Result<Received> {
        let mut datagram = [0u8; DDP_MAX_PAYLOAD];
        loop {
            let (n, from) = self
                .recv_datagram(&mut datagram)
                .await
                .context("atp_rreq")?;

            match self
                .responder
                .on_datagram(from, &datagram[..n], buf, Instant::now())
                .context("atp_rreq")?
            {
                Step::Deliver(received) => return Ok(received),
                Step::Retransmit(cached) => {
                    self.send_datagram(&cached, from)
                        .await
                        .context("atp_rreq: retransmit")?;
                }
                Step::Ignore => {}
            }
        }
    }

    async fn send_response(&mut self, requester: &Requester, payload: &[u8]) -> Result<Delivery> {
        let Some(datagram) = self
            .responder
            .on_response(requester, payload, Instant::now())
            .context("atp_sresp")?
        else {
            return Ok(Delivery::NoBuffer);
        };

        self.send_datagram(&datagram, requester.address)
            .await
            .context("atp_sresp")?;
        Ok(Delivery::Sent)
    }
}

/// What the endpoint does with one inbound datagram.
#[derive(Debug, PartialEq, Eq)]
enum Step {
    /// A new transaction; its payload is in the caller's buffer.
    Deliver(Received),
    /// A duplicate exactly-once request; resend this cached TResp.
    Retransmit(Vec<u8>),
    Ignore,
}

/// Responder-side ATP state, free of any socket.
#[derive(Debug, Default)]
struct Responder {
    completed: ResponseCache,
}

impl Responder {
    fn on_datagram(
        &mut self,
        from: AtAddress,
        datagram: &[u8],
        buf: &mut [u8],
        now: Instant,
    ) -> Result<Step> {
        let (header, payload) =
            packet::decode(datagram).with_context(|| format!("bad packet from {from}"))?;

        match header.function {
            Function::Request => {
                self.completed.purge(now);
                if let Some(cached) = self.completed.get(from, header.tid) {
                    log::debug!("Retransmitting response for {from} tid {}", header.tid);
                    return Ok(Step::Retransmit(cached));
                }

                let len = payload.len().min(buf.len());
                if len < payload.len() {
                    log::warn!(
                        "Request from {from} truncated from {} to {len} bytes",
                        payload.len()
                    );
                }
                buf[..len].copy_from_slice(&payload[..len]);

                Ok(Step::Deliver(Received {
                    len,
                    requester: Requester {
                        address: from,
                        tid: header.tid,
                        bitmap: header.bitmap_or_sequence,
                        exactly_once: header.exactly_once,
                        release_timeout: header.release_timeout(),
                    },
                }))
            }
            Function::Release => {
                if self.completed.release(from, header.tid) {
                    log::debug!("Released {from} tid {}", header.tid);
                }
                Ok(Step::Ignore)
            }
            Function::Response => {
                log::debug!("Ignoring TResp from {from}, this endpoint only responds");
                Ok(Step::Ignore)
            }
        }
    }

    /// The TResp to send, or `None` when the requester has no buffer for it.
    fn on_response(
        &mut self,
        requester: &Requester,
        payload: &[u8],
        now: Instant,
    ) -> Result<Option<Vec<u8>>> {
        if !requester.wants_response() {
            return Ok(None);
        }

        let datagram = packet::encode_response(requester.tid, 0, payload)?;
        if requester.exactly_once {
            self.completed.insert(
                requester.address,
                requester.tid,
                datagram.clone(),
                now + requester.release_timeout,
            );
        }
        Ok(Some(datagram))
    }
}

/// Exactly-once responses waiting for their TRel.
#[derive(Debug, Default)]
struct ResponseCache {
    entries: HashMap<(AtAddress, u16), (Vec<u8>, Instant)>,
}

impl ResponseCache {
    fn insert(&mut self, from: AtAddress, tid: u16, datagram: Vec<u8>, expires: Instant) {
        self.entries.insert((from, tid), (datagram, expires));
    }

    fn get(&self, from: AtAddress, tid: u16) -> Option<Vec<u8>> {
        self.entries
            .get(&(from, tid))
            .map(|(datagram, _)| datagram.clone())
    }

    /// Drop an entry; true if there was one.
    fn release(&mut self, from: AtAddress, tid: u16) -> bool {
        self.entries.remove(&(from, tid)).is_some()
    }

    fn purge(&mut self, now: Instant) {
        self.entries.retain(|_, (_, expires)| *expires > now);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ddp::DDP_TYPE_ATP;
    use std::time::Duration;

    const CLIENT: AtAddress = AtAddress {
        net: 10,
        node: 20,
        port: 130,
    };

    #[test]
    fn test_cache_returns_response_for_duplicate() {
        let mut cache = ResponseCache::default();
        let later = Instant::now() + Duration::from_secs(30);
        cache.insert(CLIENT, 5, b"datagram".to_vec(), later);

        assert_eq!(cache.get(CLIENT, 5), Some(b"datagram".to_vec()));
        assert_eq!(cache.get(CLIENT, 6), None);
        assert_eq!(cache.get(CLIENT.with_port(131), 5), None);
    }

    #[test]
    fn test_cache_release_removes_entry() {
        let mut cache = ResponseCache::default();
        cache.insert(CLIENT, 5, vec![1], Instant::now() + Duration::from_secs(30));

        assert!(cache.release(CLIENT, 5));
        assert!(!cache.release(CLIENT, 5));
        assert_eq!(cache.get(CLIENT, 5), None);
    }

    #[test]
    fn test_cache_purges_expired_entries() {
        let mut cache = ResponseCache::default();
        let now = Instant::now();
        cache.insert(CLIENT, 1, vec![1], now);
        cache.insert(CLIENT, 2, vec![2], now + Duration::from_secs(60));

        cache.purge(now + Duration::from_secs(1));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(CLIENT, 2), Some(vec![2]));
    }

    fn requester(bitmap: u8, exactly_once: bool) -> Requester {
        Requester {
            address: CLIENT,
            tid: 5,
            bitmap,
            exactly_once,
            release_timeout: Duration::from_secs(30),
        }
    }

    fn deliver(responder: &mut Responder, datagram: &[u8], now: Instant) -> (Received, Vec<u8>) {
        let mut buf = [0u8; 64];
        match responder.on_datagram(CLIENT, datagram, &mut buf, now).unwrap() {
            Step::Deliver(received) => (received, buf[..received.len].to_vec()),
            other => panic!("expected a new transaction, got {other:?}"),
        }
    }

    #[test]
    fn test_request_is_delivered_with_its_context() {
        let mut responder = Responder::default();
        let treq = packet::encode_request(5, 0x01, true, b"\0\0\0\0REQShi");

        let (received, payload) = deliver(&mut responder, &treq, Instant::now());
        assert_eq!(received.len, 10);
        assert_eq!(payload, b"\0\0\0\0REQShi");
        assert_eq!(received.requester, requester(0x01, true));
    }

    #[test]
    fn test_duplicate_exactly_once_request_is_retransmitted() {
        let mut responder = Responder::default();
        let now = Instant::now();
        let treq = packet::encode_request(5, 0x01, true, b"\0\0\0\0ping");

        let (received, _) = deliver(&mut responder, &treq, now);
        let tresp = responder
            .on_response(&received.requester, b"\0\0\0\0RESPhi\0", now)
            .unwrap()
            .unwrap();

        let mut buf = [0u8; 64];
        let step = responder.on_datagram(CLIENT, &treq, &mut buf, now).unwrap();
        assert_eq!(step, Step::Retransmit(tresp));
    }

    #[test]
    fn test_duplicate_at_least_once_request_is_delivered_again() {
        let mut responder = Responder::default();
        let now = Instant::now();
        let treq = packet::encode_request(5, 0x01, false, b"\0\0\0\0ping");

        let (received, _) = deliver(&mut responder, &treq, now);
        responder
            .on_response(&received.requester, b"\0\0\0\0RESPhi\0", now)
            .unwrap();
        assert_eq!(responder.completed.len(), 0);

        deliver(&mut responder, &treq, now);
    }

    #[test]
    fn test_release_frees_cached_response() {
        let mut responder = Responder::default();
        let now = Instant::now();
        let treq = packet::encode_request(5, 0x01, true, b"\0\0\0\0ping");

        let (received, _) = deliver(&mut responder, &treq, now);
        responder
            .on_response(&received.requester, b"\0\0\0\0RESPhi\0", now)
            .unwrap();
        assert_eq!(responder.completed.len(), 1);

        let trel = [DDP_TYPE_ATP, 0xC0, 0, 0, 5, 0, 0, 0, 0];
        let mut buf = [0u8; 64];
        let step = responder.on_datagram(CLIENT, &trel, &mut buf, now).unwrap();
        assert_eq!(step, Step::Ignore);
        assert_eq!(responder.completed.len(), 0);

        // Same tid after release is a new transaction
        deliver(&mut responder, &treq, now);
    }

    #[test]
    fn test_expired_response_is_not_retransmitted() {
        let mut responder = Responder::default();
        let now = Instant::now();
        let treq = packet::encode_request(5, 0x01, true, b"\0\0\0\0ping");

        let (received, _) = deliver(&mut responder, &treq, now);
        responder
            .on_response(&received.requester, b"\0\0\0\0RESPhi\0", now)
            .unwrap();

        deliver(&mut responder, &treq, now + Duration::from_secs(31));
    }

    #[test]
    fn test_inbound_response_is_ignored() {
        let mut responder = Responder::default();
        let tresp = packet::encode_response(5, 0, b"\0\0\0\0data").unwrap();

        let mut buf = [0u8; 64];
        let step = responder
            .on_datagram(CLIENT, &tresp, &mut buf, Instant::now())
            .unwrap();
        assert_eq!(step, Step::Ignore);
        assert_eq!(buf, [0u8; 64]);
    }

    #[test]
    fn test_no_response_without_buffer() {
        let mut responder = Responder::default();

        let datagram = responder
            .on_response(&requester(0x00, true), b"\0\0\0\0RESPhi\0", Instant::now())
            .unwrap();
        assert_eq!(datagram, None);
        assert_eq!(responder.completed.len(), 0);
    }

    #[test]
    fn test_response_is_single_final_packet() {
        let mut responder = Responder::default();

        let datagram = responder
            .on_response(&requester(0xff, false), b"\0\0\0\0RESPhi\0", Instant::now())
            .unwrap()
            .unwrap();
        let (header, payload) = packet::decode(&datagram).unwrap();
        assert_eq!(header.function, Function::Response);
        assert_eq!(header.bitmap_or_sequence, 0);
        assert_eq!(header.tid, 5);
        assert_eq!(payload, b"\0\0\0\0RESPhi\0");
    }

    #[test]
    fn test_oversized_request_is_truncated() {
        let mut responder = Responder::default();
        let treq = packet::encode_request(9, 0x01, false, b"\0\0\0\0abcdef");

        let mut buf = [0u8; 6];
        let step = responder
            .on_datagram(CLIENT, &treq, &mut buf, Instant::now())
            .unwrap();
        let Step::Deliver(received) = step else {
            panic!("expected a new transaction, got {step:?}");
        };
        assert_eq!(received.len, 6);
        assert_eq!(&buf, b"\0\0\0\0ab");
    }

    #[test]
    fn test_malformed_packet_is_an_error() {
        let mut responder = Responder::default();
        let mut buf = [0u8; 64];

        let short = [DDP_TYPE_ATP, 0x40, 0x01];
        assert!(responder
            .on_datagram(CLIENT, &short, &mut buf, Instant::now())
            .is_err());

        let nbp = [2u8, 0x71, 1, 0, 0, 0, 0, 0, 0];
        let err = responder
            .on_datagram(CLIENT, &nbp, &mut buf, Instant::now())
            .unwrap_err();
        assert!(format!("{err:#}").contains("bad packet from"));

        // Next datagram is unaffected
        let treq = packet::encode_request(1, 0x01, false, b"\0\0\0\0ok");
        deliver(&mut responder, &treq, Instant::now());
    }
}
