//! Name Binding Protocol client for the local name daemon.
//!
//! Registration and removal of a name are request/reply exchanges with the
//! NBP daemon on this node (DDP socket 2). Each request carries one tuple:
//!
//! ```text
//! [u8 DDP type 2] [u8 op<<4 | count] [u8 id]
//! [u16 BE net] [u8 node] [u8 socket] [u8 enumerator]
//! [pascal object] [pascal type] [pascal zone]
//! ```
//!
//! The daemon answers with the same id and op `OK` or `ERROR`.

use std::io;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};

use crate::constants::{NBP_ATTEMPTS, NBP_REPLY_TIMEOUT};
use crate::ddp::{AtAddress, DdpSocket, ADDR_ANY_PORT, DDP_MAX_PAYLOAD, DDP_TYPE_NBP, NBP_SOCKET};
use crate::directory::NameDirectory;
use crate::name::ServiceName;

/// NBP operation codes understood by the local name daemon.
pub mod op {
    /// Register a name.
    pub const REGISTER: u8 = 0x7;
    /// Remove a name.
    pub const UNREGISTER: u8 = 0x8;
    /// Request succeeded.
    pub const OK: u8 = 0x9;
    /// Request failed.
    pub const ERROR: u8 = 0xA;
}

/// NBP header: control byte + id.
const NBP_HEADER_LEN: usize = 2;

/// Request ids; replies are matched on them.
static NEXT_ID: AtomicU8 = AtomicU8::new(0);

fn next_id() -> u8 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
}

/// Build a one-tuple request datagram.
pub fn encode_request(code: u8, id: u8, name: &ServiceName, address: AtAddress) -> Vec<u8> {
    let mut packet = Vec::with_capacity(
        1 + NBP_HEADER_LEN + 5 + 3 + name.object().len() + name.kind().len() + name.zone().len(),
    );
    packet.push(DDP_TYPE_NBP);
    packet.push((code << 4) | 1);
    packet.push(id);
    packet.extend_from_slice(&address.net.to_be_bytes());
    packet.push(address.node);
    packet.push(address.port);
    packet.push(0); // enumerator
    for part in [name.object(), name.kind(), name.zone()] {
        // ServiceName caps parts at 32 bytes.
        packet.push(part.len() as u8);
        packet.extend_from_slice(part);
    }
    packet
}

/// Header of a daemon reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NbpReply {
    /// Operation code.
    pub op: u8,
    /// Id of the request being answered.
    pub id: u8,
}

/// Decode the header of a datagram read from a DDP socket.
///
/// # Errors
///
/// Returns an error if the datagram is not NBP or is truncated.
pub fn decode_reply(datagram: &[u8]) -> Result<NbpReply> {
    let Some((&ddp_type, rest)) = datagram.split_first() else {
        bail!("empty datagram");
    };
    if ddp_type != DDP_TYPE_NBP {
        bail!("not an NBP datagram (DDP type {ddp_type})");
    }
    if rest.len() < NBP_HEADER_LEN {
        bail!("NBP packet too short ({} bytes)", rest.len());
    }
    Ok(NbpReply {
        op: rest[0] >> 4,
        id: rest[1],
    })
}

/// [`NameDirectory`] backed by the node's NBP daemon.
#[derive(Debug, Clone)]
pub struct NbpDirectory {
    timeout: Duration,
    attempts: u32,
}

impl Default for NbpDirectory {
    fn default() -> Self {
        Self {
            timeout: NBP_REPLY_TIMEOUT,
            attempts: NBP_ATTEMPTS,
        }
    }
}

impl NbpDirectory {
    /// Client with the default timeout and retry count.
    pub fn new() -> Self {
        Self::default()
    }

    fn request(&self, code: u8, name: &ServiceName, address: AtAddress) -> Result<()> {
        let socket = DdpSocket::open(ADDR_ANY_PORT).context("nbp: cannot open DDP socket")?;
        socket.set_read_timeout(Some(self.timeout))?;

        let id = next_id();
        let packet = encode_request(code, id, name, address);
        let daemon = address.with_port(NBP_SOCKET);
        let link = SocketLink { socket, daemon };

        exchange(&link, &packet, id, self.attempts)
            .with_context(|| format!("name daemon at {daemon}"))
    }
}

/// Datagram path to the name daemon.
trait DaemonLink {
    fn send(&self, packet: &[u8]) -> io::Result<()>;

    /// Next datagram; a timeout surfaces as an error [`is_timeout`] accepts.
    fn recv(&self, buf: &mut [u8]) -> io::Result<usize>;
}

struct SocketLink {
    socket: DdpSocket,
    daemon: AtAddress,
}

impl DaemonLink for SocketLink {
    fn send(&self, packet: &[u8]) -> io::Result<()> {
        self.socket.send_to(packet, self.daemon).map(drop)
    }

    fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.socket.recv_from(buf).map(|(n, _)| n)
    }
}

/// Send `packet` until the daemon answers request `id`, at most `attempts` times.
fn exchange(link: &impl DaemonLink, packet: &[u8], id: u8, attempts: u32) -> Result<()> {
    let mut buf = [0u8; DDP_MAX_PAYLOAD];

    for attempt in 1..=attempts {
        link.send(packet).context("nbp: cannot reach name daemon")?;

        loop {
            match link.recv(&mut buf) {
                Ok(n) => {
                    if let Some(outcome) = match_reply(id, &buf[..n]) {
                        return outcome;
                    }
                }
                Err(e) if is_timeout(&e) => {
                    log::debug!("NBP request {id} timed out (attempt {attempt})");
                    break;
                }
                Err(e) => return Err(e).context("nbp: receive failed"),
            }
        }
    }

    bail!("no reply after {attempts} attempts")
}

/// Outcome of request `id` if `datagram` answers it; `None` for anything else.
fn match_reply(id: u8, datagram: &[u8]) -> Option<Result<()>> {
    let reply = match decode_reply(datagram) {
        Ok(reply) => reply,
        Err(e) => {
            log::debug!("Ignoring stray datagram: {e}");
            return None;
        }
    };
    if reply.id != id {
        log::debug!("Ignoring NBP reply with stale id {}", reply.id);
        return None;
    }

    Some(match reply.op {
        op::OK => Ok(()),
        op::ERROR => Err(anyhow!("name daemon refused the request")),
        other => Err(anyhow!("name daemon sent unexpected op {other:#x}")),
    })
}

impl NameDirectory for NbpDirectory {
    fn register(&self, name: &ServiceName, address: AtAddress) -> Result<()> {
        self.request(op::REGISTER, name, address)
            .with_context(|| format!("nbp_rgstr {name}"))
    }

    fn unregister(&self, name: &ServiceName, address: AtAddress) -> Result<()> {
        self.request(op::UNREGISTER, name, address)
            .with_context(|| format!("nbp_unrgstr {name}"))
    }
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
    )
}
