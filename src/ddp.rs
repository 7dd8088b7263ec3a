//! DDP addressing and the raw `AF_APPLETALK` datagram socket.
//!
//! On Linux an AppleTalk `SOCK_DGRAM` socket carries one DDP datagram per
//! send/receive, and the first byte of the payload is the DDP type. ATP and
//! NBP both sit directly on top of this socket.

use std::fmt;
use std::io;
use std::mem;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};
use std::time::Duration;

/// DDP type for NBP packets.
pub const DDP_TYPE_NBP: u8 = 2;

/// DDP type for ATP packets.
pub const DDP_TYPE_ATP: u8 = 3;

/// Largest DDP payload, type byte included.
pub const DDP_MAX_PAYLOAD: usize = 587;

/// "Let the kernel pick" port number.
pub const ADDR_ANY_PORT: u8 = 0;

/// Well-known socket the NBP name daemon listens on.
pub const NBP_SOCKET: u8 = 2;

/// A DDP socket address: network, node and socket (port) number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct AtAddress {
    /// 16-bit network number.
    pub net: u16,
    /// Node id within the network.
    pub node: u8,
    /// DDP socket number.
    pub port: u8,
}

impl AtAddress {
    /// Same node, different socket.
    pub fn with_port(self, port: u8) -> Self {
        Self { port, ..self }
    }
}

impl fmt::Display for AtAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}:{}", self.net, self.node, self.port)
    }
}

/// `struct atalk_addr` from `<linux/atalk.h>`.
#[repr(C)]
#[derive(Clone, Copy)]
struct RawAtalkAddr {
    s_net: u16,
    s_node: u8,
}

/// `struct sockaddr_at` from `<linux/atalk.h>`.
#[repr(C)]
#[derive(Clone, Copy)]
struct RawSockaddrAt {
    sat_family: libc::sa_family_t,
    sat_port: u8,
    sat_addr: RawAtalkAddr,
    sat_zero: [u8; 8],
}

impl RawSockaddrAt {
    fn from_address(address: AtAddress) -> Self {
        Self {
            sat_family: libc::AF_APPLETALK as libc::sa_family_t,
            sat_port: address.port,
            sat_addr: RawAtalkAddr {
                s_net: address.net.to_be(),
                s_node: address.node,
            },
            sat_zero: [0; 8],
        }
    }

    fn to_address(self) -> AtAddress {
        AtAddress {
            net: u16::from_be(self.sat_addr.s_net),
            node: self.sat_addr.s_node,
            port: self.sat_port,
        }
    }

    fn zeroed() -> Self {
        Self::from_address(AtAddress::default())
    }
}

const SOCKADDR_AT_LEN: libc::socklen_t = mem::size_of::<RawSockaddrAt>() as libc::socklen_t;

/// An open DDP datagram socket. Closed on drop.
#[derive(Debug)]
pub struct DdpSocket {
    fd: OwnedFd,
}

impl DdpSocket {
    /// Open a socket bound to `port` on this node's primary address.
    ///
    /// Pass [`ADDR_ANY_PORT`] to have the kernel assign a dynamic socket.
    ///
    /// # Errors
    ///
    /// Returns an error if AppleTalk is unavailable or the bind fails.
    pub fn open(port: u8) -> io::Result<Self> {
        // SAFETY: plain syscall with constant arguments; the result is checked.
        let raw = unsafe { libc::socket(libc::AF_APPLETALK, libc::SOCK_DGRAM, 0) };
        if raw < 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: `raw` is a freshly created descriptor that nothing else owns.
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };

        let local = RawSockaddrAt::from_address(AtAddress {
            port,
            ..AtAddress::default()
        });
        // SAFETY: `local` is a valid sockaddr_at and the length matches its size.
        let rc = unsafe {
            libc::bind(
                fd.as_raw_fd(),
                (&local as *const RawSockaddrAt).cast::<libc::sockaddr>(),
                SOCKADDR_AT_LEN,
            )
        };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(Self { fd })
    }

    /// The address the kernel bound this socket to.
    pub fn local_addr(&self) -> io::Result<AtAddress> {
        let mut raw = RawSockaddrAt::zeroed();
        let mut len = SOCKADDR_AT_LEN;
        // SAFETY: `raw` is writable storage of `len` bytes.
        let rc = unsafe {
            libc::getsockname(
                self.fd.as_raw_fd(),
                (&mut raw as *mut RawSockaddrAt).cast::<libc::sockaddr>(),
                &mut len,
            )
        };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(raw.to_address())
    }

    /// Send one datagram. `buf[0]` must be the DDP type.
    pub fn send_to(&self, buf: &[u8], to: AtAddress) -> io::Result<usize> {
        let dest = RawSockaddrAt::from_address(to);
        // SAFETY: `buf` and `dest` outlive the call and the lengths describe them.
        let sent = unsafe {
            libc::sendto(
                self.fd.as_raw_fd(),
                buf.as_ptr().cast::<libc::c_void>(),
                buf.len(),
                0,
                (&dest as *const RawSockaddrAt).cast::<libc::sockaddr>(),
                SOCKADDR_AT_LEN,
            )
        };
        if sent < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(sent as usize)
    }

    /// Receive one datagram into `buf`, returning its length and sender.
    pub fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, AtAddress)> {
        let mut from = RawSockaddrAt::zeroed();
        let mut len = SOCKADDR_AT_LEN;
        // SAFETY: `buf` is writable for `buf.len()` bytes and `from` for `len`.
        let received = unsafe {
            libc::recvfrom(
                self.fd.as_raw_fd(),
                buf.as_mut_ptr().cast::<libc::c_void>(),
                buf.len(),
                0,
                (&mut from as *mut RawSockaddrAt).cast::<libc::sockaddr>(),
                &mut len,
            )
        };
        if received < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok((received as usize, from.to_address()))
    }

    /// Switch between blocking and non-blocking mode.
    pub fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        // SAFETY: fcntl on a descriptor we own.
        let flags = unsafe { libc::fcntl(self.fd.as_raw_fd(), libc::F_GETFL) };
        if flags < 0 {
            return Err(io::Error::last_os_error());
        }
        let flags = if nonblocking {
            flags | libc::O_NONBLOCK
        } else {
            flags & !libc::O_NONBLOCK
        };
        // SAFETY: as above.
        if unsafe { libc::fcntl(self.fd.as_raw_fd(), libc::F_SETFL, flags) } < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// Bound blocking receives; `None` waits forever.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        let tv = match timeout {
            Some(d) => libc::timeval {
                tv_sec: d.as_secs() as libc::time_t,
                tv_usec: libc::suseconds_t::from(d.subsec_micros() as i32),
            },
            None => libc::timeval {
                tv_sec: 0,
                tv_usec: 0,
            },
        };
        // SAFETY: `tv` is a valid timeval and the length matches it.
        let rc = unsafe {
            libc::setsockopt(
                self.fd.as_raw_fd(),
                libc::SOL_SOCKET,
                libc::SO_RCVTIMEO,
                (&tv as *const libc::timeval).cast::<libc::c_void>(),
                mem::size_of::<libc::timeval>() as libc::socklen_t,
            )
        };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

impl AsRawFd for DdpSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl AsFd for DdpSocket {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}
