//! Connection sockets and addresses for the io_uring reactor.

use urfetch_core::config::Endpoint;
use urfetch_core::error::{FetchError, Result};

use nix::sys::socket::{socket, AddressFamily, SockFlag, SockType};

use std::os::fd::OwnedFd;

/// A fresh non-blocking, close-on-exec IPv4 TCP socket.
pub fn tcp_socket() -> Result<OwnedFd> {
    socket(
        AddressFamily::Inet,
        SockType::Stream,
        SockFlag::SOCK_NONBLOCK | SockFlag::SOCK_CLOEXEC,
        None,
    )
    .map_err(|e| FetchError::Socket(e as i32))
}

/// `sockaddr_in` for `endpoint`, port and address in network byte order.
pub fn sockaddr_in(endpoint: &Endpoint) -> libc::sockaddr_in {
    let mut addr: libc::sockaddr_in = unsafe { std::mem::zeroed() };
    addr.sin_family = libc::AF_INET as libc::sa_family_t;
    addr.sin_port = endpoint.port().to_be();
    addr.sin_addr = libc::in_addr {
        s_addr: u32::from_ne_bytes(endpoint.ip().octets()),
    };
    addr
}
