//! `IoUringReactor` — the io_uring `CompletionReactor`.
//!
//! One ring, sized to the session count. No SQPOLL (the single control thread
//! is the only submitter and the only reaper), no fixed files, no fixed
//! buffers. Each SQE carries its session id in `user_data`; cancel requests
//! carry [`SessionId::NONE`] so their completions can be told apart.
//!
//! Submissions only push SQEs. [`wait_one`](CompletionReactor::wait_one) is
//! the single `io_uring_enter()` point: it kicks everything queued and blocks
//! until a CQE is ready.

use urfetch_core::config::Endpoint;
use urfetch_core::entry::{Completion, SessionId};
use urfetch_core::error::{FetchError, Result};
use urfetch_core::reactor::CompletionReactor;
use urfetch_core::{kdebug, kwarn};

use io_uring::{opcode, squeue, types, IoUring};

use std::io;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};

use crate::socket;

fn errno(e: &io::Error) -> i32 {
    e.raw_os_error().unwrap_or(-1)
}

pub struct IoUringReactor {
    ring: IoUring,
    /// Connect address per session. The kernel reads it asynchronously, so it
    /// lives here until the reactor is dropped.
    connect_addrs: Box<[libc::sockaddr_in]>,
    /// Whether each session has an operation in flight.
    busy: Box<[bool]>,
    inflight: usize,
    pending_submit: u32,
}

impl IoUringReactor {
    /// Ring with room for `sessions` operations.
    pub fn new(sessions: usize) -> Result<Self> {
        let entries = u32::try_from(sessions)
            .map_err(|_| FetchError::Config(format!("{} sessions exceed ring limits", sessions)))?;
        let ring = IoUring::builder()
            .build(entries)
            .map_err(|e| FetchError::IoUringSetup(errno(&e)))?;

        kdebug!(
            "io_uring: fd={} sq={} cq={} for {} sessions",
            ring.as_raw_fd(),
            ring.params().sq_entries(),
            ring.params().cq_entries(),
            sessions
        );

        Ok(Self {
            ring,
            connect_addrs: (0..sessions).map(|_| unsafe { std::mem::zeroed() }).collect(),
            busy: vec![false; sessions].into_boxed_slice(),
            inflight: 0,
            pending_submit: 0,
        })
    }

    /// The io_uring fd.
    pub fn fd(&self) -> RawFd {
        self.ring.as_raw_fd()
    }

    fn slot(&self, id: SessionId) -> usize {
        let idx = id.index();
        assert!(idx < self.busy.len(), "session {} outside ring of {}", id, self.busy.len());
        idx
    }

    fn ensure_idle(&self, id: SessionId) -> Result<usize> {
        let idx = self.slot(id);
        if self.busy[idx] {
            return Err(FetchError::SessionBusy(id));
        }
        Ok(idx)
    }

    /// Push one SQE tagged with `id`.
    fn push(&mut self, idx: usize, id: SessionId, sqe: squeue::Entry) -> Result<()> {
        let sqe = sqe.user_data(id.0);
        unsafe {
            self.ring
                .submission()
                .push(&sqe)
                .map_err(|_| FetchError::RingFull)?;
        }
        self.busy[idx] = true;
        self.inflight += 1;
        self.pending_submit += 1;
        Ok(())
    }

    /// Submit pending SQEs and wait for `want` CQEs. Retries on EINTR.
    fn flush_and_wait(&mut self, want: usize) -> Result<usize> {
        loop {
            match self.ring.submit_and_wait(want) {
                Ok(n) => {
                    self.pending_submit = 0;
                    return Ok(n);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(FetchError::IoUringSubmit(errno(&e))),
            }
        }
    }

    /// Pop one CQE. Cancel completions are swallowed.
    fn pop_completion(&mut self) -> Option<Completion> {
        loop {
            let cqe = self.ring.completion().next()?;
            let session = SessionId(cqe.user_data());
            if session.is_none() {
                continue;
            }
            let idx = self.slot(session);
            self.busy[idx] = false;
            self.inflight -= 1;
            return Some(Completion {
                session,
                result: cqe.result() as i64,
                flags: cqe.flags(),
            });
        }
    }
}

impl CompletionReactor for IoUringReactor {
    type Handle = OwnedFd;

    fn open(&mut self) -> Result<OwnedFd> {
        socket::tcp_socket()
    }

    fn submit_connect(&mut self, id: SessionId, handle: &OwnedFd, endpoint: &Endpoint) -> Result<()> {
        let idx = self.ensure_idle(id)?;
        self.connect_addrs[idx] = socket::sockaddr_in(endpoint);
        let addr = &self.connect_addrs[idx] as *const libc::sockaddr_in as *const libc::sockaddr;
        let sqe = opcode::Connect::new(
            types::Fd(handle.as_raw_fd()),
            addr,
            std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
        )
        .build();
        self.push(idx, id, sqe)
    }

    unsafe fn submit_send(&mut self, id: SessionId, handle: &OwnedFd, bytes: &[u8]) -> Result<()> {
        let idx = self.ensure_idle(id)?;
        // MSG_NOSIGNAL: a peer reset must surface as -EPIPE, not kill the process.
        let sqe = opcode::Send::new(
            types::Fd(handle.as_raw_fd()),
            bytes.as_ptr(),
            bytes.len().min(u32::MAX as usize) as u32,
        )
        .flags(libc::MSG_NOSIGNAL)
        .build();
        self.push(idx, id, sqe)
    }

    unsafe fn submit_receive(&mut self, id: SessionId, handle: &OwnedFd, buf: &mut [u8]) -> Result<()> {
        let idx = self.ensure_idle(id)?;
        let sqe = opcode::Recv::new(
            types::Fd(handle.as_raw_fd()),
            buf.as_mut_ptr(),
            buf.len().min(u32::MAX as usize) as u32,
        )
        .build();
        self.push(idx, id, sqe)
    }

    fn wait_one(&mut self) -> Result<Completion> {
        if self.pending_submit > 0 {
            self.flush_and_wait(0)?;
        }
        loop {
            if let Some(c) = self.pop_completion() {
                return Ok(c);
            }
            self.flush_and_wait(1)?;
        }
    }

    fn inflight(&self) -> usize {
        self.inflight
    }

    fn capacity(&self) -> usize {
        self.ring.params().sq_entries() as usize
    }

    fn shutdown(&mut self) {
        if self.inflight == 0 {
            return;
        }
        kdebug!("io_uring: cancelling {} in-flight operations", self.inflight);

        // Queued SQEs must reach the kernel before they can be cancelled.
        if self.pending_submit > 0 && self.flush_and_wait(0).is_err() {
            kwarn!("io_uring: flush before cancel failed");
        }
        for idx in 0..self.busy.len() {
            if !self.busy[idx] {
                continue;
            }
            let sqe = opcode::AsyncCancel::new(idx as u64)
                .build()
                .user_data(SessionId::NONE.0);
            if unsafe { self.ring.submission().push(&sqe) }.is_err() {
                // Ring full of cancels; kick what we have and retry once.
                let _ = self.flush_and_wait(0);
                let _ = unsafe { self.ring.submission().push(&sqe) };
            }
        }

        while self.inflight > 0 {
            if let Some(c) = self.pop_completion() {
                kdebug!("io_uring: drained session {} (result {})", c.session, c.result);
                continue;
            }
            if let Err(e) = self.flush_and_wait(1) {
                kwarn!("io_uring: drain stopped with {} in flight: {}", self.inflight, e);
                break;
            }
        }
        self.pending_submit = 0;
    }
}

impl Drop for IoUringReactor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::{Read, Write};
    use std::net::{SocketAddr, TcpListener};
    use std::thread;

    fn loopback_peer(body: &'static [u8]) -> (Endpoint, thread::JoinHandle<Vec<u8>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let endpoint = match listener.local_addr().unwrap() {
            SocketAddr::V4(a) => Endpoint::from(a),
            SocketAddr::V6(_) => unreachable!(),
        };
        let peer = thread::spawn(move || {
            let (mut conn, _) = listener.accept().unwrap();
            let mut req = [0u8; 64];
            let n = conn.read(&mut req).unwrap();
            conn.write_all(body).unwrap();
            req[..n].to_vec()
        });
        (endpoint, peer)
    }

    #[test]
    fn connect_send_receive_eof() {
        let (endpoint, peer) = loopback_peer(b"pong");
        let mut io = IoUringReactor::new(1).unwrap();
        assert!(io.capacity() >= 1);

        let id = SessionId(0);
        let fd = io.open().unwrap();
        io.submit_connect(id, &fd, &endpoint).unwrap();
        assert_eq!(io.inflight(), 1);
        assert_eq!(io.wait_one().unwrap(), Completion::new(id, 0));

        let req = b"ping";
        unsafe { io.submit_send(id, &fd, req).unwrap() };
        assert_eq!(io.wait_one().unwrap().result, 4);

        let mut buf = [0u8; 16];
        let mut got = Vec::new();
        loop {
            unsafe { io.submit_receive(id, &fd, &mut buf).unwrap() };
            let c = io.wait_one().unwrap();
            assert_eq!(c.session, id);
            assert!(c.result >= 0, "recv: {}", c.result);
            if c.result == 0 {
                break;
            }
            got.extend_from_slice(&buf[..c.result as usize]);
        }
        assert_eq!(got, b"pong");
        assert_eq!(peer.join().unwrap(), b"ping");
        assert_eq!(io.inflight(), 0);
    }

    #[test]
    fn second_operation_for_a_session_is_rejected() {
        let (endpoint, peer) = loopback_peer(b"");
        let mut io = IoUringReactor::new(2).unwrap();
        let fd = io.open().unwrap();
        io.submit_connect(SessionId(0), &fd, &endpoint).unwrap();
        let err = io.submit_connect(SessionId(0), &fd, &endpoint).unwrap_err();
        assert!(matches!(err, FetchError::SessionBusy(SessionId(0))));
        assert_eq!(io.wait_one().unwrap().result, 0);
        drop(fd);
        let _ = peer.join();
    }

    #[test]
    fn refused_connect_reports_negative_errno() {
        // Bind then drop to find a port with no listener.
        let port = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port();
        let endpoint: Endpoint = format!("127.0.0.1:{}", port).parse().unwrap();
        let mut io = IoUringReactor::new(1).unwrap();
        let fd = io.open().unwrap();
        io.submit_connect(SessionId(0), &fd, &endpoint).unwrap();
        let c = io.wait_one().unwrap();
        assert_eq!(c.result, -(libc::ECONNREFUSED as i64));
    }

    #[test]
    fn shutdown_cancels_pending_receive() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let endpoint = match listener.local_addr().unwrap() {
            SocketAddr::V4(a) => Endpoint::from(a),
            SocketAddr::V6(_) => unreachable!(),
        };
        let mut io = IoUringReactor::new(1).unwrap();
        let fd = io.open().unwrap();
        io.submit_connect(SessionId(0), &fd, &endpoint).unwrap();
        assert_eq!(io.wait_one().unwrap().result, 0);
        let (_conn, _) = listener.accept().unwrap();

        // The peer never writes: this receive only ends by cancellation.
        let mut buf = [0u8; 8];
        unsafe { io.submit_receive(SessionId(0), &fd, &mut buf).unwrap() };
        io.shutdown();
        assert_eq!(io.inflight(), 0);
    }
}
