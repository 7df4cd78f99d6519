//! `SimReactor` — a scripted, in-memory `CompletionReactor`.
//!
//! Each session has a [`PeerScript`] saying how its connect, send and
//! receives complete. Submissions go into a bounded [`ArrayQueue`] sized to
//! the session count, the way SQEs go into a ring; `wait_one` moves them to
//! the in-flight set and completes one of them, chosen by the
//! [`Interleave`] policy. Receive data is copied into the caller's buffer at
//! completion time, exactly when a kernel would have written it.
//!
//! The reactor also keeps the evidence tests need: the ordered list of
//! delivered completions, the number of live handles, and submissions that
//! were refused because the session was already busy.

use urfetch_core::config::Endpoint;
use urfetch_core::entry::{Completion, SessionId};
use urfetch_core::error::{FetchError, Result};
use urfetch_core::reactor::CompletionReactor;

use crossbeam_queue::ArrayQueue;

use std::cell::Cell;
use std::collections::VecDeque;
use std::rc::Rc;

/// One scripted receive completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Chunk {
    /// Bytes the peer sends. Split across receives if larger than the buffer.
    Data(Vec<u8>),
    /// Orderly close (result 0).
    Eof,
    /// Result `-errno`.
    Error(i32),
}

/// How one session's peer behaves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerScript {
    connect: i64,
    /// `None` = accept the whole request.
    send: Option<i64>,
    recv: VecDeque<Chunk>,
}

impl Default for PeerScript {
    fn default() -> Self {
        Self { connect: 0, send: None, recv: VecDeque::new() }
    }
}

impl PeerScript {
    /// Accepts the connection and the request; closes on the first receive.
    pub fn new() -> Self {
        Self::default()
    }

    /// Accepts, then returns `body` split at the given chunk sizes (the last
    /// chunk takes whatever is left), then closes.
    pub fn serve(body: &[u8], chunk_sizes: &[usize]) -> Self {
        let mut script = Self::new();
        let mut rest = body;
        for &size in chunk_sizes {
            if rest.is_empty() {
                break;
            }
            let (head, tail) = rest.split_at(size.min(rest.len()));
            script = script.data(head);
            rest = tail;
        }
        script.data(rest).eof()
    }

    pub fn connect_result(mut self, result: i64) -> Self {
        self.connect = result;
        self
    }

    pub fn send_result(mut self, result: i64) -> Self {
        self.send = Some(result);
        self
    }

    /// Queue `bytes` as one receive completion. Empty slices are ignored;
    /// a zero-byte receive means close.
    pub fn data(mut self, bytes: &[u8]) -> Self {
        if !bytes.is_empty() {
            self.recv.push_back(Chunk::Data(bytes.to_vec()));
        }
        self
    }

    pub fn eof(mut self) -> Self {
        self.recv.push_back(Chunk::Eof);
        self
    }

    pub fn recv_error(mut self, errno: i32) -> Self {
        self.recv.push_back(Chunk::Error(errno));
        self
    }
}

/// Which in-flight operation `wait_one` completes next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interleave {
    /// Oldest submission first.
    Fifo,
    /// Newest submission first.
    Lifo,
    /// Pseudo-random pick from a xorshift64 stream with this seed.
    Seeded(u64),
}

/// Connection handle. Counts itself in the reactor's live-handle gauge.
#[derive(Debug)]
pub struct SimHandle {
    live: Rc<Cell<usize>>,
}

impl Drop for SimHandle {
    fn drop(&mut self) {
        self.live.set(self.live.get() - 1);
    }
}

#[derive(Debug)]
enum Op {
    Connect,
    Send { len: usize },
    Recv { ptr: *mut u8, len: usize },
}

pub struct SimReactor {
    scripts: Vec<PeerScript>,
    submitted: ArrayQueue<(SessionId, Op)>,
    inflight: Vec<(SessionId, Op)>,
    busy: Vec<bool>,
    interleave: Interleave,
    rng: u64,
    live: Rc<Cell<usize>>,
    delivered: Vec<Completion>,
    refused: usize,
}

impl SimReactor {
    /// One session per script; session `i` follows `scripts[i]`.
    pub fn new(scripts: Vec<PeerScript>, interleave: Interleave) -> Self {
        let n = scripts.len();
        let rng = match interleave {
            Interleave::Seeded(0) => 0x9E37_79B9_7F4A_7C15,
            Interleave::Seeded(seed) => seed,
            _ => 0,
        };
        Self {
            scripts,
            submitted: ArrayQueue::new(n.max(1)),
            inflight: Vec::with_capacity(n),
            busy: vec![false; n],
            interleave,
            rng,
            live: Rc::new(Cell::new(0)),
            delivered: Vec::new(),
            refused: 0,
        }
    }

    /// `n` sessions that all follow the same script.
    pub fn uniform(n: usize, script: PeerScript, interleave: Interleave) -> Self {
        Self::new(vec![script; n], interleave)
    }

    /// Handles opened and not yet dropped.
    pub fn live_handles(&self) -> usize {
        self.live.get()
    }

    /// Every completion returned by `wait_one`, in delivery order.
    pub fn delivered(&self) -> &[Completion] {
        &self.delivered
    }

    /// Submissions rejected with `SessionBusy`.
    pub fn refused(&self) -> usize {
        self.refused
    }

    fn enqueue(&mut self, id: SessionId, op: Op) -> Result<()> {
        let idx = id.index();
        assert!(idx < self.busy.len(), "session {} has no script", id);
        if self.busy[idx] {
            self.refused += 1;
            return Err(FetchError::SessionBusy(id));
        }
        self.submitted.push((id, op)).map_err(|_| FetchError::RingFull)?;
        self.busy[idx] = true;
        Ok(())
    }

    fn pick(&mut self) -> usize {
        let len = self.inflight.len();
        match self.interleave {
            Interleave::Fifo => 0,
            Interleave::Lifo => len - 1,
            Interleave::Seeded(_) => {
                let mut x = self.rng;
                x ^= x << 13;
                x ^= x >> 7;
                x ^= x << 17;
                self.rng = x;
                (x % len as u64) as usize
            }
        }
    }

    fn complete(&mut self, id: SessionId, op: Op) -> i64 {
        let script = &mut self.scripts[id.index()];
        match op {
            Op::Connect => script.connect,
            Op::Send { len } => script.send.unwrap_or(len as i64),
            Op::Recv { ptr, len } => match script.recv.pop_front() {
                Some(Chunk::Data(mut bytes)) => {
                    let n = bytes.len().min(len);
                    // Safety: the submitter guaranteed `ptr..ptr+len` stays
                    // valid and untouched until this completion is returned.
                    unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr, n) };
                    if n < bytes.len() {
                        script.recv.push_front(Chunk::Data(bytes.split_off(n)));
                    }
                    n as i64
                }
                Some(Chunk::Error(errno)) => -(errno as i64),
                Some(Chunk::Eof) | None => 0,
            },
        }
    }
}

impl CompletionReactor for SimReactor {
    type Handle = SimHandle;

    fn open(&mut self) -> Result<SimHandle> {
        self.live.set(self.live.get() + 1);
        Ok(SimHandle { live: self.live.clone() })
    }

    fn submit_connect(&mut self, id: SessionId, _handle: &SimHandle, _endpoint: &Endpoint) -> Result<()> {
        self.enqueue(id, Op::Connect)
    }

    unsafe fn submit_send(&mut self, id: SessionId, _handle: &SimHandle, bytes: &[u8]) -> Result<()> {
        self.enqueue(id, Op::Send { len: bytes.len() })
    }

    unsafe fn submit_receive(&mut self, id: SessionId, _handle: &SimHandle, buf: &mut [u8]) -> Result<()> {
        self.enqueue(id, Op::Recv { ptr: buf.as_mut_ptr(), len: buf.len() })
    }

    fn wait_one(&mut self) -> Result<Completion> {
        while let Some(entry) = self.submitted.pop() {
            self.inflight.push(entry);
        }
        assert!(!self.inflight.is_empty(), "wait_one with nothing in flight would block forever");

        let at = self.pick();
        let (id, op) = self.inflight.remove(at);
        let result = self.complete(id, op);
        self.busy[id.index()] = false;

        let completion = Completion::new(id, result);
        self.delivered.push(completion);
        Ok(completion)
    }

    fn inflight(&self) -> usize {
        self.submitted.len() + self.inflight.len()
    }

    fn capacity(&self) -> usize {
        self.submitted.capacity()
    }

    fn shutdown(&mut self) {
        // Nothing was handed to a kernel; forgetting the pointers is enough.
        while self.submitted.pop().is_some() {}
        self.inflight.clear();
        self.busy.iter_mut().for_each(|b| *b = false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint() -> Endpoint {
        "127.0.0.1:80".parse().unwrap()
    }

    #[test]
    fn serve_splits_body_at_chunk_sizes() {
        let script = PeerScript::serve(b"abcdefgh", &[3, 2]);
        assert_eq!(
            script.recv,
            VecDeque::from(vec![
                Chunk::Data(b"abc".to_vec()),
                Chunk::Data(b"de".to_vec()),
                Chunk::Data(b"fgh".to_vec()),
                Chunk::Eof,
            ])
        );
        assert_eq!(PeerScript::serve(b"", &[4]).recv, VecDeque::from(vec![Chunk::Eof]));
    }

    #[test]
    fn scripted_lifecycle_copies_data_into_buffer() {
        let mut sim = SimReactor::new(vec![PeerScript::serve(b"hello", &[])], Interleave::Fifo);
        let id = SessionId(0);
        let h = sim.open().unwrap();
        assert_eq!(sim.live_handles(), 1);

        sim.submit_connect(id, &h, &endpoint()).unwrap();
        assert_eq!(sim.wait_one().unwrap().result, 0);

        unsafe { sim.submit_send(id, &h, b"GET").unwrap() };
        assert_eq!(sim.wait_one().unwrap().result, 3);

        let mut buf = [0u8; 4];
        unsafe { sim.submit_receive(id, &h, &mut buf).unwrap() };
        assert_eq!(sim.wait_one().unwrap().result, 4);
        assert_eq!(&buf, b"hell");

        unsafe { sim.submit_receive(id, &h, &mut buf).unwrap() };
        assert_eq!(sim.wait_one().unwrap().result, 1);
        assert_eq!(buf[0], b'o');

        unsafe { sim.submit_receive(id, &h, &mut buf).unwrap() };
        assert_eq!(sim.wait_one().unwrap().result, 0);

        drop(h);
        assert_eq!(sim.live_handles(), 0);
        assert_eq!(sim.delivered().len(), 5);
    }

    #[test]
    fn busy_session_is_refused() {
        let mut sim = SimReactor::uniform(1, PeerScript::new(), Interleave::Fifo);
        let h = sim.open().unwrap();
        sim.submit_connect(SessionId(0), &h, &endpoint()).unwrap();
        let err = sim.submit_connect(SessionId(0), &h, &endpoint()).unwrap_err();
        assert!(matches!(err, FetchError::SessionBusy(SessionId(0))));
        assert_eq!(sim.refused(), 1);
        assert_eq!(sim.inflight(), 1);
    }

    #[test]
    fn scripted_failures_come_back_negative() {
        let scripts = vec![
            PeerScript::new().connect_result(-111),
            PeerScript::new().send_result(2),
            PeerScript::new().recv_error(104),
        ];
        let mut sim = SimReactor::new(scripts, Interleave::Fifo);
        let h: Vec<_> = (0..3).map(|_| sim.open().unwrap()).collect();

        sim.submit_connect(SessionId(0), &h[0], &endpoint()).unwrap();
        unsafe { sim.submit_send(SessionId(1), &h[1], b"GET /").unwrap() };
        let mut buf = [0u8; 8];
        unsafe { sim.submit_receive(SessionId(2), &h[2], &mut buf).unwrap() };

        let results: Vec<_> = (0..3).map(|_| sim.wait_one().unwrap().result).collect();
        assert_eq!(results, vec![-111, 2, -104]);
    }

    #[test]
    fn interleave_policies_order_deliveries() {
        for (policy, want) in [
            (Interleave::Fifo, vec![0, 1, 2]),
            (Interleave::Lifo, vec![2, 1, 0]),
        ] {
            let mut sim = SimReactor::uniform(3, PeerScript::new(), policy);
            let h: Vec<_> = (0..3).map(|_| sim.open().unwrap()).collect();
            for (i, handle) in h.iter().enumerate() {
                sim.submit_connect(SessionId::from_index(i), handle, &endpoint()).unwrap();
            }
            let got: Vec<_> = (0..3).map(|_| sim.wait_one().unwrap().session.index()).collect();
            assert_eq!(got, want, "{:?}", policy);
        }
    }

    #[test]
    fn seeded_interleave_is_reproducible() {
        let order = |seed| {
            let mut sim = SimReactor::uniform(8, PeerScript::new(), Interleave::Seeded(seed));
            let h: Vec<_> = (0..8).map(|_| sim.open().unwrap()).collect();
            for (i, handle) in h.iter().enumerate() {
                sim.submit_connect(SessionId::from_index(i), handle, &endpoint()).unwrap();
            }
            (0..8).map(|_| sim.wait_one().unwrap().session.index()).collect::<Vec<_>>()
        };
        assert_eq!(order(42), order(42));
        let mut sorted = order(42);
        sorted.sort_unstable();
        assert_eq!(sorted, (0..8).collect::<Vec<_>>());
    }
}
