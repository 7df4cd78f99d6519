//! Session registry.
//!
//! One owned [`Session`] record per session id, held in a single table so
//! phase, handle, buffer and output can never drift apart.
//!
//! Single-threaded: only the driver loop touches the registry. An id that was
//! never handed out by [`SessionRegistry::create`] is a programming defect and
//! panics.

use crate::entry::SessionId;

/// A session's stage in the connect → send → receive protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Connecting,
    Writing,
    Reading,
    Closed,
}

impl Phase {
    /// Whether `next` is a legal successor of `self`.
    ///
    /// Connecting → Writing → Reading → (Reading)* → Closed, nothing else.
    pub fn can_advance_to(self, next: Phase) -> bool {
        matches!(
            (self, next),
            (Phase::Connecting, Phase::Writing)
                | (Phase::Writing, Phase::Reading)
                | (Phase::Reading, Phase::Reading)
                | (Phase::Reading, Phase::Closed)
        )
    }
}

/// Per-session state, generic over the reactor's connection handle.
#[derive(Debug)]
pub struct Session<H> {
    id: SessionId,
    phase: Phase,
    /// `None` once closed. Dropping the handle closes the connection.
    handle: Option<H>,
    /// Fixed-capacity receive buffer, reused by every receive.
    buffer: Box<[u8]>,
    output: Vec<u8>,
}

impl<H> Session<H> {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn output(&self) -> &[u8] {
        &self.output
    }

    pub fn is_closed(&self) -> bool {
        self.phase == Phase::Closed
    }
}

#[derive(Debug)]
pub struct SessionRegistry<H> {
    sessions: Vec<Session<H>>,
    open: usize,
}

impl<H> SessionRegistry<H> {
    pub fn with_capacity(n: usize) -> Self {
        Self {
            sessions: Vec::with_capacity(n),
            open: 0,
        }
    }

    /// Register a new session in phase `Connecting`, owning `handle` and a
    /// zeroed receive buffer of `buffer_size` bytes.
    ///
    /// Ids are dense and assigned in creation order: 0, 1, 2, ...
    pub fn create(&mut self, handle: H, buffer_size: usize) -> SessionId {
        let id = SessionId::from_index(self.sessions.len());
        self.sessions.push(Session {
            id,
            phase: Phase::Connecting,
            handle: Some(handle),
            buffer: vec![0u8; buffer_size].into_boxed_slice(),
            output: Vec::new(),
        });
        self.open += 1;
        id
    }

    pub fn get(&self, id: SessionId) -> &Session<H> {
        match self.sessions.get(id.index()) {
            Some(s) => s,
            None => panic!("session {} not in registry of {}", id, self.sessions.len()),
        }
    }

    fn get_mut(&mut self, id: SessionId) -> &mut Session<H> {
        let len = self.sessions.len();
        match self.sessions.get_mut(id.index()) {
            Some(s) => s,
            None => panic!("session {} not in registry of {}", id, len),
        }
    }

    pub fn phase(&self, id: SessionId) -> Phase {
        self.get(id).phase
    }

    /// Move a live session forward. Closing goes through [`close`](Self::close).
    pub fn set_phase(&mut self, id: SessionId, next: Phase) {
        let s = self.get_mut(id);
        assert!(
            next != Phase::Closed && s.phase.can_advance_to(next),
            "session {}: illegal transition {:?} -> {:?}",
            id,
            s.phase,
            next
        );
        s.phase = next;
    }

    /// The session's connection handle.
    ///
    /// Panics once the session is closed.
    pub fn handle(&self, id: SessionId) -> &H {
        match &self.get(id).handle {
            Some(h) => h,
            None => panic!("session {} handle used after close", id),
        }
    }

    /// Handle and receive buffer together, for submitting a receive.
    pub fn recv_parts(&mut self, id: SessionId) -> (&H, &mut [u8]) {
        let s = self.get_mut(id);
        match &s.handle {
            Some(h) => (h, &mut s.buffer[..]),
            None => panic!("session {} handle used after close", id),
        }
    }

    pub fn append_output(&mut self, id: SessionId, bytes: &[u8]) {
        self.get_mut(id).output.extend_from_slice(bytes);
    }

    /// Append the first `n` bytes of the receive buffer to the output.
    pub fn append_received(&mut self, id: SessionId, n: usize) {
        let s = self.get_mut(id);
        assert!(
            n <= s.buffer.len(),
            "session {}: received {} bytes into a {}-byte buffer",
            id,
            n,
            s.buffer.len()
        );
        s.output.extend_from_slice(&s.buffer[..n]);
    }

    /// Drop the handle (closing the connection), release the receive buffer
    /// and mark the session `Closed`. The output is kept.
    pub fn close(&mut self, id: SessionId) {
        let s = self.get_mut(id);
        assert!(
            s.phase.can_advance_to(Phase::Closed),
            "session {}: close from {:?}",
            id,
            s.phase
        );
        s.handle = None;
        s.buffer = Box::default();
        s.phase = Phase::Closed;
        self.open -= 1;
    }

    pub fn output(&self, id: SessionId) -> &[u8] {
        &self.get(id).output
    }

    /// Number of sessions not yet `Closed`.
    pub fn open_count(&self) -> usize {
        self.open
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Session<H>> {
        self.sessions.iter()
    }

    /// Consume the registry, yielding each session's output in id order.
    pub fn into_outputs(self) -> Vec<Vec<u8>> {
        self.sessions.into_iter().map(|s| s.output).collect()
    }
}
