//! Completion reactor abstraction.
//!
//! A `CompletionReactor` accepts connect / send / receive submissions tagged
//! with a [`SessionId`] and later hands back their completions one at a time.
//!
//! # Implementors
//!
//! - `IoUringReactor` (urfetch-module, Linux): one io_uring instance sized to
//!   the session count. Handles are non-blocking TCP sockets.
//!
//! - `SimReactor` (urfetch-module): scripted in-memory peer. Completions are
//!   produced from a per-session script in a selectable interleaving. Used to
//!   test the driver without a kernel or a network.
//!
//! Any proactor-style facility (IOCP, kqueue AIO, a user-space ring) fits the
//! same shape: the token goes in with the submission and comes back with the
//! completion.

use crate::config::Endpoint;
use crate::entry::{Completion, SessionId};
use crate::error::Result;

/// Async connection I/O: submit, then wait for one completion at a time.
///
/// **Contract:**
/// - Sized at construction to the number of sessions; with at most one
///   operation outstanding per session, no submission ever finds the queue
///   full. A full queue is reported as `FetchError::RingFull`.
/// - Submissions never block. Only [`wait_one`](Self::wait_one) blocks.
/// - The `id` passed to a submission is echoed unchanged in its completion.
pub trait CompletionReactor {
    /// Connection handle. Dropping it closes the connection.
    type Handle;

    /// Acquire a fresh, unconnected connection handle.
    fn open(&mut self) -> Result<Self::Handle>;

    /// Queue a connect. Completion result: 0, or a negative errno.
    fn submit_connect(&mut self, id: SessionId, handle: &Self::Handle, endpoint: &Endpoint) -> Result<()>;

    /// Queue a single send of `bytes`. Completion result: bytes written, or a
    /// negative errno.
    ///
    /// # Safety
    /// `bytes` must stay valid and unmodified until the completion for `id`
    /// has been returned by [`wait_one`](Self::wait_one).
    unsafe fn submit_send(&mut self, id: SessionId, handle: &Self::Handle, bytes: &[u8]) -> Result<()>;

    /// Queue a single receive into `buf`. Completion result: bytes read
    /// (0 = orderly close by the peer), or a negative errno.
    ///
    /// # Safety
    /// `buf` must stay valid, and must not be read or written, until the
    /// completion for `id` has been returned by [`wait_one`](Self::wait_one).
    unsafe fn submit_receive(&mut self, id: SessionId, handle: &Self::Handle, buf: &mut [u8]) -> Result<()>;

    /// Kick queued submissions and block until one completion is ready.
    /// Returns exactly one completion and consumes it.
    ///
    /// Must only be called while [`inflight`](Self::inflight) is non-zero.
    fn wait_one(&mut self) -> Result<Completion>;

    /// Operations submitted whose completion has not been returned yet.
    fn inflight(&self) -> usize;

    /// Maximum number of operations the reactor can hold at once.
    fn capacity(&self) -> usize;

    /// Cancel and drain everything still in flight.
    ///
    /// After this returns, the reactor holds no reference to any buffer
    /// passed to a submission.
    fn shutdown(&mut self);
}
