//! Completion token and completion event types.
//!
//! These are the *lingua franca* between the driver and every reactor.

use std::fmt;

/// Session identifier — the opaque completion token.
///
/// Threaded through every submission and echoed back unchanged on the
/// matching completion. Stored in io_uring's `user_data` field for
/// zero-lookup routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct SessionId(pub u64);

impl SessionId {
    /// Sentinel for completions that belong to no session (cancel requests).
    pub const NONE: Self = Self(u64::MAX);

    #[inline]
    pub fn from_index(idx: usize) -> Self {
        Self(idx as u64)
    }

    /// Zero-based position of the session in its registry.
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }

    #[inline]
    pub fn is_none(self) -> bool {
        self == Self::NONE
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A finished operation, as handed back by `CompletionReactor::wait_one`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    /// The token that was submitted with the operation.
    pub session: SessionId,
    /// Result (return value or negative errno).
    pub result: i64,
    /// Backend-specific flags.
    pub flags: u32,
}

impl Completion {
    pub fn new(session: SessionId, result: i64) -> Self {
        Self { session, result, flags: 0 }
    }
}
