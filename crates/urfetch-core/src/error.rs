//! urfetch error types.

use crate::entry::SessionId;
use crate::session::Phase;

use std::fmt;

/// A completion outcome the phase table has no action for.
///
/// Every variant is fatal: the protocol subset urfetch speaks has no
/// recovery path for any of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Violation {
    /// `connect` completed with a non-zero result (negative errno).
    ConnectFailed(i64),
    /// `send` wrote something other than the whole request.
    ShortSend { sent: i64, expected: usize },
    /// `recv` completed with a negative errno.
    ReceiveFailed(i64),
    /// A completion arrived for a session in a phase that expects none.
    Unexpected { phase: Phase, result: i64 },
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectFailed(r) => write!(f, "connect failed: {}", errno_text(*r)),
            Self::ShortSend { sent, expected } if *sent < 0 => {
                write!(f, "send failed: {} (request is {} bytes)", errno_text(*sent), expected)
            }
            Self::ShortSend { sent, expected } => {
                write!(f, "short send: {} of {} bytes", sent, expected)
            }
            Self::ReceiveFailed(r) => write!(f, "recv failed: {}", errno_text(*r)),
            Self::Unexpected { phase, result } => {
                write!(f, "unexpected completion in phase {:?} (result {})", phase, result)
            }
        }
    }
}

fn errno_text(result: i64) -> String {
    if result < 0 && result >= i32::MIN as i64 {
        let errno = -(result as i32);
        format!("errno {} ({})", errno, std::io::Error::from_raw_os_error(errno))
    } else {
        format!("result {}", result)
    }
}

#[derive(Debug)]
pub enum FetchError {
    /// Bad or missing command-line argument.
    Usage(String),
    /// Invalid configuration value.
    Config(String),
    /// Submission queue is full.
    RingFull,
    /// io_uring setup failed.
    IoUringSetup(i32),
    /// io_uring submission or wait failed.
    IoUringSubmit(i32),
    /// socket() failed.
    Socket(i32),
    /// A second operation was submitted for a session that already has one in flight.
    SessionBusy(SessionId),
    /// A session's completion violated the protocol.
    Protocol { session: SessionId, violation: Violation },
    /// OS error with errno.
    Os(i32),
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Usage(msg) => write!(f, "usage: {}", msg),
            Self::Config(msg) => write!(f, "invalid configuration: {}", msg),
            Self::RingFull => write!(f, "ring full"),
            Self::IoUringSetup(e) => write!(f, "io_uring setup: errno {}", e),
            Self::IoUringSubmit(e) => write!(f, "io_uring submit: errno {}", e),
            Self::Socket(e) => write!(f, "socket: errno {}", e),
            Self::SessionBusy(id) => write!(f, "session {} already has an operation in flight", id),
            Self::Protocol { session, violation } => write!(f, "session {}: {}", session, violation),
            Self::Os(e) => write!(f, "OS error: errno {}", e),
        }
    }
}

impl std::error::Error for FetchError {}

impl From<std::io::Error> for FetchError {
    fn from(e: std::io::Error) -> Self {
        Self::Os(e.raw_os_error().unwrap_or(-1))
    }
}

pub type Result<T> = std::result::Result<T, FetchError>;
