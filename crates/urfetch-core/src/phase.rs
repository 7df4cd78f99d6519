//! The phase table.
//!
//! ```text
//!  Connecting ──0──► Writing ──len──► Reading ──n>0──┐
//!                                       │  ▲         │
//!                                       │  └─────────┘
//!                                       └──0──► Closed
//! ```
//!
//! [`next_step`] is a pure function of (phase, outcome, request length).
//! It never touches a session or a reactor; the driver applies the
//! returned [`Step`].

use crate::error::Violation;
use crate::session::Phase;

/// What the driver must do after a completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Submit the full request.
    Send,
    /// Append `append` bytes from the receive buffer to the output
    /// (zero right after the request went out), then submit a receive.
    Receive { append: usize },
    /// Close the handle. Nothing is submitted.
    Close,
}

/// An action and the phase the session moves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
    pub action: Action,
    pub next: Phase,
}

impl Step {
    const fn new(action: Action, next: Phase) -> Self {
        Self { action, next }
    }

    /// Whether the driver owes the reactor a new submission.
    pub fn submits(&self) -> bool {
        !matches!(self.action, Action::Close)
    }
}

/// Decide the next step for a session in `phase` whose operation
/// completed with `outcome`.
pub fn next_step(phase: Phase, outcome: i64, request_len: usize) -> Result<Step, Violation> {
    match phase {
        Phase::Connecting if outcome == 0 => Ok(Step::new(Action::Send, Phase::Writing)),
        Phase::Connecting => Err(Violation::ConnectFailed(outcome)),

        Phase::Writing if outcome >= 0 && outcome as u64 == request_len as u64 => {
            Ok(Step::new(Action::Receive { append: 0 }, Phase::Reading))
        }
        Phase::Writing => Err(Violation::ShortSend { sent: outcome, expected: request_len }),

        Phase::Reading if outcome > 0 => Ok(Step::new(
            Action::Receive { append: outcome as usize },
            Phase::Reading,
        )),
        Phase::Reading if outcome == 0 => Ok(Step::new(Action::Close, Phase::Closed)),
        Phase::Reading => Err(Violation::ReceiveFailed(outcome)),

        Phase::Closed => Err(Violation::Unexpected { phase, result: outcome }),
    }
}
