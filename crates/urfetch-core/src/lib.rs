//! # urfetch-core — Types and traits for urfetch
//!
//! This crate defines the pieces every other urfetch crate programs against:
//!
//! - [`entry`]: the opaque completion token ([`entry::SessionId`]) and the
//!   completion event it rides back on.
//! - [`reactor`]: the `CompletionReactor` contract — submit connect / send /
//!   receive, then wait for exactly one completion.
//! - [`session`]: the session registry, one owned record per session.
//! - [`phase`]: the pure (phase, outcome) → next step decision table.
//! - [`config`], [`env`], [`kprint`], [`error`]: the ambient plumbing.
//!
//! Concrete reactors live in `urfetch-module`; the driver loop that ties the
//! registry, the phase table and a reactor together lives in `urfetch-driver`.
//!
//! ## Design principle
//!
//! > "The state machine never touches the kernel. The reactor never decides."
//!
//! Everything the driver needs to decide the next operation is a pure function
//! of values defined here, so it is testable without io_uring.

pub mod kprint;
pub mod entry;
pub mod reactor;
pub mod session;
pub mod phase;
pub mod config;
pub mod env;
pub mod error;
