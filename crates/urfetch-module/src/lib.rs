//! # urfetch-module — Default implementations
//!
//! | Concern            | Impl            | Notes                              |
//! |--------------------|-----------------|------------------------------------|
//! | CompletionReactor  | IoUringReactor  | Linux only, one ring, N entries    |
//! | CompletionReactor  | SimReactor      | scripted peer, any platform        |
//! | Output sink        | output_sink     | one file per non-empty session     |

pub mod sim_reactor;
pub mod output_sink;

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        pub mod socket;
        pub mod uring_reactor;

        pub use uring_reactor::IoUringReactor;
    }
}

pub use sim_reactor::SimReactor;
