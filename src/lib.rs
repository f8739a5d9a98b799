//! Settle-once deferred values.
//!
//! A [`Deferred`] stands for the eventual result of some asynchronous
//! operation. It settles exactly once, succeeding with a `T` or failing with an
//! `E`, and any number of reactions may be attached before or after that
//! happens. Reactions never run inline: they are handed to a [`Scheduler`]
//! and run on a later turn, in the order they were registered.
//!
//! ```
//! use deferred::{Deferred, EventLoop, Next};
//! use std::time::Duration;
//!
//! let event_loop = EventLoop::new();
//! let fast = Deferred::<&str, String>::delay_success(
//!     &event_loop,
//!     Next::Value("fast"),
//!     Duration::from_millis(10),
//! );
//! let slow = Deferred::<&str, String>::delay_success(
//!     &event_loop,
//!     Next::Value("slow"),
//!     Duration::from_millis(50),
//! );
//! let winner = Deferred::race(&event_loop, vec![Next::Deferred(slow), Next::Deferred(fast)])
//!     .and_then(|name| Ok(Next::Value(name.len())));
//!
//! event_loop.run_until_idle();
//! assert_eq!(winner.result(), Some(Ok(4)));
//! ```
mod chain;
mod combinators;
pub mod config;
mod deferred;
pub mod scheduler;

#[cfg(feature = "tokio")]
pub mod channel;

pub use chain::{Handler, Next};
pub use config::{Config, UnhandledFailures};
pub use deferred::{Deferred, SettleFailure, SettleSuccess, Settler, Status};
pub use scheduler::{EventLoop, Scheduler, Task};

/// What awaiting a [`Deferred`] produces when it does not succeed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error<E> {
    #[error("deferred settled as failed")]
    Failed(E),
    #[error("every settlement handle was dropped before the deferred settled")]
    Abandoned,
}
