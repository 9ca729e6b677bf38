//! Error types for the rust-divert implementation.

use thiserror::Error;

/// All possible errors that can occur within the diversion core.
#[derive(Error, Debug)]
pub enum Error {
    /// The rule list is malformed, out of range or breaks the forward-only
    /// branch invariant. The previously active filter (if any) stays in force.
    #[error("invalid filter: {0}")]
    InvalidFilter(String),

    /// The queue is being torn down and no longer accepts or delivers packets.
    #[error("diversion queue is shutting down")]
    QueueShuttingDown,

    /// An allocation for a program or a queued packet could not be satisfied.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// A parameter, flag set or layer value is outside its permitted range.
    #[error("invalid parameter: {0}")]
    InvalidParam(String),

    /// The operation is not permitted in the context's current state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// `start_filter` was called on a context that already has a filter.
    #[error("filter already started")]
    FilterAlreadyStarted,

    /// No async runtime was available to host the background tasks.
    #[error("runtime error: {0}")]
    Runtime(String),

    /// Configuration could not be loaded.
    #[error("configuration error: {0}")]
    Config(#[from] ::config::ConfigError),
}
