//! Error types for tsignal.

use std::fmt;

/// The main error type for tsignal operations.
///
/// Topology errors (raised by `connect`/`disconnect`/`Worker::start`) are
/// surfaced to the caller. Delivery errors (`NoLoop`, `HandlerFault`,
/// `PostFault`) never leave `Signal::emit` — they are logged through
/// `tracing` and the emission continues with the next connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TSignalError {
    /// `connect` was given a receiver that cannot be used (e.g. a null/expired
    /// weak reference at connect time).
    InvalidReceiver,
    /// `connect` was given a handler that is not callable.
    ///
    /// Unreachable through the typed Rust API — `connect` only accepts values
    /// that already implement `Fn`/`FnMut`-like bounds — but kept so the
    /// error taxonomy stays complete if a dynamic entry point is added later.
    NotCallable,
    /// `Worker::start` arguments do not match what the worker's `run` future
    /// expects.
    SignatureError(String),
    /// An illegal lifecycle transition was attempted (e.g. `start` on a
    /// worker that is already `Running`, or `stop` called twice concurrently
    /// in a way that raced the state machine).
    LifecycleError(String),
    /// A queued delivery needed a bound execution context and found none.
    NoLoop,
    /// A handler panicked during dispatch.
    HandlerFault(String),
    /// A post to a loop was refused because the loop had already stopped
    /// accepting work.
    PostFault,
}

impl fmt::Display for TSignalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidReceiver => write!(f, "invalid or expired receiver"),
            Self::NotCallable => write!(f, "handler is not callable"),
            Self::SignatureError(msg) => write!(f, "signature error: {msg}"),
            Self::LifecycleError(msg) => write!(f, "lifecycle error: {msg}"),
            Self::NoLoop => write!(f, "no execution context bound for queued delivery"),
            Self::HandlerFault(msg) => write!(f, "handler panicked: {msg}"),
            Self::PostFault => write!(f, "loop refused post, already stopped"),
        }
    }
}

impl std::error::Error for TSignalError {}

/// A specialized `Result` type for tsignal operations.
pub type Result<T> = std::result::Result<T, TSignalError>;
