//! Error types.

use std::fmt;
use std::num::ParseIntError;

use thiserror::Error;

/// Returned by `offer` when the queue has no free slot.
///
/// Contains the value that could not be queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Full<T>(pub T);

impl<T> Full<T> {
    /// Returns the value that could not be queued.
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> fmt::Display for Full<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "queue is full")
    }
}

impl<T: fmt::Debug> std::error::Error for Full<T> {}

/// Rejected construction arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum QueueError {
    /// A capacity of zero was requested.
    #[error("queue capacity must be non-zero")]
    ZeroCapacity,
    /// The requested capacity has no power of two above it in `usize`.
    #[error("queue capacity {0} cannot be rounded up to a power of two")]
    CapacityOverflow(usize),
}

/// Returned by a blocking consumer whose wait was cut short by an
/// [`Interrupter`](crate::blocking::Interrupter).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("blocking consumer was interrupted")]
pub struct Interrupted;

/// A configuration value that could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Backend name other than `auto`, `native` or `fallback`.
    #[error("unknown queue backend {0:?}")]
    UnknownBackend(String),
    /// Look-ahead ceiling that is not a positive integer.
    #[error("invalid look-ahead ceiling {value:?}")]
    InvalidLookahead {
        /// The rejected input.
        value: String,
        /// Why it was rejected.
        #[source]
        source: ParseIntError,
    },
    /// Look-ahead ceiling of zero.
    #[error("look-ahead ceiling must be non-zero")]
    ZeroLookahead,
}
