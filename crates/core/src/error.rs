//! Error types for the wirenet stack.
//!
//! Every fallible operation returns a structured error instead of panicking.
//! Lock contention between the tick path and the main loop is a scheduling
//! deferral (see the `send_backoff` / `receive_backoff` frame flags) and never
//! shows up here.

use thiserror::Error;

/// Top-level error type for all stack operations.
///
/// Each variant corresponds to a layer:
/// - Link: frame construction and receive assembly
/// - Transport: slot table and segment handling
/// - Console: operator input
/// - Config: invalid node configuration
#[derive(Debug, Error)]
pub enum Error {
    /// Data-link layer failure (oversized payload, assembly overrun)
    #[error("link error: {0}")]
    Link(#[from] LinkError),

    /// Transport layer failure (slot exhaustion)
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Malformed operator input
    #[error("console error: {0}")]
    Console(#[from] ConsoleError),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

/// Data-link layer errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LinkError {
    /// The payload does not fit the one-byte length field
    #[error("payload of {len} bytes exceeds the {max}-byte frame limit")]
    PayloadTooLong { len: usize, max: usize },

    /// The assembly buffer cannot hold a filling byte plus one ready byte
    #[error("receive assembly buffer needs at least 2 bytes, got {capacity}")]
    AssemblyTooSmall { capacity: usize },

    /// The deferred writer fell a whole assembly buffer behind the sampler
    #[error("receive assembly buffer overrun: {capacity} bytes waiting")]
    AssemblyOverrun { capacity: usize },
}

/// Transport layer errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Every slot holds an unacknowledged message
    #[error("all {capacity} transport slots are awaiting acknowledgment")]
    SlotTableFull { capacity: usize },
}

/// Operator console errors. The command being typed is aborted.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConsoleError {
    #[error("invalid address {0:?}: expected 0-255")]
    InvalidAddress(String),

    #[error("invalid message kind {0:?}: expected 0-255")]
    InvalidKind(String),

    #[error("message longer than {max} bytes")]
    LineTooLong { max: usize },
}

/// Type alias for Result with our Error type
pub type Result<T> = std::result::Result<T, Error>;
