//! Error types shared across the stub.

use snafu::Snafu;

/// Errors returned while managing software breakpoints.
#[derive(Debug, Snafu, Clone, Copy, PartialEq, Eq)]
pub enum BreakpointError {
    /// There is already a breakpoint installed at this address.
    AlreadyExists,
    /// The breakpoint pool has no free slots left.
    NoSpace,
    /// No breakpoint was found at the given address.
    NotFound,
}

/// Errors surfaced while parsing a protocol command payload.
///
/// These never reach the wire directly; the dispatcher maps them onto the
/// `E01`/`E02`/`E03` replies described by the protocol.
#[derive(Debug, Snafu, Clone, Copy, PartialEq, Eq)]
pub enum CommandError {
    /// The payload was missing a required separator (`,` or `:`).
    Malformed,
    /// A hex field could not be parsed as a number.
    BadHex,
    /// A memory access touched an address below the configured safe floor.
    GuardRejected,
}
