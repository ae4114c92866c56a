//! Custom error types for the registry.
//!
//! This module defines the two error enums used across the crate. Using the
//! `thiserror` crate, it provides a centralized and consistent way to handle
//! the different kinds of failures the registry can encounter.
//!
//! ## Error Hierarchy
//!
//! - **`BusError`**: Failures while talking to a bus server or a remote
//!   service. Every variant is recoverable from the registry's point of view:
//!   a failed identification query skips to the next dialect, and an ident
//!   procedure that errors is treated as a non-match (see the arbiter).
//! - **`RegistryError`**: Application-level failures surfaced to callers of
//!   the manager handle: configuration problems, I/O, and channel breakage
//!   when the manager task has gone away.
//!
//! By using `#[from]`, `RegistryError` can be seamlessly created from the
//! underlying error types, simplifying error handling throughout the crate
//! with the `?` operator.

use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type RegistryResult<T> = std::result::Result<T, RegistryError>;

/// Failures raised by bus-server queries and remote ident procedures.
#[derive(Error, Debug)]
pub enum BusError {
    #[error("query timed out")]
    Timeout,

    #[error("no device present at the addressed channel")]
    DeviceNotPresent,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("remote service error: {0}")]
    Remote(String),
}

impl BusError {
    /// Whether the device answered the query at all.
    ///
    /// A timeout means the channel exists but stayed silent, which the
    /// negotiator records as an empty captured response; any other failure
    /// leaves the previously captured text untouched.
    pub fn is_timeout(&self) -> bool {
        matches!(self, BusError::Timeout)
    }
}

/// Application-level errors for the registry daemon.
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Bus error: {0}")]
    Bus(#[from] BusError),

    #[error("Manager mailbox closed")]
    MailboxClosed,

    #[error("Manager dropped the response channel")]
    ResponseDropped,
}
