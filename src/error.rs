//! Error type for server pool operations.

#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

use std::collections::TryReserveError;
use std::error;
use std::fmt::{Display, Formatter};

/// Error type for server pool operations.
///
/// Whenever one of these is returned, the pool is left exactly as it was
/// before the failed operation started.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Error {
    /// The backing storage of the pool could not be allocated.
    OutOfMemory,

    /// A batch of servers to add did not contain any servers.
    EmptyBatch,

    /// The pool does not contain any servers.
    NoServers,

    /// A server position is outside of the pool.
    ServerOutOfRange,

    /// The query is already attached to a server.
    DuplicateQuery,

    /// The query is not attached to any server.
    UnknownQuery,
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        match self {
            Error::OutOfMemory => write!(f, "out of memory"),
            Error::EmptyBatch => write!(f, "no servers to add"),
            Error::NoServers => write!(f, "no servers in pool"),
            Error::ServerOutOfRange => {
                write!(f, "server position outside of pool")
            }
            Error::DuplicateQuery => {
                write!(f, "query already attached to a server")
            }
            Error::UnknownQuery => {
                write!(f, "query not attached to a server")
            }
        }
    }
}

impl error::Error for Error {}

impl From<TryReserveError> for Error {
    fn from(_: TryReserveError) -> Self {
        Error::OutOfMemory
    }
}
