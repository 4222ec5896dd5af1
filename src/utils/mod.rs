//! Various utility modules.

#[cfg(feature = "net")]
pub(crate) mod config;
