//! Dynamic reconfiguration of a DNS client’s server pool.
//!
//! A DNS client keeps a list of upstream servers it sends its queries to.
//! This crate provides that list together with the bookkeeping of which
//! outstanding query is waiting on which server, and the protocol for
//! changing the list while queries are in flight: new servers can be added
//! at any time, the servers present before are retired one by one as soon
//! as their last query has finished.
//!
//! The crate deliberately does not deal with sockets, DNS messages, or the
//! lifecycle of individual queries. It leaves these to the transport and
//! query layers of a client, which interact with the pool through a small
//! set of operations.
//!
//! # Modules
//!
//! * [pool] contains the [`ServerPool`][pool::ServerPool] and the
//!   reconfiguration protocol,
//! * [server] contains the server records kept by the pool,
//! * [routing] contains the table of query to server associations,
//! * [conf] contains the pool configuration, and
//! * [error] contains the error type of pool operations.
//!
//! # Example
//!
//! ```
//! use domain_pool::pool::ServerPool;
//! use domain_pool::routing::QueryId;
//! use domain_pool::server::Server;
//!
//! let mut pool = ServerPool::new();
//! pool.add_servers(["192.0.2.1:53".parse().unwrap()]).unwrap();
//! let query = QueryId::new(1);
//! assert_eq!(pool.dispatch(query), Ok(0));
//!
//! // Replace the server. New queries go to the new one right away.
//! pool.add_servers(["192.0.2.2:53".parse().unwrap()]).unwrap();
//! assert_eq!(pool.dispatch(QueryId::new(2)), Ok(1));
//!
//! // The old server stays until its query is done.
//! let mut close = |_: &mut Server| {};
//! assert_eq!(pool.drain_old_servers(&mut close), Ok(0));
//! pool.detach_query(query);
//! assert_eq!(pool.drain_old_servers(&mut close), Ok(1));
//! assert_eq!(pool.owner_of(QueryId::new(2)), Some(0));
//! ```
//!
//! # Reference of Feature Flags
//!
//! * `logging`: adds the `logging` module for setting up a
//!   [tracing-subscriber](https://github.com/tokio-rs/tracing) based log
//!   output.
//! * `net`: adds the `sweep` module that shares a pool between async tasks
//!   and retires old servers periodically using
//!   [Tokio](https://tokio.rs/).
//! * `serde`: enables serialization of the configuration via
//!   [serde](https://serde.rs/).

#![allow(renamed_and_removed_lints)]
#![allow(clippy::unknown_clippy_lints)]
#![allow(clippy::len_without_is_empty)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod conf;
pub mod error;
#[cfg(feature = "logging")]
#[cfg_attr(docsrs, doc(cfg(feature = "logging")))]
pub mod logging;
pub mod pool;
pub mod routing;
pub mod server;
#[cfg(feature = "net")]
#[cfg_attr(docsrs, doc(cfg(feature = "net")))]
pub mod sweep;

mod utils;
