//! Server records.
//!
//! A [`Server`] describes one upstream name server of a pool: its address,
//! the connection state the transport keeps for it, and the list of queries
//! currently waiting for an answer from it.

use crate::routing::Membership;
use std::fmt;
use std::net::SocketAddr;

//------------ SocketHandle --------------------------------------------------

/// An opaque handle for a socket owned by the transport.
///
/// The pool never interprets the value. It only keeps it with the server
/// record so the transport can find its sockets again when the server is
/// closed.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct SocketHandle(u64);

impl SocketHandle {
    /// Creates a handle from the transport’s raw socket value.
    pub const fn from_raw(raw: u64) -> Self {
        SocketHandle(raw)
    }

    /// Returns the raw socket value.
    pub const fn into_raw(self) -> u64 {
        self.0
    }
}

//------------ Connections ---------------------------------------------------

/// The connection state of a server.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Connections {
    /// The UDP socket, if one is open.
    pub udp: Option<SocketHandle>,

    /// The TCP socket, if one is open.
    pub tcp: Option<SocketHandle>,

    /// The connection generation.
    ///
    /// Every time a slot of the pool is populated, it receives the next
    /// value of a pool-wide counter. A transport can compare this value
    /// with the one it saw when opening a connection to detect that the
    /// connection belongs to a different server by now.
    generation: u64,
}

impl Connections {
    /// Creates an unconnected state with the given generation.
    pub(crate) fn new(generation: u64) -> Self {
        Connections {
            udp: None,
            tcp: None,
            generation,
        }
    }

    /// Returns the connection generation.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns whether any socket is open.
    pub fn is_open(&self) -> bool {
        self.udp.is_some() || self.tcp.is_some()
    }

    /// Forgets all sockets, returning them.
    pub fn take(&mut self) -> (Option<SocketHandle>, Option<SocketHandle>) {
        (self.udp.take(), self.tcp.take())
    }
}

//------------ Server --------------------------------------------------------

/// A server record of a pool.
///
/// Servers are created by [`ServerPool::add_servers`] only. The membership
/// list can only be changed through the pool, everything else may be
/// modified by the transport via [`ServerPool::server_mut`].
///
/// [`ServerPool::add_servers`]: crate::pool::ServerPool::add_servers
/// [`ServerPool::server_mut`]: crate::pool::ServerPool::server_mut
#[derive(Clone)]
pub struct Server {
    /// The address of the server.
    addr: SocketAddr,

    /// The sockets the transport keeps for this server.
    connections: Connections,

    /// The queries currently assigned to this server.
    queries: Membership,

    /// Whether the transport considers the server broken.
    broken: bool,
}

impl Server {
    /// Creates a new server record for the given generation.
    pub(crate) fn new(addr: SocketAddr, generation: u64) -> Self {
        Server {
            addr,
            connections: Connections::new(generation),
            queries: Membership::new(),
            broken: false,
        }
    }

    /// Returns the address of the server.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Returns the connection state.
    pub fn connections(&self) -> &Connections {
        &self.connections
    }

    /// Returns a mutable reference to the connection state.
    pub fn connections_mut(&mut self) -> &mut Connections {
        &mut self.connections
    }

    /// Returns the connection generation of the server.
    pub fn generation(&self) -> u64 {
        self.connections.generation
    }

    pub fn is_broken(&self) -> bool {
        self.broken
    }

    pub fn set_broken(&mut self, broken: bool) {
        self.broken = broken
    }

    /// Returns the number of queries waiting for this server.
    pub fn query_count(&self) -> usize {
        self.queries.len()
    }

    /// Returns whether no query is waiting for this server.
    pub fn is_idle(&self) -> bool {
        self.queries.is_empty()
    }

    pub(crate) fn membership(&self) -> &Membership {
        &self.queries
    }

    pub(crate) fn membership_mut(&mut self) -> &mut Membership {
        &mut self.queries
    }
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("addr", &self.addr)
            .field("connections", &self.connections)
            .field("queries", &self.queries.len())
            .field("broken", &self.broken)
            .finish()
    }
}

//============ Testing =======================================================

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn new_server_is_idle_and_unconnected() {
        let server = Server::new("192.0.2.1:53".parse().unwrap(), 7);
        assert!(server.is_idle());
        assert_eq!(server.query_count(), 0);
        assert!(!server.is_broken());
        assert!(!server.connections().is_open());
        assert_eq!(server.generation(), 7);
    }

    #[test]
    fn take_connections() {
        let mut server = Server::new("[2001:db8::1]:53".parse().unwrap(), 1);
        server.connections_mut().udp = Some(SocketHandle::from_raw(3));
        assert!(server.connections().is_open());
        let (udp, tcp) = server.connections_mut().take();
        assert_eq!(udp.map(SocketHandle::into_raw), Some(3));
        assert_eq!(tcp, None);
        assert!(!server.connections().is_open());
        assert_eq!(server.generation(), 1);
    }
}
