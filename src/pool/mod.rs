//! The server pool of a DNS client.
//!
//! A [`ServerPool`] is the ordered list of upstream servers a client sends
//! its queries to, together with the routing table recording which server
//! each outstanding query is waiting on. Queries refer to their server by
//! its position in the pool. Positions are not identities: removing a
//! server moves all servers after it down by one, and the queries waiting
//! on those servers move with them.
//!
//! The pool can be reconfigured while queries are outstanding. Adding a
//! batch of servers via [`ServerPool::add_servers`] turns all servers
//! present before into the _old segment_. New queries go to the first new
//! server from then on. Each old server is retired as soon as its last
//! query has finished by repeatedly calling
//! [`ServerPool::drain_old_servers`]. While this happens, rotation over the
//! servers is switched off. Once the last old server is gone, the rotation
//! setting is restored.
//!
//! The pool is not synchronized. All mutation and query routing needs to
//! happen from one place, e.g., a single task. The `sweep` module,
//! available with the `net` feature, wraps a pool for use from async code.

use crate::conf::Config;
use crate::error::Error;
use crate::routing::{Membership, Queries, QueryId, RoutingTable};
use crate::server::Server;
use std::mem;
use std::net::SocketAddr;
use std::ops::Range;
use tracing::{debug, trace};

pub use self::reconf::CloseSockets;

//------------ Sub-modules ---------------------------------------------------

mod reconf;

/// The membership list of positions not in the pool.
static NO_QUERIES: Membership = Membership::new();

//------------ ServerPool ----------------------------------------------------

/// An ordered pool of upstream servers.
#[derive(Clone, Debug, Default)]
pub struct ServerPool {
    /// The servers in the order they were added.
    servers: Vec<Server>,

    /// The query to server associations.
    routes: RoutingTable,

    /// The number of servers at the front of the pool up for retirement.
    ///
    /// This is also the position of the first server added by the most
    /// recent reconfiguration.
    old_segment: usize,

    /// The number of old servers that still wait for retirement.
    ///
    /// If this is zero, no reconfiguration is in progress.
    pending_removal: usize,

    /// Whether new queries are distributed over all servers.
    rotate: bool,

    /// The rotation setting from before the current reconfiguration.
    saved_rotate: Option<bool>,

    /// The last connection generation handed out.
    generation: u64,

    /// Where rotation continues.
    cursor: usize,
}

impl ServerPool {
    /// Creates a new, empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a pool from the given configuration.
    ///
    /// The configured servers become the initial content of the pool. No
    /// reconfiguration is in progress afterwards.
    pub fn from_conf(conf: &Config) -> Result<Self, Error> {
        let mut res = ServerPool {
            rotate: conf.rotate(),
            ..Default::default()
        };
        if !conf.servers().is_empty() {
            res.add_servers(conf.servers().iter().copied())?;
        }
        Ok(res)
    }

    /// Returns the number of servers in the pool.
    pub fn len(&self) -> usize {
        self.servers.len()
    }

    /// Returns whether the pool has no servers.
    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    /// Returns the servers in pool order.
    pub fn servers(&self) -> &[Server] {
        &self.servers
    }

    /// Returns the server at the given position.
    pub fn server(&self, pos: usize) -> Option<&Server> {
        self.servers.get(pos)
    }

    /// Returns a mutable reference to the server at the given position.
    ///
    /// This is intended for the transport to manage connection state and
    /// the broken flag. The query list of a server is only accessible via
    /// the pool.
    pub fn server_mut(&mut self, pos: usize) -> Option<&mut Server> {
        self.servers.get_mut(pos)
    }

    /// Returns the size of the old segment.
    ///
    /// During a reconfiguration, this is the position of the first server
    /// that was added by it.
    pub fn old_segment_size(&self) -> usize {
        self.old_segment
    }

    /// Returns how many old servers still wait for retirement.
    pub fn pending_removal(&self) -> usize {
        self.pending_removal
    }

    /// Returns whether a reconfiguration is in progress.
    pub fn is_reconfiguring(&self) -> bool {
        self.pending_removal > 0
    }

    /// Returns whether rotation is currently in effect.
    pub fn rotate(&self) -> bool {
        self.rotate
    }

    /// Returns the rotation setting saved by a running reconfiguration.
    pub fn saved_rotate(&self) -> Option<bool> {
        self.saved_rotate
    }

    /// Changes the rotation setting.
    ///
    /// During a reconfiguration, the setting only takes effect once the
    /// reconfiguration has finished.
    pub fn set_rotate(&mut self, rotate: bool) {
        match self.saved_rotate.as_mut() {
            Some(saved) => *saved = rotate,
            None => self.rotate = rotate,
        }
    }

    /// Returns the routing table.
    pub fn routing(&self) -> &RoutingTable {
        &self.routes
    }
}

/// # Reconfiguration
///
impl ServerPool {
    /// Adds a batch of servers to the end of the pool.
    ///
    /// If the pool wasn’t empty, this starts a reconfiguration: all servers
    /// currently in the pool become old servers that will be retired once
    /// idle, rotation is suspended, and new queries are sent to the first
    /// of the new servers.
    ///
    /// Returns the positions of the new servers. If the batch is empty,
    /// nothing happens and [`Error::EmptyBatch`] is returned.
    pub fn add_servers<I>(
        &mut self,
        addrs: I,
    ) -> Result<Range<usize>, Error>
    where
        I: IntoIterator<Item = SocketAddr>,
    {
        let addrs: Vec<_> = addrs.into_iter().collect();
        if addrs.is_empty() {
            return Err(Error::EmptyBatch);
        }
        self.servers.try_reserve_exact(addrs.len())?;

        let old = self.servers.len();
        let count = addrs.len();
        for addr in addrs {
            self.generation += 1;
            trace!("Adding server {addr}, generation {}", self.generation);
            self.servers.push(Server::new(addr, self.generation));
        }

        if old > 0 {
            self.old_segment = old;
            self.pending_removal = old;
            if self.saved_rotate.is_none() {
                self.saved_rotate = Some(self.rotate);
            }
            self.rotate = false;
            debug!(
                "Reconfiguring pool: {old} old servers, {count} new servers"
            );
        } else {
            debug!("Populated empty pool with {count} servers");
        }

        // The new servers have fresh lists and need no fixing.
        self.routes.relink(&mut self.servers, 0, count, false);

        Ok(old..self.servers.len())
    }

    /// Removes the first server of the pool.
    ///
    /// This is the low-level retirement step. It moves all other servers
    /// into a new backing store, shrinks the old segment by one and returns
    /// the removed server. Any queries still attached to the removed
    /// server are dropped from the routing table.
    ///
    /// The positions recorded for the queries of the remaining servers are
    /// not updated. The caller must follow up with
    /// `relink(0, 0, true)` before doing anything else with the pool.
    pub fn shift_one(&mut self) -> Result<Server, Error> {
        let reconfiguring = self.is_reconfiguring();
        let server = self.shift_at(0)?;
        if reconfiguring {
            self.pending_removal = self.pending_removal.saturating_sub(1);
            if self.old_segment == 0 {
                self.finish_reconfiguration();
            }
        }
        Ok(server)
    }

    /// Re-establishes routing consistency after the pool has changed.
    ///
    /// All servers except the last `skip_back` ones are visited. If `shift`
    /// is true, the queries of servers at position `skip_front` and later
    /// are moved down one position, following their server after a
    /// server before it was removed.
    pub fn relink(
        &mut self,
        skip_front: usize,
        skip_back: usize,
        shift: bool,
    ) {
        self.routes
            .relink(&mut self.servers, skip_front, skip_back, shift)
    }

    /// Removes the server at `pos`.
    ///
    /// Like [`shift_one`][Self::shift_one], this leaves renumbering to the
    /// caller and doesn’t touch the pending removal count.
    fn shift_at(&mut self, pos: usize) -> Result<Server, Error> {
        if self.servers.is_empty() {
            return Err(Error::NoServers);
        }
        if pos >= self.servers.len() {
            return Err(Error::ServerOutOfRange);
        }
        let store = self.shrunk_store()?;
        Ok(self.shift_into(store, pos))
    }

    /// Allocates a backing store for one server less than now.
    fn shrunk_store(&self) -> Result<Vec<Server>, Error> {
        let mut store = Vec::new();
        store.try_reserve_exact(self.servers.len().saturating_sub(1))?;
        Ok(store)
    }

    /// Moves all servers but the one at `pos` into `store`.
    ///
    /// The store must have room for all the remaining servers and `pos`
    /// must be a valid position.
    fn shift_into(&mut self, store: Vec<Server>, pos: usize) -> Server {
        let mut old = mem::replace(&mut self.servers, store);
        let mut removed = old.remove(pos);
        self.servers.extend(old);

        if pos < self.old_segment {
            self.old_segment -= 1;
        }
        if self.cursor > pos {
            self.cursor -= 1;
        }

        let orphans = self.routes.detach_all(removed.membership_mut());
        if !orphans.is_empty() {
            debug!(
                "Dropped {} queries of removed server {}",
                orphans.len(),
                removed.addr()
            );
        }
        trace!("Removed server {} from position {pos}", removed.addr());
        removed
    }
}

/// # Query Routing
///
impl ServerPool {
    /// Returns the number of outstanding queries.
    pub fn query_count(&self) -> usize {
        self.routes.len()
    }

    /// Returns the position of the server the query is waiting on.
    pub fn owner_of(&self, id: QueryId) -> Option<usize> {
        self.routes.owner(id)
    }

    /// Returns the queries waiting on the server at `pos`.
    ///
    /// If there is no such server, the iterator is empty.
    pub fn queries(&self, pos: usize) -> Queries<'_> {
        match self.servers.get(pos) {
            Some(server) => self.routes.iter(server.membership()),
            None => self.routes.iter(&NO_QUERIES),
        }
    }

    /// Attaches a query to the server at `pos`.
    pub fn attach_query(
        &mut self,
        id: QueryId,
        pos: usize,
    ) -> Result<(), Error> {
        self.routes.insert(&mut self.servers, id, pos)
    }

    /// Detaches a query from its server.
    ///
    /// Returns the position of the server or `None` if the query wasn’t
    /// attached.
    pub fn detach_query(&mut self, id: QueryId) -> Option<usize> {
        self.routes.remove(&mut self.servers, id)
    }

    /// Moves a query over to the server at `pos`.
    ///
    /// Returns the position of the server the query was attached to before.
    pub fn move_query(
        &mut self,
        id: QueryId,
        pos: usize,
    ) -> Result<usize, Error> {
        if pos >= self.servers.len() {
            return Err(Error::ServerOutOfRange);
        }
        let prev = self
            .routes
            .remove(&mut self.servers, id)
            .ok_or(Error::UnknownQuery)?;
        self.routes.insert(&mut self.servers, id, pos)?;
        Ok(prev)
    }

    /// Selects the server for a new query and attaches the query to it.
    ///
    /// Returns the position of the selected server.
    pub fn dispatch(&mut self, id: QueryId) -> Result<usize, Error> {
        let pos = self.pick_server().ok_or(Error::NoServers)?;
        self.attach_query(id, pos)?;
        self.advance(pos);
        Ok(pos)
    }

    /// Selects the server for the next new query.
    ///
    /// Without rotation, this picks the first server not marked as broken
    /// starting at the beginning of the new segment, i.e., during a
    /// reconfiguration the first new server and otherwise the first server
    /// of the pool. With rotation, servers are used in turn.
    ///
    /// Returns `None` if the pool is empty.
    pub fn select_server(&mut self) -> Option<usize> {
        let pos = self.pick_server()?;
        self.advance(pos);
        Some(pos)
    }

    fn pick_server(&self) -> Option<usize> {
        let len = self.servers.len();
        if len == 0 {
            return None;
        }
        if self.rotate {
            let start = self.cursor % len;
            let pos = (0..len)
                .map(|i| (start + i) % len)
                .find(|&pos| !self.servers[pos].is_broken())
                .unwrap_or(start);
            Some(pos)
        } else {
            let start = self.old_segment.min(len - 1);
            let pos = (start..len)
                .find(|&pos| !self.servers[pos].is_broken())
                .unwrap_or(start);
            Some(pos)
        }
    }

    fn advance(&mut self, pos: usize) {
        if self.rotate {
            self.cursor = pos.wrapping_add(1);
        }
    }
}

//============ Testing =======================================================

#[cfg(test)]
mod test {
    use super::*;

    fn addr(last: u8) -> SocketAddr {
        ([192, 0, 2, last], 53).into()
    }

    fn pool(n: u8) -> ServerPool {
        let mut pool = ServerPool::new();
        pool.add_servers((0..n).map(addr)).unwrap();
        pool
    }

    #[test]
    fn initial_population() {
        let pool = pool(3);
        assert_eq!(pool.len(), 3);
        assert_eq!(pool.old_segment_size(), 0);
        assert_eq!(pool.pending_removal(), 0);
        assert!(!pool.is_reconfiguring());
        assert_eq!(pool.saved_rotate(), None);
        let generations: Vec<_> =
            pool.servers().iter().map(Server::generation).collect();
        assert_eq!(generations, [1, 2, 3]);
    }

    #[test]
    fn add_starts_reconfiguration() {
        let mut pool = pool(2);
        pool.set_rotate(true);
        let range = pool.add_servers([addr(10), addr(11)]).unwrap();
        assert_eq!(range, 2..4);
        assert_eq!(pool.len(), 4);
        assert_eq!(pool.old_segment_size(), 2);
        assert_eq!(pool.pending_removal(), 2);
        assert!(!pool.rotate());
        assert_eq!(pool.saved_rotate(), Some(true));
        assert_eq!(pool.server(2).unwrap().addr(), addr(10));
        assert_eq!(pool.server(3).unwrap().generation(), 4);
    }

    #[test]
    fn add_empty_batch_is_rejected() {
        let mut pool = pool(2);
        assert_eq!(pool.add_servers(Vec::new()), Err(Error::EmptyBatch));
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.old_segment_size(), 0);
        assert_eq!(pool.pending_removal(), 0);
    }

    #[test]
    fn add_during_reconfiguration_keeps_saved_rotation() {
        let mut pool = pool(1);
        pool.set_rotate(true);
        pool.add_servers([addr(10)]).unwrap();
        pool.add_servers([addr(20)]).unwrap();
        assert_eq!(pool.old_segment_size(), 2);
        assert_eq!(pool.pending_removal(), 2);
        assert_eq!(pool.saved_rotate(), Some(true));
    }

    #[test]
    fn set_rotate_during_reconfiguration_is_deferred() {
        let mut pool = pool(1);
        pool.add_servers([addr(10)]).unwrap();
        pool.set_rotate(true);
        assert!(!pool.rotate());
        assert_eq!(pool.saved_rotate(), Some(true));
    }

    #[test]
    fn shift_one_removes_front() {
        let mut pool = pool(2);
        pool.add_servers([addr(10)]).unwrap();
        pool.attach_query(QueryId::new(1), 1).unwrap();
        pool.attach_query(QueryId::new(2), 2).unwrap();

        let removed = pool.shift_one().unwrap();
        pool.relink(0, 0, true);

        assert_eq!(removed.addr(), addr(0));
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.old_segment_size(), 1);
        assert_eq!(pool.pending_removal(), 1);
        assert_eq!(pool.owner_of(QueryId::new(1)), Some(0));
        assert_eq!(pool.owner_of(QueryId::new(2)), Some(1));
    }

    #[test]
    fn shift_one_drops_orphaned_queries() {
        let mut pool = pool(2);
        pool.attach_query(QueryId::new(1), 0).unwrap();
        pool.shift_one().unwrap();
        pool.relink(0, 0, true);
        assert_eq!(pool.owner_of(QueryId::new(1)), None);
        assert_eq!(pool.query_count(), 0);
    }

    #[test]
    fn shift_one_on_empty_pool() {
        let mut pool = ServerPool::new();
        assert_eq!(pool.shift_one().unwrap_err(), Error::NoServers);
    }

    #[test]
    fn shift_one_finishes_reconfiguration() {
        let mut pool = pool(1);
        pool.set_rotate(true);
        pool.add_servers([addr(10)]).unwrap();
        pool.shift_one().unwrap();
        pool.relink(0, 0, true);
        assert!(!pool.is_reconfiguring());
        assert!(pool.rotate());
        assert_eq!(pool.saved_rotate(), None);
    }

    #[test]
    fn move_query() {
        let mut pool = pool(3);
        pool.attach_query(QueryId::new(1), 0).unwrap();
        assert_eq!(pool.move_query(QueryId::new(1), 2), Ok(0));
        assert_eq!(pool.owner_of(QueryId::new(1)), Some(2));
        assert!(pool.server(0).unwrap().is_idle());
        assert_eq!(
            pool.move_query(QueryId::new(1), 3),
            Err(Error::ServerOutOfRange)
        );
        assert_eq!(
            pool.move_query(QueryId::new(2), 1),
            Err(Error::UnknownQuery)
        );
        assert_eq!(pool.owner_of(QueryId::new(1)), Some(2));
    }

    #[test]
    fn queries_of_missing_server() {
        let pool = pool(1);
        assert_eq!(pool.queries(5).count(), 0);
    }

    #[test]
    fn select_without_rotation() {
        let mut pool = pool(3);
        assert_eq!(pool.select_server(), Some(0));
        assert_eq!(pool.select_server(), Some(0));
        pool.server_mut(0).unwrap().set_broken(true);
        assert_eq!(pool.select_server(), Some(1));
    }

    #[test]
    fn select_with_rotation() {
        let mut pool = pool(3);
        pool.set_rotate(true);
        let picks: Vec<_> =
            (0..4).map(|_| pool.select_server().unwrap()).collect();
        assert_eq!(picks, [0, 1, 2, 0]);

        pool.server_mut(1).unwrap().set_broken(true);
        let picks: Vec<_> =
            (0..3).map(|_| pool.select_server().unwrap()).collect();
        assert_eq!(picks, [2, 0, 2]);
    }

    #[test]
    fn select_all_broken_falls_back() {
        let mut pool = pool(2);
        pool.server_mut(0).unwrap().set_broken(true);
        pool.server_mut(1).unwrap().set_broken(true);
        assert_eq!(pool.select_server(), Some(0));
    }

    #[test]
    fn select_during_reconfiguration_uses_new_servers() {
        let mut pool = pool(2);
        pool.set_rotate(true);
        pool.add_servers([addr(10), addr(11)]).unwrap();
        assert_eq!(pool.dispatch(QueryId::new(1)), Ok(2));
        assert_eq!(pool.dispatch(QueryId::new(2)), Ok(2));
        pool.server_mut(2).unwrap().set_broken(true);
        assert_eq!(pool.dispatch(QueryId::new(3)), Ok(3));
    }

    #[test]
    fn select_from_empty_pool() {
        let mut pool = ServerPool::new();
        assert_eq!(pool.select_server(), None);
        assert_eq!(pool.dispatch(QueryId::new(1)), Err(Error::NoServers));
    }
}
