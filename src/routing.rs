//! The query routing table.
//!
//! Every outstanding query is attached to exactly one server of a pool. The
//! association is kept in two places: each query’s link records the
//! position of its server and each server keeps the list of its queries.
//!
//! The lists are doubly linked through the query links themselves, much
//! like an intrusive list. But instead of pointers into the server
//! storage, both the links and the list heads only ever contain query
//! identifiers. Moving server records around in memory can therefore never
//! leave a list dangling. What does change when a server is removed is the
//! position of all servers after it, which is why [`RoutingTable::relink`]
//! renumbers the owner positions of their queries.

use crate::error::Error;
use crate::server::Server;
use std::collections::HashMap;
use std::fmt;

//------------ QueryId -------------------------------------------------------

/// The identifier of an outstanding query.
///
/// Identifiers are handed out by the query subsystem. The routing table only
/// requires that no two outstanding queries share one.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct QueryId(u64);

impl QueryId {
    pub const fn new(id: u64) -> Self {
        QueryId(id)
    }

    pub const fn into_inner(self) -> u64 {
        self.0
    }
}

impl From<u64> for QueryId {
    fn from(id: u64) -> Self {
        QueryId(id)
    }
}

impl fmt::Display for QueryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "q{}", self.0)
    }
}

//------------ Membership ----------------------------------------------------

/// The head of a server’s list of queries.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Membership {
    /// The first query in the list.
    head: Option<QueryId>,

    /// The last query in the list.
    tail: Option<QueryId>,

    /// The number of queries in the list.
    len: usize,
}

impl Membership {
    /// Creates a new, empty list head.
    pub const fn new() -> Self {
        Membership {
            head: None,
            tail: None,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

//------------ Link ----------------------------------------------------------

/// The routing information of a single query.
#[derive(Clone, Copy, Debug)]
struct Link {
    /// The position of the server the query is attached to.
    owner: usize,

    /// The previous query in the owner’s list.
    prev: Option<QueryId>,

    /// The next query in the owner’s list.
    next: Option<QueryId>,
}

//------------ RoutingTable --------------------------------------------------

/// The set of all query to server associations of a pool.
#[derive(Clone, Debug, Default)]
pub struct RoutingTable {
    links: HashMap<QueryId, Link>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of outstanding queries.
    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Returns the position of the server the query is attached to.
    pub fn owner(&self, id: QueryId) -> Option<usize> {
        self.links.get(&id).map(|link| link.owner)
    }

    /// Returns whether the query is attached to some server.
    pub fn contains(&self, id: QueryId) -> bool {
        self.links.contains_key(&id)
    }

    /// Returns an iterator over the queries of a list.
    pub fn iter<'a>(&'a self, membership: &'a Membership) -> Queries<'a> {
        Queries {
            links: &self.links,
            cur: membership.head,
            remaining: membership.len,
        }
    }

    /// Appends a query to the list of the server at position `owner`.
    pub(crate) fn insert(
        &mut self,
        servers: &mut [Server],
        id: QueryId,
        owner: usize,
    ) -> Result<(), Error> {
        let membership = servers
            .get_mut(owner)
            .ok_or(Error::ServerOutOfRange)?
            .membership_mut();
        if self.links.contains_key(&id) {
            return Err(Error::DuplicateQuery);
        }
        self.links.try_reserve(1)?;

        let link = Link {
            owner,
            prev: membership.tail,
            next: None,
        };
        match membership.tail.and_then(|tail| self.links.get_mut(&tail)) {
            Some(tail) => tail.next = Some(id),
            None => membership.head = Some(id),
        }
        membership.tail = Some(id);
        membership.len += 1;
        self.links.insert(id, link);
        Ok(())
    }

    /// Removes a query from its server’s list.
    ///
    /// Returns the position of the server the query was attached to or
    /// `None` if the query wasn’t attached at all.
    pub(crate) fn remove(
        &mut self,
        servers: &mut [Server],
        id: QueryId,
    ) -> Option<usize> {
        let link = self.links.remove(&id)?;
        let membership = servers.get_mut(link.owner)?.membership_mut();
        match link.prev.and_then(|prev| self.links.get_mut(&prev)) {
            Some(prev) => prev.next = link.next,
            None => membership.head = link.next,
        }
        match link.next.and_then(|next| self.links.get_mut(&next)) {
            Some(next) => next.prev = link.prev,
            None => membership.tail = link.prev,
        }
        membership.len -= 1;
        Some(link.owner)
    }

    /// Drops all queries of a list, leaving the list empty.
    ///
    /// Returns the identifiers of the dropped queries.
    pub(crate) fn detach_all(
        &mut self,
        membership: &mut Membership,
    ) -> Vec<QueryId> {
        let mut res = Vec::with_capacity(membership.len);
        let mut cur = membership.head;
        while let Some(id) = cur {
            cur = self.links.remove(&id).and_then(|link| link.next);
            res.push(id);
        }
        *membership = Membership::new();
        res
    }

    /// Re-anchors the lists of all servers after the pool has changed.
    ///
    /// All servers but the last `skip_back` ones are processed. Empty lists
    /// are reset to the canonical empty state, the boundary links of all
    /// other lists are repaired. If `shift` is true, all queries of servers
    /// at positions `skip_front` and later are moved down one position,
    /// following their server after an earlier server has been removed.
    pub(crate) fn relink(
        &mut self,
        servers: &mut [Server],
        skip_front: usize,
        skip_back: usize,
        shift: bool,
    ) {
        let end = servers.len().saturating_sub(skip_back);
        for (pos, server) in servers[..end].iter_mut().enumerate() {
            let membership = server.membership_mut();
            if membership.is_empty() {
                *membership = Membership::new();
                continue;
            }

            if let Some(head) =
                membership.head.and_then(|id| self.links.get_mut(&id))
            {
                head.prev = None;
            }
            if let Some(tail) =
                membership.tail.and_then(|id| self.links.get_mut(&id))
            {
                tail.next = None;
            }

            if shift && pos >= skip_front {
                let mut cur = membership.head;
                while let Some(link) =
                    cur.and_then(|id| self.links.get_mut(&id))
                {
                    link.owner = link.owner.saturating_sub(1);
                    cur = link.next;
                }
            }
        }
    }
}

//------------ Queries -------------------------------------------------------

/// An iterator over the queries of a server.
#[derive(Clone, Debug)]
pub struct Queries<'a> {
    links: &'a HashMap<QueryId, Link>,
    cur: Option<QueryId>,

    /// Guards against walking a corrupted list forever.
    remaining: usize,
}

impl<'a> Iterator for Queries<'a> {
    type Item = QueryId;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let id = self.cur?;
        self.cur = self.links.get(&id).and_then(|link| link.next);
        self.remaining -= 1;
        Some(id)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.remaining))
    }
}

//============ Testing =======================================================

#[cfg(test)]
mod test {
    use super::*;

    fn servers(n: usize) -> Vec<Server> {
        (0..n)
            .map(|i| {
                Server::new(([192, 0, 2, i as u8], 53).into(), i as u64 + 1)
            })
            .collect()
    }

    fn ids(table: &RoutingTable, server: &Server) -> Vec<u64> {
        table
            .iter(server.membership())
            .map(QueryId::into_inner)
            .collect()
    }

    #[test]
    fn insert_appends() {
        let mut servers = servers(2);
        let mut table = RoutingTable::new();
        for id in 1..4 {
            table.insert(&mut servers, QueryId::new(id), 1).unwrap();
        }
        assert_eq!(ids(&table, &servers[1]), [1, 2, 3]);
        assert_eq!(servers[1].query_count(), 3);
        assert!(servers[0].is_idle());
        assert_eq!(table.owner(QueryId::new(2)), Some(1));
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn insert_rejects_bad_input() {
        let mut servers = servers(1);
        let mut table = RoutingTable::new();
        table.insert(&mut servers, QueryId::new(1), 0).unwrap();
        assert_eq!(
            table.insert(&mut servers, QueryId::new(1), 0),
            Err(Error::DuplicateQuery)
        );
        assert_eq!(
            table.insert(&mut servers, QueryId::new(2), 1),
            Err(Error::ServerOutOfRange)
        );
        assert_eq!(servers[0].query_count(), 1);
    }

    #[test]
    fn remove_anywhere() {
        let mut servers = servers(1);
        let mut table = RoutingTable::new();
        for id in 1..6 {
            table.insert(&mut servers, QueryId::new(id), 0).unwrap();
        }

        // middle, head, tail
        assert_eq!(table.remove(&mut servers, QueryId::new(3)), Some(0));
        assert_eq!(ids(&table, &servers[0]), [1, 2, 4, 5]);
        assert_eq!(table.remove(&mut servers, QueryId::new(1)), Some(0));
        assert_eq!(ids(&table, &servers[0]), [2, 4, 5]);
        assert_eq!(table.remove(&mut servers, QueryId::new(5)), Some(0));
        assert_eq!(ids(&table, &servers[0]), [2, 4]);
        assert_eq!(table.remove(&mut servers, QueryId::new(5)), None);

        table.remove(&mut servers, QueryId::new(2));
        table.remove(&mut servers, QueryId::new(4));
        assert!(servers[0].is_idle());
        assert_eq!(*servers[0].membership(), Membership::new());

        // The list can be reused after having been emptied.
        table.insert(&mut servers, QueryId::new(9), 0).unwrap();
        assert_eq!(ids(&table, &servers[0]), [9]);
    }

    #[test]
    fn relink_shift_renumbers_from_skip_front() {
        let mut servers = servers(4);
        let mut table = RoutingTable::new();
        table.insert(&mut servers, QueryId::new(0), 0).unwrap();
        table.insert(&mut servers, QueryId::new(2), 2).unwrap();
        table.insert(&mut servers, QueryId::new(3), 3).unwrap();
        table.insert(&mut servers, QueryId::new(4), 3).unwrap();

        // Drop the idle server at position 1 and let the rest follow.
        servers.remove(1);
        table.relink(&mut servers, 1, 0, true);

        assert_eq!(table.owner(QueryId::new(0)), Some(0));
        assert_eq!(table.owner(QueryId::new(2)), Some(1));
        assert_eq!(table.owner(QueryId::new(3)), Some(2));
        assert_eq!(table.owner(QueryId::new(4)), Some(2));
        assert_eq!(ids(&table, &servers[2]), [3, 4]);
    }

    #[test]
    fn relink_without_shift_keeps_positions() {
        let mut servers = servers(3);
        let mut table = RoutingTable::new();
        table.insert(&mut servers, QueryId::new(1), 1).unwrap();
        table.relink(&mut servers, 0, 1, false);
        assert_eq!(table.owner(QueryId::new(1)), Some(1));
        assert_eq!(ids(&table, &servers[1]), [1]);
    }

    #[test]
    fn detach_all_empties_list() {
        let mut servers = servers(2);
        let mut table = RoutingTable::new();
        table.insert(&mut servers, QueryId::new(1), 0).unwrap();
        table.insert(&mut servers, QueryId::new(2), 0).unwrap();
        table.insert(&mut servers, QueryId::new(3), 1).unwrap();

        let dropped = table.detach_all(servers[0].membership_mut());
        assert_eq!(dropped, [QueryId::new(1), QueryId::new(2)]);
        assert!(servers[0].is_idle());
        assert!(!table.contains(QueryId::new(1)));
        assert_eq!(table.owner(QueryId::new(3)), Some(1));
    }
}
