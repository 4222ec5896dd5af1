//! Retiring the old servers of a reconfiguration.

use super::ServerPool;
use crate::error::Error;
use crate::server::Server;
use tracing::{debug, trace};

//------------ CloseSockets --------------------------------------------------

/// The transport side of retiring a server.
///
/// The pool calls [`close_sockets`][Self::close_sockets] exactly once for
/// each server it retires, right before removing it. The call must not
/// block. If closing is asynchronous for the transport, it should start
/// the teardown and return. The server record is gone from the pool once
/// the call returns.
pub trait CloseSockets {
    /// Closes all sockets of the server.
    fn close_sockets(&mut self, server: &mut Server);
}

impl<F: FnMut(&mut Server)> CloseSockets for F {
    fn close_sockets(&mut self, server: &mut Server) {
        (self)(server)
    }
}

//------------ ServerPool ----------------------------------------------------

impl ServerPool {
    /// Retires all idle old servers.
    ///
    /// This is a no-op if no reconfiguration is in progress. Otherwise,
    /// every server of the old segment that has no outstanding queries has
    /// its sockets closed via `transport` and is removed from the pool.
    /// Queries of servers behind a removed server follow their server to
    /// its new position. Old servers that are still busy are left alone
    /// and will be looked at again by the next call.
    ///
    /// Once the old segment is empty, the reconfiguration ends and the
    /// rotation setting from before it is restored.
    ///
    /// The method should be called whenever queries have finished, e.g.,
    /// at the end of each round of processing. Returns the number of
    /// servers removed.
    ///
    /// If allocating the smaller backing store fails, the method returns
    /// with [`Error::OutOfMemory`]. Servers removed before that remain
    /// removed and the server that was up next stays untouched, sockets
    /// included.
    pub fn drain_old_servers<T>(
        &mut self,
        transport: &mut T,
    ) -> Result<usize, Error>
    where
        T: CloseSockets + ?Sized,
    {
        if self.pending_removal < 1 {
            return Ok(0);
        }

        let mut removed = 0;
        let mut pos = 0;
        while pos < self.old_segment {
            if !self.servers[pos].is_idle() {
                pos += 1;
                continue;
            }

            let store = self.shrunk_store()?;
            transport.close_sockets(&mut self.servers[pos]);
            let server = self.shift_into(store, pos);
            self.routes.relink(&mut self.servers, pos, 0, true);
            self.pending_removal = self.pending_removal.saturating_sub(1);
            removed += 1;
            debug!(
                "Retired old server {}, {} still pending",
                server.addr(),
                self.pending_removal
            );

            // The next server has moved into `pos`, so look at it again.
        }

        if self.old_segment == 0 {
            self.finish_reconfiguration();
        }
        Ok(removed)
    }

    /// Ends a reconfiguration.
    ///
    /// Restores the rotation setting. Does nothing if there is no saved
    /// setting, so this can safely be reached more than once.
    pub(super) fn finish_reconfiguration(&mut self) {
        if let Some(rotate) = self.saved_rotate.take() {
            trace!("Reconfiguration finished, rotate is {rotate}");
            self.rotate = rotate;
        }
        self.pending_removal = 0;
    }
}

//============ Testing =======================================================
