//! Periodic retirement of old servers.
//!
//! When a pool is used from async code, it needs to live behind a lock. A
//! [`SharedPool`] is such a pool. The [`Sweeper`] drives the retirement of
//! old servers of a shared pool after a reconfiguration by calling
//! [`ServerPool::drain_old_servers`] at a fixed interval until no old
//! servers are left.
//!
//! ```
//! # use domain_pool::pool::ServerPool;
//! # use domain_pool::server::Server;
//! # use domain_pool::sweep::{SharedPool, Sweeper};
//! # async fn _test(pool: SharedPool) {
//! pool.lock().add_servers(["192.0.2.1:53".parse().unwrap()]).unwrap();
//! let sweeper = Sweeper::new(pool.clone(), |_: &mut Server| {});
//! tokio::spawn(sweeper.run());
//! # }
//! ```

use crate::error::Error;
use crate::pool::{CloseSockets, ServerPool};
use crate::utils::config::DefMinMax;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, trace};

/// A server pool that can be shared between tasks.
pub type SharedPool = Arc<Mutex<ServerPool>>;

//------------ Configuration Constants ---------------------------------------

/// Interval between two sweeps.
const SWEEP_INTERVAL: DefMinMax<Duration> = DefMinMax::new(
    Duration::from_millis(500),
    Duration::from_millis(1),
    Duration::from_secs(3600),
);

//------------ Sweeper -------------------------------------------------------

/// Retires the old servers of a shared pool.
pub struct Sweeper<T> {
    /// The pool to sweep.
    pool: SharedPool,

    /// The transport closing the sockets of retired servers.
    transport: T,

    /// Time between two sweeps.
    interval: Duration,
}

impl<T: CloseSockets> Sweeper<T> {
    /// Creates a new sweeper with the default interval.
    pub fn new(pool: SharedPool, transport: T) -> Self {
        Sweeper {
            pool,
            transport,
            interval: SWEEP_INTERVAL.default(),
        }
    }

    /// Returns the time between two sweeps.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Sets the time between two sweeps.
    ///
    /// The value is limited to between a millisecond and an hour.
    pub fn set_interval(&mut self, value: Duration) {
        self.interval = SWEEP_INTERVAL.limit(value)
    }

    /// Sweeps the pool once.
    ///
    /// Returns whether a reconfiguration is still in progress afterwards.
    pub fn sweep(&mut self) -> Result<bool, Error> {
        let mut pool = self.pool.lock();
        let removed = pool.drain_old_servers(&mut self.transport)?;
        if removed > 0 {
            trace!("Sweep retired {removed} servers");
        }
        Ok(pool.is_reconfiguring())
    }

    /// Sweeps the pool until the reconfiguration has finished.
    ///
    /// The first sweep happens right away. Returns immediately if no
    /// reconfiguration is in progress. Returns the transport once done, or
    /// the first error encountered.
    pub async fn run(mut self) -> Result<T, Error> {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if !self.sweep()? {
                debug!("Reconfiguration done, sweeper exits");
                return Ok(self.transport);
            }
        }
    }
}

//============ Testing =======================================================
