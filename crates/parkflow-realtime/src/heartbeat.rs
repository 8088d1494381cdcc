//! Periodic eviction of connections that stopped pinging.
//!
//! Clients drive liveness: the server never pings, it only checks how long
//! ago each connection last sent a `ping`. This is the only way half-open
//! TCP connections are detected.

use crate::connection::ConnectionId;
use crate::error::RealtimeError;
use crate::hub::ConnectionHub;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Scans the hub for stale connections on a fixed interval.
#[derive(Debug, Clone)]
pub struct HeartbeatMonitor {
    hub: Arc<ConnectionHub>,
    interval: Duration,
}

impl HeartbeatMonitor {
    /// Create a monitor using the hub's configured sweep interval.
    ///
    /// Fails if the hub's heartbeat settings are unusable.
    pub fn new(hub: Arc<ConnectionHub>) -> Result<Self, RealtimeError> {
        hub.config().validate()?;
        let interval = hub.config().heartbeat_interval();
        Ok(Self { hub, interval })
    }

    /// Run one sweep now.
    pub fn sweep(&self) -> Vec<ConnectionId> {
        let evicted = self.hub.evict_stale(Instant::now());
        if evicted.is_empty() {
            debug!("Heartbeat sweep found no stale connections");
        } else {
            info!(evicted = evicted.len(), "Heartbeat sweep evicted connections");
        }
        evicted
    }

    /// Sweep every interval until `shutdown` is cancelled.
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + self.interval, self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        self.sweep();
                    }
                }
            }

            debug!("Heartbeat monitor stopped");
        })
    }
}
