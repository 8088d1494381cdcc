//! Event producers.
//!
//! Thin helpers that shape domain events into channel payloads, plus a
//! simulator that feeds random occupancy changes for demos.

use crate::config::SimulatorConfig;
use parkflow_realtime::ConnectionHub;
use rand::Rng;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Channel carrying lot occupancy.
pub const OCCUPANCY_CHANNEL: &str = "occupancy";
/// Channel carrying booking activity.
pub const BOOKINGS_CHANNEL: &str = "bookings";
/// Channel carrying alerts.
pub const ALERTS_CHANNEL: &str = "alerts";
/// Channel carrying analytics.
pub const ANALYTICS_CHANNEL: &str = "analytics";

/// Publishes parking events to the hub.
#[derive(Debug, Clone)]
pub struct ParkingEvents {
    hub: Arc<ConnectionHub>,
}

impl ParkingEvents {
    /// Create a publisher over `hub`.
    pub fn new(hub: Arc<ConnectionHub>) -> Self {
        Self { hub }
    }

    /// Occupancy of `lot_id` changed. Fields in `data` win over the lot id.
    pub async fn occupancy_changed(&self, lot_id: &str, data: Map<String, Value>) -> usize {
        let mut payload = Map::new();
        payload.insert("lotId".to_string(), Value::String(lot_id.to_string()));
        payload.extend(data);
        self.hub.broadcast(OCCUPANCY_CHANNEL, Value::Object(payload)).await
    }

    /// A booking was created.
    pub async fn booking_created(&self, booking: Value) -> usize {
        self.hub
            .broadcast(
                BOOKINGS_CHANNEL,
                json!({ "type": "new_booking", "booking": booking }),
            )
            .await
    }

    /// An alert was raised.
    pub async fn alert_raised(&self, alert: Value) -> usize {
        self.hub.broadcast(ALERTS_CHANNEL, alert).await
    }

    /// Analytics were recomputed.
    pub async fn analytics_updated(&self, analytics: Value) -> usize {
        self.hub.broadcast(ANALYTICS_CHANNEL, analytics).await
    }
}

/// Periodically publishes random occupancy for a set of lots.
#[derive(Debug, Clone)]
pub struct OccupancySimulator {
    events: ParkingEvents,
    config: SimulatorConfig,
}

impl OccupancySimulator {
    /// Create a simulator.
    pub fn new(events: ParkingEvents, config: SimulatorConfig) -> Self {
        Self { events, config }
    }

    fn sample(&self) -> Vec<(String, Map<String, Value>)> {
        let mut rng = rand::thread_rng();
        let capacity = self.config.capacity;
        self.config
            .lots
            .iter()
            .map(|lot| {
                let occupancy = rng.gen_range(0..=capacity);
                let mut data = Map::new();
                data.insert("occupancy".to_string(), json!(occupancy));
                data.insert("capacity".to_string(), json!(capacity));
                data.insert("available".to_string(), json!(capacity - occupancy));
                (lot.clone(), data)
            })
            .collect()
    }

    /// Publish one round of updates. Returns total deliveries.
    pub async fn tick(&self) -> usize {
        let mut delivered = 0;
        for (lot, data) in self.sample() {
            delivered += self.events.occupancy_changed(&lot, data).await;
        }
        delivered
    }

    /// Publish every interval until `shutdown` is cancelled.
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let every = Duration::from_secs(self.config.interval_seconds.max(1));
            let mut ticker = time::interval_at(Instant::now() + every, every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(
                lots = self.config.lots.len(),
                interval_seconds = every.as_secs(),
                "Occupancy simulator started"
            );

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let delivered = self.tick().await;
                        debug!(delivered = delivered, "Simulated occupancy published");
                    }
                }
            }

            debug!("Occupancy simulator stopped");
        })
    }
}
