//! Dashboard snapshot source.
//!
//! Serves the current state of the four dashboard channels. Figures are
//! generated rather than read from a store; the interface is what matters to
//! subscribers.

use async_trait::async_trait;
use parkflow_realtime::message::now_millis;
use parkflow_realtime::{Filter, SnapshotProvider};
use rand::seq::SliceRandom;
use rand::Rng;
use serde_json::{json, Value};

/// Capacity reported for a lot when none is configured.
pub const DEFAULT_LOT_CAPACITY: u32 = 150;

const TRENDS: [&str; 3] = ["increasing", "decreasing", "stable"];

/// Snapshot source for `occupancy`, `bookings`, `analytics` and `alerts`.
#[derive(Debug, Clone)]
pub struct DashboardSnapshots {
    capacity: u32,
}

impl Default for DashboardSnapshots {
    fn default() -> Self {
        Self::new(DEFAULT_LOT_CAPACITY)
    }
}

impl DashboardSnapshots {
    /// Create a source reporting `capacity` spaces per lot.
    pub fn new(capacity: u32) -> Self {
        Self {
            capacity: capacity.max(1),
        }
    }

    /// Current occupancy of a lot.
    pub fn occupancy(&self, lot_id: Value) -> Value {
        let mut rng = rand::thread_rng();
        let occupancy = rng.gen_range(0..=self.capacity);
        json!({
            "lotId": lot_id,
            "occupancy": occupancy,
            "capacity": self.capacity,
            "available": self.capacity - occupancy,
            "trend": random_trend(&mut rng),
            "lastUpdate": now_millis(),
        })
    }

    /// Booking counters.
    pub fn bookings(&self) -> Value {
        let mut rng = rand::thread_rng();
        let active: u32 = rng.gen_range(10..40);
        let pending: u32 = rng.gen_range(0..10);
        let completed: u32 = rng.gen_range(5..30);
        json!({
            "total": active + pending + completed,
            "active": active,
            "pending": pending,
            "completed": completed,
        })
    }

    /// Revenue and utilization for a lot.
    pub fn analytics(&self, lot_id: Value) -> Value {
        let mut rng = rand::thread_rng();
        let avg_duration = (rng.gen_range(1.0..4.0_f64) * 10.0).round() / 10.0;
        json!({
            "lotId": lot_id,
            "metrics": {
                "revenueToday": rng.gen_range(1_000..5_000),
                "utilizationRate": rng.gen_range(40..=100),
                "avgDuration": avg_duration,
            }
        })
    }

    /// Open alerts for a lot.
    pub fn alerts(&self, lot_id: Value) -> Value {
        json!({
            "lotId": lot_id,
            "alerts": [],
            "warningCount": 0,
        })
    }
}

fn random_trend(rng: &mut impl Rng) -> &'static str {
    TRENDS.choose(rng).copied().unwrap_or("stable")
}

fn lot_of(filters: &Filter) -> Value {
    filters.get("lotId").cloned().unwrap_or(Value::Null)
}

#[async_trait]
impl SnapshotProvider for DashboardSnapshots {
    async fn snapshot(&self, channel: &str, filters: &Filter) -> Option<Value> {
        match channel {
            "occupancy" => Some(self.occupancy(lot_of(filters))),
            "bookings" => Some(self.bookings()),
            "analytics" => Some(self.analytics(lot_of(filters))),
            "alerts" => Some(self.alerts(lot_of(filters))),
            _ => None,
        }
    }

    async fn respond(&self, action: &str, params: &Value) -> Value {
        if action != "snapshot" {
            return json!({ "status": "processed" });
        }

        let Some(channel) = params.get("channel").and_then(Value::as_str) else {
            return json!({ "status": "error", "message": "missing channel" });
        };
        let filters: Filter = params
            .get("filters")
            .cloned()
            .and_then(|f| serde_json::from_value(f).ok())
            .unwrap_or_default();

        match self.snapshot(channel, &filters).await {
            Some(data) => json!({ "status": "ok", "channel": channel, "data": data }),
            None => json!({ "status": "error", "message": format!("unknown channel: {channel}") }),
        }
    }
}
