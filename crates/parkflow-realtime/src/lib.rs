//! # ParkFlow Real-time
//!
//! Real-time WebSocket core for the ParkFlow parking dashboard.
//!
//! Dashboards subscribe to named channels (`occupancy`, `bookings`,
//! `analytics`, `alerts`, ...) and receive every update published to those
//! channels, optionally narrowed by equality filters on the payload.
//!
//! ## Features
//!
//! - **Connection Hub**: registry of live connections and the channel index
//! - **Filtered Broadcast**: concurrent fan-out with per-recipient send timeouts
//! - **Heartbeats**: client-driven pings, stale connections evicted by sweep
//! - **Snapshots**: initial channel state sent right after subscribing
//! - **Reconnecting Client**: bounded retries and automatic resubscription
//!
//! ## Example
//!
//! ```rust
//! use parkflow_realtime::{ConnectionHub, ConnectionMetadata, Filter};
//! use serde_json::json;
//!
//! # tokio_test_block_on(async {
//! let hub = ConnectionHub::default();
//!
//! let conn = hub.accept(ConnectionMetadata::default()).await.unwrap();
//! hub.subscribe(&conn.id, "occupancy", Filter::new().with("lotId", "lot-001"))
//!     .await
//!     .unwrap();
//!
//! let delivered = hub
//!     .broadcast("occupancy", json!({"lotId": "lot-001", "occupancy": 87}))
//!     .await;
//! assert_eq!(delivered, 1);
//! # });
//! # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(f)
//! # }
//! ```
//!
//! ## WebSocket Protocol
//!
//! Every frame is a JSON object with a `type` tag and a millisecond
//! `timestamp`.
//!
//! ### Client -> Server Messages
//!
//! ```json
//! {"type": "ping"}
//! {"type": "subscribe", "channel": "occupancy", "filters": {"lotId": "lot-001"}}
//! {"type": "unsubscribe", "channel": "occupancy"}
//! {"type": "request", "requestId": "r-1", "action": "snapshot", "params": {"channel": "bookings"}}
//! ```
//!
//! ### Server -> Client Messages
//!
//! ```json
//! {"type": "connected", "clientId": "...", "message": "Connected to ParkFlow real-time service"}
//! {"type": "pong"}
//! {"type": "subscribed", "channel": "occupancy"}
//! {"type": "initial_data", "channel": "occupancy", "data": {...}}
//! {"type": "update", "channel": "occupancy", "data": {...}}
//! {"type": "unsubscribed", "channel": "occupancy"}
//! {"type": "response", "requestId": "r-1", "data": {...}}
//! {"type": "error", "message": "Unknown message type: teleport"}
//! {"type": "server_shutdown", "message": "Server is shutting down"}
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                ConnectionHub                 │
//! │  ┌────────────────────────────────────────┐  │
//! │  │ Mutex<HubState>                        │  │
//! │  │   connections: id -> Connection        │  │
//! │  │     └─> outbound sender, close token   │  │
//! │  │     └─> subscriptions, last heartbeat  │  │
//! │  │   index: channel -> {id -> Filter}     │  │
//! │  └────────────────────────────────────────┘  │
//! │        ▲ sweep               ▲ snapshot      │
//! │  HeartbeatMonitor     dyn SnapshotProvider   │
//! └──────────────────────────────────────────────┘
//! ```

pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod filter;
pub mod heartbeat;
pub mod hub;
pub mod message;
pub mod snapshot;
pub mod subscription;

// Re-export main types
pub use client::{
    ChannelFeed, ClientSnapshot, ConnectionStatus, Connector, RealtimeClient, WsConnector,
};
pub use config::{ClientConfig, HubConfig};
pub use connection::{AcceptedConnection, ConnectionId, ConnectionMetadata};
pub use error::RealtimeError;
pub use filter::Filter;
pub use heartbeat::HeartbeatMonitor;
pub use hub::{ChannelStats, ConnectionHub, HubStats};
pub use message::{ClientCommand, Envelope, Frame, ServerMessage};
pub use snapshot::{NoSnapshots, SnapshotProvider};
pub use subscription::SubscriptionIndex;
