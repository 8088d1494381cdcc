//! # ParkFlow Node
//!
//! Server process for the ParkFlow dashboard's real-time channel.
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │                  ParkFlow Node                   │
//! │                                                  │
//! │  HTTP (axum)                                     │
//! │   • GET /health                                  │
//! │   • GET /ws                  ──► ConnectionHub   │
//! │   • GET /api/realtime/stats                      │
//! │                                                  │
//! │  Background                                      │
//! │   • HeartbeatMonitor         ──► evict stale     │
//! │   • OccupancySimulator       ──► ParkingEvents   │
//! │                                                  │
//! │  DashboardSnapshots          ◄── subscribe       │
//! └──────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! cargo run --bin parkflow-node -- --listen-addr 127.0.0.1:3001
//! ```
//!
//! ## Modules
//!
//! - [`api`] - Router, shared state and health check
//! - [`realtime_api`] - WebSocket endpoint and statistics
//! - [`config`] - Layered configuration and validation
//! - [`events`] - Event publishers and the occupancy simulator
//! - [`snapshots`] - Initial channel data for new subscribers
//! - [`observability`] - Structured logging
//! - [`server`] - Node runtime and graceful shutdown

pub mod api;
pub mod config;
pub mod error;
pub mod events;
pub mod observability;
pub mod realtime_api;
pub mod server;
pub mod snapshots;

pub use config::NodeConfig;
pub use error::NodeError;
pub use server::Node;
